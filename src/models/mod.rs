pub mod diagnostics;
pub mod doc_delete;
pub mod error;
pub mod health;
pub mod messages;
pub mod participant;

pub use diagnostics::*;
pub use doc_delete::*;
pub use error::*;
pub use health::*;
pub use messages::*;
pub use participant::*;
