pub mod diagnostics;
pub mod doc_delete;
pub mod health;

pub use diagnostics::*;
pub use doc_delete::*;
pub use health::*;
