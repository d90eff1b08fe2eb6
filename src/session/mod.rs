pub mod collab;
pub mod error;
pub mod registry;

pub use error::SessionError;
pub use registry::SessionRegistry;
