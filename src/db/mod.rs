pub mod memory;
pub mod pg_store;
pub mod snapshot_store;

pub use memory::MemorySnapshotStore;
pub use pg_store::PgSnapshotStore;
pub use snapshot_store::{PersistenceError, SnapshotStore};
