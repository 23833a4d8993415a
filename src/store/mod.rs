pub mod error;
pub mod memory;
pub mod sqlite_store;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite_store::SqliteStore;
pub use traits::RecordStore;
