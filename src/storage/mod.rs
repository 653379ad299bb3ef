// Storage module - PERSISTENCE
// Key-value backends and the single-value store built on top of them

mod memory;
mod store;
mod value;

pub use memory::MemoryStore;
pub use store::{KvStore, SledStore, StorageStats, StoreError};
pub use value::{
    default_error_handler, ErrorHandler, Mutator, Persistence, StorageFailure, StorageOp,
    ValueStore,
};
