// meshdoc - local-first document store synchronized over a peer mesh
//
// Modules:
// - storage:   key-value backends and the persisted single-value store
// - document:  the todo list model and last-writer-wins merge
// - transport: channel providers (in-process, TCP)
// - sync:      connection registry, wire codec and the sync engine
// - config:    store configuration

pub mod config;
pub mod document;
pub mod storage;
pub mod sync;
pub mod transport;

pub use config::{ConfigError, IdentityMode, SyncConfig};
pub use document::{merge, Document, Item};
pub use storage::{Mutator, Persistence, ValueStore};
pub use sync::{PeerSyncManager, SyncError, SyncHandle};
pub use transport::{PeerId, Transport};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
