// Sync module - HOW STORES TALK
// Connection tracking, the wire codec and the synchronized store engine

mod handle;
mod manager;
mod peer;
mod protocol;

pub use handle::SyncHandle;
pub use manager::{PeerSyncManager, SyncError, SyncManagerBuilder, SyncStats};
pub use peer::{Connection, ConnectionRegistry, ConnectionState, Direction, PeerError, PeerStats};
pub use protocol::{CodecError, DocumentCodec};
