// Transport module - THE WIRE (abstract)
// Channel providers the sync layer talks through: in-process and TCP

mod memory;
mod tcp;
mod traits;

pub use traits::{
    // Core trait
    Transport,
    // Identity
    PeerId,
    // Events and errors
    TransportEvent, TransportError, TransportState,
    // Statistics
    TransportStats,
};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpTransport, TcpTransportConfig};
