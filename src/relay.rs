//! WebSocket rendezvous relay: peer directory plus signaling message routing

mod actor;
mod broadcast;
mod messages;
mod registry;
mod router;
mod server;
mod types;

pub use actor::RegistryHandle;
pub use broadcast::broadcast_peer_list;
pub use messages::{Envelope, PeerList};
pub use registry::Registry;
pub use router::{route_binary, route_text};
pub use server::RelayServer;
pub use types::{
    ConnectionHandle, ConnectionId, Control, Outbound, PeerId, RelayError, SendError,
};
