use axum::extract::ws::Utf8Bytes;
use tracing::{info, warn};

use super::messages::PeerList;
use super::registry::Registry;

/// Pushes `{"join": "<ids>"}` to every registered peer, the one that
/// triggered the change included. Does nothing once the registry is empty.
///
/// Returns the number of peers that accepted the push.
pub fn broadcast_peer_list(registry: &Registry) -> usize {
    if registry.is_empty() {
        return 0;
    }

    let list = PeerList::new(registry.iter().map(|(peer_id, _)| peer_id));
    let json = match serde_json::to_string(&list) {
        Ok(json) => Utf8Bytes::from(json),
        Err(e) => {
            warn!("Peer list serialization failed: {}", e);
            return 0;
        }
    };

    let mut delivered = 0;
    for (peer_id, handle) in registry.iter() {
        match handle.send_text(json.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Peer list push to {} failed: {}", peer_id, e),
        }
    }

    info!("Peer list sent {}", json.as_str());
    delivered
}
