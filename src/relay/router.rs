use axum::body::Bytes;
use tracing::{debug, warn};

use super::messages::Envelope;
use super::registry::Registry;
use super::types::{PeerId, RelayError};
use crate::protocol::BinaryFrame;

/// Relays a JSON envelope to the peer named by its `id`, re-addressed to `sender`.
pub fn route_text(registry: &Registry, sender: &PeerId, text: &str) -> Result<(), RelayError> {
    let mut envelope = Envelope::parse(text)?;
    let dest_id = PeerId::from(envelope.id());

    let dest = registry
        .get(dest_id.as_str())
        .ok_or_else(|| RelayError::PeerNotFound(dest_id.clone()))?;

    envelope.readdress(sender)?;
    let json = envelope.to_json()?;

    dest.send_text(json)
        .map_err(|source| RelayError::Transport {
            peer: dest_id.clone(),
            source,
        })?;

    debug!("Text {} >> {}", sender, dest_id);
    Ok(())
}

/// Relays a binary frame byte-for-byte. Returns the number of deliveries.
///
/// Unicast frames go to their destination only. Broadcast frames go to every
/// peer except the one named in the source segment; a failed send to one of
/// them is logged and skipped.
pub fn route_binary(registry: &Registry, sender: &PeerId, data: Bytes) -> Result<usize, RelayError> {
    let frame = BinaryFrame::parse(&data);

    if frame.is_offer_request() {
        debug!("needoffer from {}", frame.src);
    }

    if frame.is_unicast() {
        let dest = registry
            .get(&frame.dest)
            .ok_or_else(|| RelayError::PeerNotFound(PeerId::from(&*frame.dest)))?;

        dest.send_binary(data.clone())
            .map_err(|source| RelayError::Transport {
                peer: PeerId::from(&*frame.dest),
                source,
            })?;

        debug!("Binary {} >> {} ({} bytes)", sender, frame.dest, data.len());
        return Ok(1);
    }

    let mut delivered = 0;
    for (peer_id, handle) in registry.iter() {
        if peer_id.as_str() == frame.src {
            continue;
        }
        match handle.send_binary(data.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => warn!("Broadcast to {} failed: {}", peer_id, e),
        }
    }

    debug!(
        "Binary {} >> all excluding {:?} ({} peers)",
        sender, frame.src, delivered
    );
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use crate::relay::types::{ConnectionHandle, Control, Outbound, SendError};
    use tokio::sync::mpsc;

    struct TestPeer {
        rx: async_channel::Receiver<Outbound>,
        _control: mpsc::UnboundedReceiver<Control>,
    }

    impl TestPeer {
        fn received(&self) -> Vec<Outbound> {
            std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
        }
    }

    fn registry_with(names: &[&str]) -> (Registry, Vec<TestPeer>) {
        let mut registry = Registry::new();
        let mut peers = Vec::new();
        for name in names {
            let (handle, rx, control) = ConnectionHandle::channel(8);
            registry.register(PeerId::from(*name), handle);
            peers.push(TestPeer {
                rx,
                _control: control,
            });
        }
        (registry, peers)
    }

    #[test]
    fn text_is_readdressed_to_sender() {
        let (registry, peers) = registry_with(&["A", "B"]);

        route_text(&registry, &PeerId::from("A"), r#"{"id":"B","sdp":"X"}"#).unwrap();

        assert_eq!(
            peers[1].received(),
            [Outbound::Text(r#"{"id":"A","sdp":"X"}"#.into())]
        );
        assert!(peers[0].received().is_empty());
    }

    #[test]
    fn text_to_unknown_peer_is_lookup_failure() {
        let (registry, peers) = registry_with(&["A"]);

        let err = route_text(&registry, &PeerId::from("A"), r#"{"id":"ghost"}"#).unwrap_err();

        assert!(matches!(err, RelayError::PeerNotFound(ref id) if id.as_str() == "ghost"));
        assert!(peers[0].received().is_empty());
    }

    #[test]
    fn malformed_text_is_parse_failure() {
        let (registry, peers) = registry_with(&["A", "B"]);

        assert!(matches!(
            route_text(&registry, &PeerId::from("A"), "{oops"),
            Err(RelayError::Json(_))
        ));
        assert!(matches!(
            route_text(&registry, &PeerId::from("A"), r#"{"sdp":"X"}"#),
            Err(RelayError::MissingId)
        ));
        assert!(peers[1].received().is_empty());
    }

    #[test]
    fn text_to_closed_peer_is_transport_failure() {
        let (registry, mut peers) = registry_with(&["A", "B"]);
        drop(peers.remove(1));

        let err = route_text(&registry, &PeerId::from("A"), r#"{"id":"B"}"#).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Transport {
                source: SendError::Disconnected,
                ..
            }
        ));
    }

    #[test]
    fn binary_unicast_is_forwarded_unchanged() {
        let (registry, peers) = registry_with(&["alice", "bob", "carol"]);
        let data = Bytes::from(encode_frame("bob", "alice", "offer", b"\x00sdp\x00"));

        let delivered = route_binary(&registry, &PeerId::from("alice"), data.clone()).unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(peers[1].received(), [Outbound::Binary(data)]);
        assert!(peers[0].received().is_empty());
        assert!(peers[2].received().is_empty());
    }

    #[test]
    fn binary_unicast_to_unknown_peer_is_dropped() {
        let (registry, peers) = registry_with(&["alice", "bob"]);
        let data = Bytes::from(encode_frame("ghost", "alice", "offer", b"x"));

        let err = route_binary(&registry, &PeerId::from("alice"), data).unwrap_err();

        assert!(matches!(err, RelayError::PeerNotFound(_)));
        assert!(peers.iter().all(|p| p.received().is_empty()));
    }

    #[test]
    fn binary_broadcast_skips_source() {
        let (registry, peers) = registry_with(&["A", "B", "C"]);
        let data = Bytes::from_static(b"\0A\0needoffer\0payload");

        let delivered = route_binary(&registry, &PeerId::from("A"), data.clone()).unwrap();

        assert_eq!(delivered, 2);
        assert!(peers[0].received().is_empty());
        assert_eq!(peers[1].received(), [Outbound::Binary(data.clone())]);
        assert_eq!(peers[2].received(), [Outbound::Binary(data)]);
    }

    #[test]
    fn broadcast_survives_a_failed_destination() {
        let (registry, mut peers) = registry_with(&["A", "B", "C"]);
        drop(peers.remove(1));
        let data = Bytes::from_static(b"\0A\0candidate\0x");

        let delivered = route_binary(&registry, &PeerId::from("A"), data.clone()).unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(peers[1].received(), [Outbound::Binary(data)]);
    }
}
