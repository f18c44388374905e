use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::broadcast::broadcast_peer_list;
use super::registry::Registry;
use super::router::{route_binary, route_text};
use super::types::{ConnectionHandle, ConnectionId, PeerId, RelayError};

/// Commands sent to the registry actor
pub(crate) enum RegistryCommand {
    Register {
        peer_id: PeerId,
        handle: ConnectionHandle,
    },
    Unregister {
        peer_id: PeerId,
        connection: ConnectionId,
    },
    Text {
        from: PeerId,
        text: String,
    },
    Binary {
        from: PeerId,
        data: Bytes,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
}

/// Owns the registry. Every mutation, route and peer list push runs here, one
/// command at a time.
pub(crate) async fn registry_actor(mut rx: mpsc::Receiver<RegistryCommand>) {
    let mut registry = Registry::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Register { peer_id, handle } => {
                let connection = handle.id();
                if let Some(displaced) = registry.register(peer_id.clone(), handle) {
                    warn!(
                        "Peer {} re-registered by connection {}, replacing {}",
                        peer_id,
                        connection,
                        displaced.id()
                    );
                }
                info!("Peer {} connected ({} online)", peer_id, registry.len());
                broadcast_peer_list(&registry);
            }

            RegistryCommand::Unregister {
                peer_id,
                connection,
            } => {
                if registry.unregister(peer_id.as_str(), connection) {
                    info!("Peer {} disconnected ({} online)", peer_id, registry.len());
                    broadcast_peer_list(&registry);
                }
            }

            RegistryCommand::Text { from, text } => {
                if let Err(e) = route_text(&registry, &from, &text) {
                    log_route_error(&from, &e);
                }
            }

            RegistryCommand::Binary { from, data } => {
                if let Err(e) = route_binary(&registry, &from, data) {
                    log_route_error(&from, &e);
                }
            }

            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(registry.peer_ids());
            }
        }
    }
}

fn log_route_error(from: &PeerId, e: &RelayError) {
    match e {
        RelayError::PeerNotFound(dest) => warn!("Client {} not found (from {})", dest, from),
        _ => warn!("Dropped message from {}: {}", from, e),
    }
}

/// Handle to communicate with the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawns the actor on the current runtime
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<RegistryCommand>(capacity.max(1));
        tokio::spawn(registry_actor(rx));
        Self { tx }
    }

    /// Registers a connection and pushes the new peer list
    pub async fn register(&self, peer_id: PeerId, handle: ConnectionHandle) {
        let _ = self
            .tx
            .send(RegistryCommand::Register { peer_id, handle })
            .await;
    }

    /// Unregisters a connection if it still owns `peer_id`
    pub async fn unregister(&self, peer_id: PeerId, connection: ConnectionId) {
        let _ = self
            .tx
            .send(RegistryCommand::Unregister {
                peer_id,
                connection,
            })
            .await;
    }

    pub async fn relay_text(&self, from: PeerId, text: String) {
        let _ = self.tx.send(RegistryCommand::Text { from, text }).await;
    }

    pub async fn relay_binary(&self, from: PeerId, data: Bytes) {
        let _ = self.tx.send(RegistryCommand::Binary { from, data }).await;
    }

    /// Currently registered peer ids
    pub async fn peers(&self) -> Result<Vec<PeerId>, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(RegistryCommand::Snapshot { reply: reply_tx })
            .await;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))
    }
}
