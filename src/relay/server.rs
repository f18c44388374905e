use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::actor::RegistryHandle;
use super::types::{ConnectionHandle, Control, PeerId};
use crate::config::RelayConfig;

const COMMAND_QUEUE: usize = 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Shared by every request the gateway serves
#[derive(Clone)]
struct GatewayState {
    registry: RegistryHandle,
    config: Arc<RelayConfig>,
}

/// HTTP listener that upgrades WebSocket requests on any path and answers
/// everything else with a 404.
pub struct RelayServer {
    listener: TcpListener,
    registry: RegistryHandle,
    config: RelayConfig,
}

impl RelayServer {
    /// Binds the listener and starts the registry actor
    pub async fn bind(config: RelayConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let registry = RegistryHandle::spawn(COMMAND_QUEUE);

        info!("Relay server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry,
            config,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Per-connection failures never stop
    /// the listener.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let state = GatewayState {
            registry: self.registry,
            config: Arc::new(self.config),
        };

        let app = Router::new()
            .fallback(relay_handler)
            .layer(CorsLayer::permissive())
            .with_state(state);

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Relay server shutting down");
        Ok(())
    }
}

async fn relay_handler(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = ws else {
        info!("{} {}", method, uri);
        return (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "text/plain")],
            "Not Found",
        )
            .into_response();
    };

    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    info!("WebSocket request {} from {}", target, addr);

    let peer_id = PeerId::from(peer_id_from_path(target));
    if peer_id.as_str().is_empty() {
        warn!("Connection from {} has an empty peer id", addr);
    }

    ws.on_upgrade(move |socket| run_connection(socket, peer_id, addr, state))
}

/// First path segment of the request target. A query string after it stays
/// part of the id.
fn peer_id_from_path(target: &str) -> &str {
    target.split('/').nth(1).unwrap_or_default()
}

async fn run_connection(socket: WebSocket, peer_id: PeerId, addr: SocketAddr, state: GatewayState) {
    let GatewayState { registry, config } = state;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (handle, outbound_rx, mut control_rx) = ConnectionHandle::channel(config.outbound_queue);
    let connection = handle.id();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => match msg {
                    Ok(msg) => {
                        if ws_tx.send(msg.into_message()).await.is_err() {
                            return;
                        }
                    }
                    // queue closed and drained
                    Err(_) => break,
                },
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    registry.register(peer_id.clone(), handle.clone()).await;
    info!("Client {} connected from {} ({})", peer_id, addr, connection);

    let mut ping_interval = config.ping_interval.map(tokio::time::interval);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    loop {
        let ping_tick = async {
            match ping_interval.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending().await,
            }
        };

        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_tick => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", peer_id);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + config.pong_timeout);
                debug!("Ping sent to {}", peer_id);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", peer_id);
                break;
            }

            Some(Control::Close) = control_rx.recv() => {
                warn!("Closing {}: outbound queue overflow", peer_id);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", peer_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        debug!("Client {} << {}", peer_id, text.as_str());
                        registry.relay_text(peer_id.clone(), text.as_str().to_owned()).await;
                    }
                    Message::Binary(data) => {
                        debug!("Client {} << {} bytes", peer_id, data.len());
                        registry.relay_binary(peer_id.clone(), data).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", peer_id);
                    }
                    Message::Close(_) => {
                        debug!("Close received from {}", peer_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    registry.unregister(peer_id.clone(), connection).await;
    handle.close_queue();

    let abort = send_task.abort_handle();
    if tokio::time::timeout(CLOSE_GRACE, send_task).await.is_err() {
        abort.abort();
    }
    info!("Client {} disconnected", peer_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_first_path_segment() {
        assert_eq!(peer_id_from_path("/alice"), "alice");
        assert_eq!(peer_id_from_path("/alice/extra/parts"), "alice");
        assert_eq!(peer_id_from_path("/"), "");
        assert_eq!(peer_id_from_path(""), "");
    }

    #[test]
    fn query_string_stays_in_peer_id() {
        assert_eq!(peer_id_from_path("/alice?token=1"), "alice?token=1");
        assert_eq!(peer_id_from_path("/alice/x?token=1"), "alice");
        assert_eq!(peer_id_from_path("/?token=1"), "?token=1");
    }
}
