//! WebSocket upgrade handler for real-time account connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Upgrade to WebSocket
//! 2. Register with the ConnectionManager (welcome message)
//! 3. Report current terminal liveness
//! 4. Receive client frames until disconnect, probing idle peers
//! 5. Remove the connection

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{AccountSource, ClientTransport, TransportError};

use super::connections::{ClientInfo, ConnectionManager};
use super::messages::ServerMessage;

/// Longest wait for a client frame before checking liveness.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle time after which the server sends a ping.
const PING_AFTER: Duration = Duration::from_secs(20);

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    /// Owner of every live connection.
    pub connections: Arc<ConnectionManager>,

    /// Terminal whose liveness is reported on connect.
    pub source: Option<Arc<dyn AccountSource>>,
}

impl WebSocketState {
    /// Create a new WebSocket state.
    pub fn new(connections: Arc<ConnectionManager>, source: Option<Arc<dyn AccountSource>>) -> Self {
        Self { connections, source }
    }
}

/// Write half of an axum WebSocket.
pub struct WsTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    closed: AtomicBool,
}

impl WsTransport {
    fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    async fn write(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl ClientTransport for WsTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.write(Message::Text(text)).await
    }

    async fn send_ping(&self) -> Result<(), TransportError> {
        self.write(Message::Ping(Vec::new())).await
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WebSocketState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let client_info = ClientInfo {
        remote_addr: connect_info.map(|ConnectInfo(addr)| addr.to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, client_info))
}

/// Handle an established WebSocket connection.
///
/// Runs for the lifetime of the connection.
async fn handle_socket(socket: WebSocket, state: WebSocketState, client_info: ClientInfo) {
    let (sink, mut receiver) = socket.split();
    let transport = Arc::new(WsTransport::new(sink));
    let connections = state.connections.clone();

    let id = connections.accept(transport.clone(), client_info).await;

    if let Some(source) = &state.source {
        let connected = source.is_connected().await;
        let status = ServerMessage::connection_status(connected, "Connected to WebSocket");
        connections.send(id, &status).await;
    }

    let mut last_pong = Instant::now();

    while connections.is_connected(id) {
        let frame = match tokio::time::timeout(RECEIVE_TIMEOUT, receiver.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                if last_pong.elapsed() > PING_AFTER {
                    if let Err(e) = transport.send_ping().await {
                        tracing::debug!(connection_id = %id, error = %e, "Ping failed");
                        break;
                    }
                    last_pong = Instant::now();
                }
                continue;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if text.trim() == "pong" {
                    last_pong = Instant::now();
                    connections.touch(id);
                    continue;
                }
                // Errors are logged by the manager; the connection stays open.
                let _ = connections.handle_inbound(id, &text).await;
            }
            Some(Ok(Message::Pong(_))) => {
                last_pong = Instant::now();
                connections.touch(id);
            }
            Some(Ok(Message::Ping(_))) => {
                // WebSocket protocol ping - answered automatically by axum
            }
            Some(Ok(Message::Binary(_))) => {
                tracing::warn!(connection_id = %id, "Received unsupported binary message");
            }
            Some(Ok(Message::Close(_))) => {
                tracing::debug!(connection_id = %id, "Client sent close frame");
                break;
            }
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Receive error");
                break;
            }
            None => break,
        }
    }

    connections.disconnect(id, "Connection closed").await;
}

/// Create axum router for the WebSocket endpoint.
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/ws", get(ws_handler))
}
