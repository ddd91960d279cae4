//! Connection handlers for Murmur server.
//!
//! Each WebSocket connection runs one task that owns its [`Session`] and
//! three hub receivers (public topic, users topic, and once registered, the
//! private queue). The router is called synchronously from that task, so
//! events from one connection are applied in the order they arrive.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use murmur_core::{
    ConnectionId, DeliveryGateway, Hub, Identity, InboundEvent, MessageRouter, Outbound,
    PresenceRegistry, Session, SessionBinding, Topic,
};
use murmur_protocol::{codec, destinations, error_codes, ClientFrame, Encoding, ServerFrame};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: MessageRouter,
    /// Delivery hub the router publishes to.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
    active_connections: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let hub = Arc::new(Hub::with_capacity(config.router.channel_capacity));
        let gateway: Arc<dyn DeliveryGateway> = hub.clone();
        let router = MessageRouter::new(
            Arc::new(PresenceRegistry::new()),
            Arc::new(SessionBinding::new()),
            gateway,
            config.router_config(),
        );

        Self {
            router,
            hub,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<AppState>) -> Option<Self> {
        let max = state.config.limits.max_connections;
        state
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                state: Arc::clone(state),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Build the HTTP/WebSocket application.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/users", get(users_handler))
        .with_state(state)
}

/// Serve the application on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Run the HTTP/WebSocket server until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Murmur server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    let state = Arc::new(AppState::new(config));
    serve(listener, state, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.active_connections(),
        "online": state.router.presence().len(),
    }))
}

/// Current presence snapshot.
async fn users_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.presence().snapshot())
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            max = state.config.limits.max_connections,
            "Connection limit reached"
        );
        metrics::record_rejected();
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
        .into_response()
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: ConnectionSlot) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let id = ConnectionId::generate();
    debug!(connection = %id, "WebSocket connected");

    // Subscribe before announcing the connection so nothing published after
    // the client sees `connected` is missed.
    let public = state.hub.subscribe(Topic::Public);
    let users = state.hub.subscribe(Topic::Users);

    let (sender, receiver) = socket.split();
    let mut connection = Connection {
        state,
        session: Session::new(id),
        sender,
        encoding: Encoding::default(),
        read_buffer: BytesMut::with_capacity(4096),
        private: None,
    };

    let heartbeat =
        u32::try_from(connection.state.config.heartbeat.interval_ms).unwrap_or(u32::MAX);
    let connected = ServerFrame::connected(connection.session.id().as_str(), heartbeat);
    if let Err(e) = connection.send_frame(&connected).await {
        error!(connection = %connection.session.id(), error = %e, "Failed to send Connected frame");
        connection.finish().await;
        return;
    }

    connection.run(receiver, public, users).await;
    connection.finish().await;
}

/// Whether the receive loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Receiver on the private queue of the identity this connection registered.
struct PrivateInbox {
    identity: Identity,
    receiver: broadcast::Receiver<Outbound>,
}

struct Connection {
    state: Arc<AppState>,
    session: Session,
    sender: SplitSink<WebSocket, WsMessage>,
    /// Encoding of the most recent inbound frame; replies use it too.
    encoding: Encoding,
    /// Buffer for partial binary frames.
    read_buffer: BytesMut,
    private: Option<PrivateInbox>,
}

impl Connection {
    async fn run(
        &mut self,
        mut receiver: futures_util::stream::SplitStream<WebSocket>,
        mut public: broadcast::Receiver<Outbound>,
        mut users: broadcast::Receiver<Outbound>,
    ) {
        let timeout = Duration::from_millis(self.state.config.heartbeat.timeout_ms);
        let idle = tokio::time::sleep(timeout);
        tokio::pin!(idle);

        loop {
            let flow = tokio::select! {
                biased;

                // Inbound first: a busy topic must not delay this client's
                // own frames past the idle deadline.
                msg = receiver.next() => {
                    idle.as_mut().reset(Instant::now() + timeout);
                    self.on_socket_message(msg).await
                }

                result = public.recv() => self.forward(result, destinations::PUBLIC).await,

                result = users.recv() => self.forward(result, destinations::USERS).await,

                result = recv_private(&mut self.private) => {
                    self.forward(result, destinations::PRIVATE_QUEUE).await
                }

                () = &mut idle => {
                    debug!(connection = %self.session.id(), "Idle timeout");
                    Ok(Flow::Close)
                }
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => break,
                Err(e) => {
                    debug!(connection = %self.session.id(), error = %e, "Closing connection");
                    break;
                }
            }
        }
    }

    /// Forward a hub delivery to the socket.
    async fn forward(
        &mut self,
        result: Result<Outbound, RecvError>,
        destination: &str,
    ) -> Result<Flow> {
        match result {
            Ok(payload) => {
                self.send_frame(&payload.to_frame(destination)).await?;
                Ok(Flow::Continue)
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    connection = %self.session.id(),
                    destination,
                    skipped,
                    "Receiver lagged, deliveries dropped"
                );
                Ok(Flow::Continue)
            }
            Err(RecvError::Closed) => Ok(Flow::Close),
        }
    }

    async fn on_socket_message(
        &mut self,
        msg: Option<Result<WsMessage, axum::Error>>,
    ) -> Result<Flow> {
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                let start = std::time::Instant::now();
                metrics::record_frame(text.len(), "inbound");
                self.encoding = Encoding::Json;

                let flow = match codec::decode_json::<ClientFrame>(&text) {
                    Ok(frame) => self.dispatch(frame).await?,
                    Err(e) => self.reject_malformed(&e).await?,
                };
                metrics::record_latency(start.elapsed().as_secs_f64());
                Ok(flow)
            }
            Some(Ok(WsMessage::Binary(data))) => {
                let start = std::time::Instant::now();
                metrics::record_frame(data.len(), "inbound");
                self.encoding = Encoding::MessagePack;
                self.read_buffer.extend_from_slice(&data);

                loop {
                    match codec::decode_from::<ClientFrame>(&mut self.read_buffer) {
                        Ok(Some(frame)) => {
                            if self.dispatch(frame).await? == Flow::Close {
                                return Ok(Flow::Close);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            // Cannot resynchronize inside a corrupt stream.
                            self.read_buffer.clear();
                            self.reject_malformed(&e).await?;
                            break;
                        }
                    }
                }

                metrics::record_latency(start.elapsed().as_secs_f64());
                Ok(Flow::Continue)
            }
            // Pongs to our pings are sent by axum automatically
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => Ok(Flow::Continue),
            Some(Ok(WsMessage::Close(_))) => {
                debug!(connection = %self.session.id(), "Received close frame");
                Ok(Flow::Close)
            }
            Some(Err(e)) => {
                warn!(connection = %self.session.id(), error = %e, "WebSocket error");
                metrics::record_error("websocket");
                Ok(Flow::Close)
            }
            None => {
                debug!(connection = %self.session.id(), "WebSocket stream ended");
                Ok(Flow::Close)
            }
        }
    }

    /// Handle a decoded client frame.
    async fn dispatch(&mut self, frame: ClientFrame) -> Result<Flow> {
        let frame_type = frame.frame_type();
        trace!(connection = %self.session.id(), frame_type = %frame_type, "Inbound frame");

        if let ClientFrame::Ping { timestamp } = frame {
            metrics::record_event(frame_type);
            self.send_frame(&ServerFrame::pong(timestamp)).await?;
            return Ok(Flow::Continue);
        }

        let Some(event) = InboundEvent::from_frame(frame) else {
            return Ok(Flow::Continue);
        };

        // The private queue must exist before the join is announced, or a
        // reply sent in response to the announcement could be dropped.
        let mut opened_inbox = false;
        if let InboundEvent::Register { sender } = &event {
            if self.private.is_none() && self.session.identity().is_none() {
                self.private = Some(PrivateInbox {
                    identity: sender.clone(),
                    receiver: self.state.hub.subscribe_private(sender),
                });
                opened_inbox = true;
            }
        }
        let leaving = matches!(event, InboundEvent::Leave { .. });

        match self.state.router.handle(&mut self.session, event) {
            Ok(plan) => {
                metrics::record_event(frame_type);
                metrics::set_users_online(self.state.router.presence().len());
                trace!(connection = %self.session.id(), deliveries = plan.len(), "Event routed");

                if leaving {
                    debug!(connection = %self.session.id(), "Left the chat");
                    return Ok(Flow::Close);
                }
                Ok(Flow::Continue)
            }
            Err(e) => {
                if opened_inbox {
                    self.close_private();
                }
                warn!(connection = %self.session.id(), frame_type = %frame_type, error = %e, "Event rejected");
                metrics::record_router_error(e.kind());
                self.send_frame(&ServerFrame::error(e.code(), e.to_string()))
                    .await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn reject_malformed(&mut self, error: &codec::CodecError) -> Result<Flow> {
        debug!(connection = %self.session.id(), error = %error, "Malformed frame");
        metrics::record_error("malformed_frame");
        self.send_frame(&ServerFrame::error(
            error_codes::MALFORMED_FRAME,
            format!("Malformed frame: {error}"),
        ))
        .await?;
        Ok(Flow::Continue)
    }

    /// Send a frame in the connection's current encoding.
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<()> {
        let message = match self.encoding {
            Encoding::Json => WsMessage::Text(codec::encode_json(frame)?),
            Encoding::MessagePack => WsMessage::Binary(codec::encode(frame)?.to_vec()),
        };
        let len = match &message {
            WsMessage::Text(text) => text.len(),
            WsMessage::Binary(data) => data.len(),
            _ => 0,
        };

        self.sender
            .send(message)
            .await
            .context("WebSocket send failed")?;
        metrics::record_frame(len, "outbound");
        trace!(connection = %self.session.id(), frame_type = %frame.frame_type(), len, "Sent frame");
        Ok(())
    }

    fn close_private(&mut self) {
        if let Some(inbox) = self.private.take() {
            let PrivateInbox { identity, receiver } = inbox;
            drop(receiver);
            self.state.hub.release_private(&identity);
        }
    }

    /// Run the disconnect path and release per-connection resources.
    async fn finish(mut self) {
        let plan = self.state.router.disconnect(&mut self.session);
        if !plan.is_empty() {
            metrics::set_users_online(self.state.router.presence().len());
        }
        self.close_private();
        let _ = self.sender.close().await;

        debug!(connection = %self.session.id(), "WebSocket disconnected");
    }
}

async fn recv_private(inbox: &mut Option<PrivateInbox>) -> Result<Outbound, RecvError> {
    match inbox {
        Some(inbox) => inbox.receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_limit(max_connections: usize) -> Arc<AppState> {
        let mut config = Config::default();
        config.limits.max_connections = max_connections;
        config.metrics.enabled = false;
        Arc::new(AppState::new(config))
    }

    #[test]
    fn test_connection_slots_are_bounded() {
        let state = state_with_limit(2);

        let a = ConnectionSlot::acquire(&state).unwrap();
        let _b = ConnectionSlot::acquire(&state).unwrap();
        assert!(ConnectionSlot::acquire(&state).is_none());
        assert_eq!(state.active_connections(), 2);

        drop(a);
        assert_eq!(state.active_connections(), 1);
        assert!(ConnectionSlot::acquire(&state).is_some());
    }

    #[test]
    fn test_state_wires_router_to_hub() {
        let state = state_with_limit(10);
        let mut rx = state.hub.subscribe(Topic::Public);

        let mut session = Session::new(ConnectionId::new("conn-1"));
        state
            .router
            .handle(
                &mut session,
                InboundEvent::Register {
                    sender: "alice".into(),
                },
            )
            .unwrap();

        let delivered = rx.try_recv().unwrap();
        assert_eq!(
            delivered.as_chat().unwrap().content,
            "alice joined the chat!"
        );
        assert!(state.router.presence().contains("alice"));
    }

    #[tokio::test]
    async fn test_recv_private_without_inbox_stays_pending() {
        let mut inbox = None;
        let result =
            tokio::time::timeout(Duration::from_millis(20), recv_private(&mut inbox)).await;
        assert!(result.is_err());
    }
}
