//! OCPP 1.6 WebSocket transport
//!
//! Accepts charge-point connections at `ws[s]://<host>:<port>/ocpp/{charge_point_id}`.
//!
//! ```text
//! accept loop ──► [TLS] ──► upgrade (subprotocol, admission, identity)
//!                               │
//!                     SessionEvents::new_session
//!                               │
//!              ┌────────────────┴────────────────┐
//!        writer task                        reader task
//!   (mpsc ─► ws sink)          Call ─► InboundHandler ─► CallResult/CallError
//!                              CallResult/CallError ─► pending outbound call
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::features::FeatureRegistry;
use crate::application::ports::{
    ConfirmationFuture, OutboundCall, SessionEvents, SharedTransport, Transport,
    TransportConnector,
};
use crate::domain::{Action, FeatureSet, SessionHandle, SessionInfo};
use crate::shared::errors::{ServerError, TransportError};
use crate::shared::ocpp_frame::{CallErrorCode, OcppFrame};
use crate::shared::shutdown::ShutdownSignal;

use crate::application::admission::AdmissionGate;
use crate::application::security::TransportStartStrategy;

use super::inbound::{InboundContext, InboundHandler};
use super::security::RustlsSecurityBuilder;

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a closing connection may take to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Upper bound for the TLS handshake and for the HTTP upgrade, each.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingCall {
    action: Action,
    sender: oneshot::Sender<Result<Value, TransportError>>,
}

/// State shared between the transport handle and its connection tasks.
struct Shared {
    features: FeatureRegistry,
    connections: DashMap<SessionHandle, mpsc::UnboundedSender<Message>>,
    pending: DashMap<(SessionHandle, String), PendingCall>,
    inbound: Arc<dyn InboundHandler>,
    response_timeout: Duration,
    shutdown: ShutdownSignal,
    message_counter: AtomicU64,
}

impl Shared {
    fn next_message_id(&self) -> String {
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("CS-{}", id)
    }

    fn complete(&self, handle: SessionHandle, unique_id: &str, result: Result<Value, TransportError>) {
        let key = (handle, unique_id.to_string());
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                debug!(%handle, action = %pending.action, message_id = unique_id, "Confirmation matched");
                let _ = pending.sender.send(result);
            }
            None => warn!(%handle, message_id = unique_id, "Response for unknown request"),
        }
    }

    /// Fail every outstanding call of a connection that went away.
    fn fail_pending(&self, handle: SessionHandle) {
        let keys: Vec<_> = self
            .pending
            .iter()
            .filter(|entry| entry.key().0 == handle)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                let _ = pending.sender.send(Err(TransportError::NotConnected(handle)));
            }
        }
    }
}

/// Production [`Transport`] over tokio-tungstenite, optionally behind rustls.
pub struct WsTransport {
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    closed: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(
        tls: Option<TlsAcceptor>,
        response_timeout: Duration,
        inbound: Arc<dyn InboundHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                features: FeatureRegistry::new(),
                connections: DashMap::new(),
                pending: DashMap::new(),
                inbound,
                response_timeout,
                shutdown: ShutdownSignal::new(),
                message_counter: AtomicU64::new(1),
            }),
            tls,
            closed: AtomicBool::new(false),
            accept_task: Mutex::new(None),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn register_feature(&self, feature: FeatureSet) -> Result<(), TransportError> {
        self.shared.features.register(feature)
    }

    fn features(&self) -> Vec<FeatureSet> {
        self.shared.features.registered()
    }

    async fn open(
        &self,
        addr: SocketAddr,
        gate: AdmissionGate,
        events: Arc<dyn SessionEvents>,
    ) -> Result<SocketAddr, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.shared.features.is_listening() {
            return Err(TransportError::AlreadyListening);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        self.shared.features.mark_listening();

        let scheme = if self.tls.is_some() { "wss" } else { "ws" };
        info!(
            "OCPP 1.6 Central System listening on {}://{}",
            scheme, local_addr
        );
        info!(
            "   Charge points should connect to: {}://{}/ocpp/{{charge_point_id}}",
            scheme, local_addr
        );

        let accept = tokio::spawn(accept_loop(
            listener,
            self.shared.clone(),
            self.tls.clone(),
            gate,
            events,
        ));
        *self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(accept);

        Ok(local_addr)
    }

    fn send(
        &self,
        handle: SessionHandle,
        call: OutboundCall,
    ) -> Result<ConfirmationFuture, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.shared.features.check(call.action)?;

        let connection = self
            .shared
            .connections
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::NotConnected(handle))?;

        let action = call.action;
        let message_id = self.shared.next_message_id();
        let text = OcppFrame::call(message_id.clone(), action.name(), call.payload).to_text();

        let (tx, rx) = oneshot::channel();
        let key = (handle, message_id.clone());
        self.shared.pending.insert(
            key.clone(),
            PendingCall { action, sender: tx },
        );

        debug!(%handle, %action, message_id = message_id.as_str(), "Sending Call");
        if connection.send(Message::Text(text)).is_err() {
            self.shared.pending.remove(&key);
            return Err(TransportError::NotConnected(handle));
        }

        let shared = self.shared.clone();
        Ok(Box::pin(async move {
            match tokio::time::timeout(shared.response_timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(TransportError::NotConnected(handle)),
                Err(_) => {
                    shared.pending.remove(&key);
                    warn!(%handle, %action, message_id = message_id.as_str(), "Call timed out");
                    Err(TransportError::Timeout {
                        action,
                        secs: shared.response_timeout.as_secs(),
                    })
                }
            }
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let connected = self.shared.connections.len();
        info!(connected, "Closing OCPP transport");
        self.shared.shutdown.trigger();

        let accept = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(accept) = accept {
            let _ = accept.await;
        }

        // Connection tasks remove themselves; wait briefly for them.
        let deadline = tokio::time::Instant::now() + CLOSE_GRACE * 2;
        while !self.shared.connections.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!("OCPP transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    gate: AdmissionGate,
    events: Arc<dyn SessionEvents>,
) {
    let shutdown = shared.shutdown.notified();
    tokio::pin! {
        let stopped = shutdown.wait();
    }
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let shared = shared.clone();
                    let tls = tls.clone();
                    let gate = gate.clone();
                    let events = events.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, shared, tls, gate, events).await {
                            warn!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            _ = &mut stopped => {
                info!("WebSocket listener received shutdown signal");
                return;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    gate: AdmissionGate,
    events: Arc<dyn SessionEvents>,
) -> Result<(), TransportError> {
    debug!("New TCP connection from: {}", addr);
    match tls {
        Some(acceptor) => {
            let accept = async { acceptor.accept(stream).await.map_err(TransportError::from) };
            match handshake(&shared, accept).await? {
                Some(stream) => serve(stream, addr, shared, gate, events).await,
                None => {
                    debug!("Dropping {} during TLS handshake: transport closing", addr);
                    Ok(())
                }
            }
        }
        None => serve(stream, addr, shared, gate, events).await,
    }
}

/// Drive one handshake step. `None` when the transport closed first.
async fn handshake<T>(
    shared: &Shared,
    step: impl Future<Output = Result<T, TransportError>>,
) -> Result<Option<T>, TransportError> {
    let stopped = shared.shutdown.notified();
    tokio::select! {
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, step) => match result {
            Ok(done) => done.map(Some),
            Err(_) => Err(TransportError::HandshakeTimeout {
                secs: HANDSHAKE_TIMEOUT.as_secs(),
            }),
        },
        _ = stopped.wait() => Ok(None),
    }
}

/// Extract charge point ID from WebSocket request path.
/// Expected format: /ocpp/{charge_point_id} or /{charge_point_id}
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_start_matches('/');
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"OCPP\""),
    );
    response
}

async fn serve<S>(
    stream: S,
    addr: SocketAddr,
    shared: Arc<Shared>,
    gate: AdmissionGate,
    events: Arc<dyn SessionEvents>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut charge_point_id: Option<String> = None;

    let upgrade = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            debug!("WebSocket handshake from: {}, path: {}", addr, path);

            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            if let Err(rejected) = gate.admit_header(authorization) {
                warn!(%addr, path, reason = %rejected, "Connection rejected");
                return Err(unauthorized());
            }

            let requested_protocols = req
                .headers()
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            let supports_ocpp16 = requested_protocols
                .split(',')
                .map(|s| s.trim())
                .any(|p| p == OCPP_SUBPROTOCOL);

            if supports_ocpp16 {
                response.headers_mut().insert(
                    header::SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(OCPP_SUBPROTOCOL),
                );
            } else if !requested_protocols.is_empty() {
                warn!(
                    "Client does not support ocpp1.6, requested: {}",
                    requested_protocols
                );
            }

            charge_point_id = Some(
                extract_charge_point_id(path).unwrap_or_else(|| format!("CP_{}", addr.port())),
            );
            Ok(response)
        },
    );
    let upgraded = handshake(&shared, async {
        upgrade
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    })
    .await?;

    // Subscribe before the check so a close racing the insert is still seen.
    let shutdown = shared.shutdown.notified();
    let ws_stream = match upgraded {
        Some(ws_stream) if !shared.shutdown.is_triggered() => ws_stream,
        _ => {
            debug!("Dropping {} after upgrade: transport closing", addr);
            return Ok(());
        }
    };

    let identifier = charge_point_id.unwrap_or_else(|| format!("CP_{}", addr.port()));
    let handle = SessionHandle::new();
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    shared.connections.insert(handle, tx.clone());
    events.new_session(handle, SessionInfo::new(identifier.clone(), addr));

    // Outgoing message sender task
    let id_send = identifier.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Message::Text(ref text) = msg {
                debug!("[{}] -> {}", id_send, text);
            }
            if let Err(e) = ws_sender.send(msg).await {
                warn!("[{}] Send error: {}", id_send, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Incoming message receiver task
    let context = InboundContext {
        handle,
        identifier: identifier.clone(),
    };
    let recv_shared = shared.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!("[{}] <- {}", context.identifier, text);
                    if let Some(reply) = handle_text(&recv_shared, &context, &text).await {
                        if tx.send(Message::Text(reply)).is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!("[{}] Close frame received: {:?}", context.identifier, frame);
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!(
                        "[{}] Binary message received ({} bytes), ignoring",
                        context.identifier,
                        data.len()
                    );
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!("[{}] WebSocket error: {}", context.identifier, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {},
        _ = &mut recv_task => {},
        _ = shutdown.wait() => {
            info!("[{}] Connection closing due to server shutdown", identifier);
            if let Some(connection) = shared.connections.get(&handle) {
                let _ = connection.send(Message::Close(None));
            }
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut send_task).await;
        }
    }
    send_task.abort();
    recv_task.abort();

    shared.connections.remove(&handle);
    shared.fail_pending(handle);
    events.lost_session(handle);
    info!("[{}] Disconnected", identifier);

    Ok(())
}

/// Process one text frame; returns the reply to send, if any.
async fn handle_text(shared: &Shared, context: &InboundContext, text: &str) -> Option<String> {
    let frame = match OcppFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(identifier = %context.identifier, error = %e, "Dropping malformed frame");
            return None;
        }
    };

    match frame {
        OcppFrame::Call {
            unique_id,
            action,
            payload,
        } => {
            let reply = match route_call(shared, context, &action, payload).await {
                Ok(result) => OcppFrame::call_result(unique_id, result),
                Err((code, description)) => {
                    warn!(
                        identifier = %context.identifier,
                        action = action.as_str(),
                        code = code.as_str(),
                        description = description.as_str(),
                        "Replying with CallError"
                    );
                    OcppFrame::call_error(unique_id, code, description)
                }
            };
            Some(reply.to_text())
        }
        OcppFrame::CallResult { unique_id, payload } => {
            shared.complete(context.handle, &unique_id, Ok(payload));
            None
        }
        OcppFrame::CallError {
            unique_id,
            error_code,
            error_description,
            ..
        } => {
            shared.complete(
                context.handle,
                &unique_id,
                Err(TransportError::CallError {
                    code: error_code.as_str().to_string(),
                    description: error_description,
                }),
            );
            None
        }
    }
}

async fn route_call(
    shared: &Shared,
    context: &InboundContext,
    action: &str,
    payload: Value,
) -> Result<Value, (CallErrorCode, String)> {
    let Some(known) = Action::from_name(action) else {
        return Err((
            CallErrorCode::NotImplemented,
            format!("Unknown action {}", action),
        ));
    };
    if !known.direction().allows_inbound() {
        return Err((
            CallErrorCode::NotSupported,
            format!("{} is initiated by the central system", known),
        ));
    }
    if !shared.features.supports(known) {
        return Err((
            CallErrorCode::NotSupported,
            format!("Feature profile {} is not enabled", known.primary_feature()),
        ));
    }
    shared
        .inbound
        .handle(context, known, payload)
        .await
        .map_err(|e| (e.code(), e.to_string()))
}

/// Builds a [`WsTransport`] per server start, wrapping it in TLS when the
/// strategy asks for it.
pub struct WsConnector {
    response_timeout: Duration,
    inbound: Arc<dyn InboundHandler>,
}

impl WsConnector {
    pub fn new(response_timeout: Duration, inbound: Arc<dyn InboundHandler>) -> Self {
        Self {
            response_timeout,
            inbound,
        }
    }
}

impl TransportConnector for WsConnector {
    fn connect(&self, strategy: TransportStartStrategy) -> Result<SharedTransport, ServerError> {
        let tls = strategy
            .configure_security(RustlsSecurityBuilder::new())?
            .map(TlsAcceptor::from);
        Ok(Arc::new(WsTransport::new(
            tls,
            self.response_timeout,
            self.inbound.clone(),
        )))
    }
}
