//! OCPP Central System server lifecycle.
//!
//! [`OcppServer`] is a two-state machine, `Stopped ⇄ Running`. Starting
//! composes the feature profiles into a fresh transport, opens the listener
//! and installs the transport for the dispatcher. Stopping closes the
//! transport and clears the session registry.
//!
//! # Examples
//!
//! ```rust,no_run
//! use ocpp_central::config::AppConfig;
//! use ocpp_central::server::OcppServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = OcppServer::from_config(&AppConfig::default())?;
//!     server.start("0.0.0.0".parse()?, 8887).await?;
//!     // ... wait for shutdown signal ...
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::application::admission::AdmissionGate;
use crate::application::dispatch::{Dispatcher, PendingConfirmation, Target};
use crate::application::features::FeatureProfiles;
use crate::application::ports::{SharedTransport, TransportConnector, TransportSlot};
use crate::application::security::TransportStartStrategy;
use crate::application::session::{
    SessionEventSubscriber, SessionsListener, SharedSessionRegistry, SessionRegistry,
};
use crate::config::{AppConfig, LoggingConfig};
use crate::domain::{OcppRequest, SessionHandle, SessionInfo, SessionSnapshot};
use crate::interfaces::ws::inbound::DefaultInboundHandler;
use crate::interfaces::ws::websocket::WsConnector;
use crate::shared::errors::{DispatchError, ServerError};

struct RunningState {
    transport: SharedTransport,
    local_addr: SocketAddr,
}

/// Handle to the central system. Cheap to share behind an `Arc`.
pub struct OcppServer {
    lifecycle: Mutex<Option<RunningState>>,
    slot: TransportSlot,
    registry: SharedSessionRegistry,
    dispatcher: Dispatcher,
    connector: Arc<dyn TransportConnector>,
    profiles: FeatureProfiles,
    gate: AdmissionGate,
    strategy: TransportStartStrategy,
}

impl OcppServer {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        profiles: FeatureProfiles,
        gate: AdmissionGate,
        strategy: TransportStartStrategy,
    ) -> Self {
        let registry = SessionRegistry::shared();
        let slot = TransportSlot::new();
        let dispatcher = Dispatcher::new(registry.clone(), slot.clone());
        Self {
            lifecycle: Mutex::new(None),
            slot,
            registry,
            dispatcher,
            connector,
            profiles,
            gate,
            strategy,
        }
    }

    /// WebSocket transport with the default inbound handler, configured
    /// from `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        let inbound = Arc::new(DefaultInboundHandler::new(config.ocpp.heartbeat_interval));
        let connector = Arc::new(WsConnector::new(config.response_timeout(), inbound));
        Ok(Self::new(
            connector,
            config.feature_profiles()?,
            config.gate(),
            config.start_strategy()?,
        ))
    }

    /// Start listening on `ip:port`. Returns the bound address; a server
    /// that is already running keeps its listener and returns that address.
    pub async fn start(&self, ip: IpAddr, port: u16) -> Result<SocketAddr, ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(running) = lifecycle.as_ref() {
            if self.is_running() {
                warn!(addr = %running.local_addr, "Server is already running, start ignored");
                return Ok(running.local_addr);
            }
        }
        // left behind by a stop that timed out
        if let Some(stale) = lifecycle.take() {
            warn!(addr = %stale.local_addr, "Closing transport of an interrupted stop");
            stale.transport.close().await;
        }

        info!(
            scheme = self.strategy.scheme(),
            features = ?self.profiles.enabled(),
            "Starting OCPP Central System..."
        );
        let transport = self.connector.connect(self.strategy.clone())?;
        self.profiles.register_with(transport.as_ref())?;

        let local_addr = transport
            .open(
                SocketAddr::new(ip, port),
                self.gate.clone(),
                self.registry.clone(),
            )
            .await?;

        self.slot.install(transport.clone());
        *lifecycle = Some(RunningState {
            transport,
            local_addr,
        });
        info!(
            "🚀 OCPP Central System running on {}://{}",
            self.strategy.scheme(),
            local_addr
        );
        Ok(local_addr)
    }

    /// Close the transport and drop every session.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.take() else {
            warn!("Server is not running, stop ignored");
            return;
        };

        info!("🛑 Shutting down OCPP Central System...");
        self.slot.take();
        running.transport.close().await;
        let removed = self.registry.clear();
        info!(removed, "👋 OCPP Central System stopped");
    }

    /// Like [`stop`](Self::stop), bounded by `timeout`. On timeout the
    /// server is left stopped and the transport finishes closing in the
    /// background.
    pub async fn stop_within(&self, timeout: Duration) {
        if tokio::time::timeout(timeout, self.stop()).await.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "Shutdown timed out");
            self.slot.take();
            if let Ok(mut lifecycle) = self.lifecycle.try_lock() {
                if let Some(stale) = lifecycle.take() {
                    tokio::spawn(async move { stale.transport.close().await });
                }
            }
            self.registry.clear();
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    pub fn session_list(&self) -> SessionSnapshot {
        self.registry.snapshot()
    }

    pub fn session_information(&self, handle: &SessionHandle) -> Option<SessionInfo> {
        self.registry.get(handle)
    }

    /// Replace the single registry listener. `None` removes it.
    pub fn set_sessions_listener(&self, listener: Option<Arc<dyn SessionsListener>>) {
        self.registry.set_listener(listener);
    }

    pub fn subscribe(&self) -> SessionEventSubscriber {
        self.registry.subscribe()
    }

    pub fn registry(&self) -> &SharedSessionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn profiles(&self) -> &FeatureProfiles {
        &self.profiles
    }

    // ── Dispatch shortcuts ─────────────────────────────────────

    pub fn send<R: OcppRequest>(&self, request: &R, target: Target) -> PendingConfirmation {
        self.dispatcher.send(request, target)
    }

    pub fn send_to_identifier<R: OcppRequest>(
        &self,
        request: &R,
        identifier: &str,
    ) -> PendingConfirmation {
        self.dispatcher.send_to_identifier(request, identifier)
    }

    pub fn send_to_only<R: OcppRequest>(&self, request: &R) -> PendingConfirmation {
        self.dispatcher.send_to_only(request)
    }

    pub fn send_to_first_client<R: OcppRequest>(&self, request: &R) -> PendingConfirmation {
        self.dispatcher.send_to_first_client(request)
    }

    pub fn send_to_all<R: OcppRequest>(
        &self,
        request: &R,
    ) -> Result<std::collections::HashMap<SessionHandle, PendingConfirmation>, DispatchError> {
        self.dispatcher.send_to_all(request)
    }
}

/// Initialize tracing (logging) from the `[logging]` section.
///
/// Call this once at process startup. `RUST_LOG` overrides the level.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    match config.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
