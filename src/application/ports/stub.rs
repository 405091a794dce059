//! In-memory transport for dispatch and lifecycle tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::json;

use crate::application::admission::AdmissionGate;
use crate::application::features::FeatureRegistry;
use crate::application::security::TransportStartStrategy;
use crate::domain::{Action, FeatureSet, SessionHandle, SessionInfo};
use crate::shared::errors::{ServerError, TransportError};

use super::{ConfirmationFuture, OutboundCall, SessionEvents, SharedTransport, Transport, TransportConnector};

/// Accepts every call from a connected handle with `{"status": "Accepted"}`.
#[derive(Default)]
pub struct StubTransport {
    pub features: FeatureRegistry,
    connected: DashSet<SessionHandle>,
    sent: DashMap<SessionHandle, Vec<Action>>,
    events: Mutex<Option<Arc<dyn SessionEvents>>>,
    opened: AtomicUsize,
    closed: AtomicBool,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a handle as having a live socket, without lifecycle events.
    pub fn connect(&self, handle: SessionHandle) {
        self.connected.insert(handle);
    }

    /// Socket gone, lifecycle event not yet delivered.
    pub fn drop_connection(&self, handle: SessionHandle) {
        self.connected.remove(&handle);
    }

    /// Accept a charge point the way a listening transport would.
    pub fn admit(&self, identifier: &str, address: SocketAddr) -> SessionHandle {
        let handle = SessionHandle::new();
        self.connected.insert(handle);
        if let Some(events) = self.events() {
            events.new_session(handle, SessionInfo::new(identifier, address));
        }
        handle
    }

    pub fn hang_up(&self, handle: SessionHandle) {
        self.connected.remove(&handle);
        if let Some(events) = self.events() {
            events.lost_session(handle);
        }
    }

    pub fn sent(&self, handle: SessionHandle) -> Vec<Action> {
        self.sent
            .get(&handle)
            .map(|actions| actions.clone())
            .unwrap_or_default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn events(&self) -> Option<Arc<dyn SessionEvents>> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn register_feature(&self, feature: FeatureSet) -> Result<(), TransportError> {
        self.features.register(feature)
    }

    fn features(&self) -> Vec<FeatureSet> {
        self.features.registered()
    }

    async fn open(
        &self,
        addr: SocketAddr,
        _gate: AdmissionGate,
        events: Arc<dyn SessionEvents>,
    ) -> Result<SocketAddr, TransportError> {
        self.features.mark_listening();
        *self.events.lock().unwrap() = Some(events);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(addr)
    }

    fn send(
        &self,
        handle: SessionHandle,
        call: OutboundCall,
    ) -> Result<ConfirmationFuture, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.features.check(call.action)?;
        if !self.connected.contains(&handle) {
            return Err(TransportError::NotConnected(handle));
        }
        self.sent.entry(handle).or_default().push(call.action);
        Ok(Box::pin(async { Ok(json!({"status": "Accepted"})) }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.connected.iter().map(|h| *h).collect();
        for handle in handles {
            self.hang_up(handle);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out a fresh [`StubTransport`] per start and remembers each strategy.
#[derive(Default)]
pub struct StubConnector {
    pub strategies: Mutex<Vec<TransportStartStrategy>>,
    pub transports: Mutex<Vec<Arc<StubTransport>>>,
}

impl StubConnector {
    pub fn last(&self) -> Option<Arc<StubTransport>> {
        self.transports.lock().unwrap().last().cloned()
    }
}

impl TransportConnector for StubConnector {
    fn connect(&self, strategy: TransportStartStrategy) -> Result<SharedTransport, ServerError> {
        let transport = Arc::new(StubTransport::new());
        self.strategies.lock().unwrap().push(strategy);
        self.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}
