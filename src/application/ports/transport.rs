//! Transport port: the contract between the session/dispatch core and the
//! connection layer that speaks OCPP-J on the wire.
//!
//! ```text
//! OcppServer ──connect(strategy)──► TransportConnector
//!      │                                  │
//!      │                            Arc<dyn Transport>
//!      ▼                                  │
//! Dispatcher ──send(handle, call)────────►│──► [2, id, action, payload]
//!      ▲                                  │
//! SessionRegistry ◄──new_session / lost_session (SessionEvents)
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::application::admission::AdmissionGate;
use crate::application::security::TransportStartStrategy;
use crate::domain::{Action, FeatureSet, SessionHandle, SessionInfo};
use crate::shared::errors::{ServerError, TransportError};

/// Completes with the CallResult payload, or the transport's view of why
/// there is none (CallError, timeout, disconnect).
pub type ConfirmationFuture = BoxFuture<'static, Result<Value, TransportError>>;

/// Lifecycle callbacks a transport emits while listening.
pub trait SessionEvents: Send + Sync {
    /// Called once per admitted connection, after the upgrade completed.
    fn new_session(&self, handle: SessionHandle, info: SessionInfo);

    /// Called once per connection when it goes away for any reason.
    fn lost_session(&self, handle: SessionHandle);
}

/// A request ready to be framed as a Call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub action: Action,
    pub payload: Value,
}

impl OutboundCall {
    /// Rejects actions that only charge points may initiate and payloads
    /// that are not JSON objects.
    pub fn new(action: Action, payload: Value) -> Result<Self, TransportError> {
        if !action.direction().allows_outbound() {
            return Err(TransportError::ProtocolConstraint(format!(
                "{} is initiated by the charge point",
                action
            )));
        }
        if !payload.is_object() {
            return Err(TransportError::ProtocolConstraint(format!(
                "{} payload must be a JSON object",
                action
            )));
        }
        Ok(Self { action, payload })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Enable a feature profile. Only valid before [`Transport::open`].
    fn register_feature(&self, feature: FeatureSet) -> Result<(), TransportError>;

    /// Profiles registered so far, in canonical order.
    fn features(&self) -> Vec<FeatureSet>;

    /// Bind and start accepting connections. Returns the bound address.
    async fn open(
        &self,
        addr: SocketAddr,
        gate: AdmissionGate,
        events: Arc<dyn SessionEvents>,
    ) -> Result<SocketAddr, TransportError>;

    /// Frame and write a Call. Errors here mean nothing was written.
    fn send(
        &self,
        handle: SessionHandle,
        call: OutboundCall,
    ) -> Result<ConfirmationFuture, TransportError>;

    /// Stop accepting, drop every connection, fail outstanding calls.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

pub type SharedTransport = Arc<dyn Transport>;

/// The running transport, if any. Written by the server lifecycle, read on
/// every dispatch.
#[derive(Clone, Default)]
pub struct TransportSlot(Arc<RwLock<Option<SharedTransport>>>);

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SharedTransport> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn install(&self, transport: SharedTransport) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(transport);
    }

    pub fn take(&self) -> Option<SharedTransport> {
        self.0.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Builds a fresh transport for each server start.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, strategy: TransportStartStrategy) -> Result<SharedTransport, ServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_call_rejects_inbound_only_action() {
        let err = OutboundCall::new(Action::Heartbeat, json!({})).unwrap_err();
        assert!(matches!(err, TransportError::ProtocolConstraint(_)));
    }

    #[test]
    fn outbound_call_requires_object_payload() {
        assert!(OutboundCall::new(Action::Reset, json!([1, 2])).is_err());
        assert!(OutboundCall::new(Action::Reset, json!({"type": "Hard"})).is_ok());
        assert!(OutboundCall::new(Action::DataTransfer, json!({"vendorId": "x"})).is_ok());
    }
}
