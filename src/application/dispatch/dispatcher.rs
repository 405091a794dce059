//! Dispatcher: resolves a target to a live session and sends one request.
//!
//! Every `send*` returns immediately. The wait for the confirmation runs in
//! a spawned task that records metrics, logs the outcome and completes the
//! returned [`PendingConfirmation`].

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::ports::{OutboundCall, TransportSlot};
use crate::application::session::SharedSessionRegistry;
use crate::domain::{Action, OcppRequest, SessionHandle};
use crate::shared::errors::DispatchError;

use super::pending::PendingConfirmation;

/// Who a request is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Handle(SessionHandle),
    /// Display token `"<identifier> (<address>)"`.
    Token(String),
    /// Charge point identity from the connection URL.
    Identifier(String),
    /// The one connected session; fails unless exactly one is connected.
    OnlySession,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "handle {}", handle),
            Self::Token(token) => write!(f, "token '{}'", token),
            Self::Identifier(identifier) => write!(f, "identifier '{}'", identifier),
            Self::OnlySession => f.write_str("only session"),
        }
    }
}

impl From<SessionHandle> for Target {
    fn from(handle: SessionHandle) -> Self {
        Self::Handle(handle)
    }
}

fn record_request(action: Action, outcome: &'static str, start: Instant) {
    let action = action.name();
    metrics::histogram!("ocpp_request_latency_seconds", "action" => action)
        .record(start.elapsed().as_secs_f64());
    metrics::counter!("ocpp_requests_total", "action" => action, "outcome" => outcome)
        .increment(1);
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedSessionRegistry,
    transport: TransportSlot,
}

impl Dispatcher {
    pub fn new(registry: SharedSessionRegistry, transport: TransportSlot) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn resolve(&self, target: &Target) -> Result<SessionHandle, DispatchError> {
        match target {
            Target::Handle(handle) => {
                if self.registry.contains(handle) {
                    Ok(*handle)
                } else {
                    Err(DispatchError::NotFound(handle.to_string()))
                }
            }
            Target::Token(token) => Ok(self.registry.resolve(token)?),
            Target::Identifier(identifier) => {
                Ok(self.registry.resolve_by_identifier(identifier)?)
            }
            Target::OnlySession => {
                let handles = self.registry.handles();
                match handles.as_slice() {
                    [handle] => Ok(*handle),
                    _ => Err(DispatchError::SingleSessionRequired {
                        connected: handles.len(),
                    }),
                }
            }
        }
    }

    pub fn send<R: OcppRequest>(&self, request: &R, target: Target) -> PendingConfirmation {
        let action = request.action();
        if self.transport.current().is_none() {
            warn!(%action, %target, "Send while server is stopped");
            return PendingConfirmation::failed(None, action, DispatchError::NotRunning);
        }
        match self.resolve(&target) {
            Ok(handle) => self.send_resolved(request, handle),
            Err(e) => {
                warn!(%action, %target, request = ?request, error = %e, "Could not resolve target");
                PendingConfirmation::failed(None, action, e)
            }
        }
    }

    pub fn send_to_identifier<R: OcppRequest>(
        &self,
        request: &R,
        identifier: &str,
    ) -> PendingConfirmation {
        self.send(request, Target::Identifier(identifier.to_string()))
    }

    pub fn send_to_only<R: OcppRequest>(&self, request: &R) -> PendingConfirmation {
        self.send(request, Target::OnlySession)
    }

    /// Send to the longest-connected session.
    pub fn send_to_first_client<R: OcppRequest>(&self, request: &R) -> PendingConfirmation {
        let action = request.action();
        if self.transport.current().is_none() {
            return PendingConfirmation::failed(None, action, DispatchError::NotRunning);
        }
        match self.registry.oldest() {
            Some((handle, _)) => self.send_resolved(request, handle),
            None => {
                warn!(%action, "No connected session for first-client send");
                PendingConfirmation::failed(
                    None,
                    action,
                    DispatchError::NotFound("first connected session".into()),
                )
            }
        }
    }

    /// One independent send per connected session. Nothing is awaited here;
    /// see [`join_all`](super::join_all).
    pub fn send_to_all<R: OcppRequest>(
        &self,
        request: &R,
    ) -> Result<HashMap<SessionHandle, PendingConfirmation>, DispatchError> {
        if self.transport.current().is_none() {
            warn!(action = %request.action(), "Broadcast while server is stopped");
            return Err(DispatchError::NotRunning);
        }
        let handles = self.registry.handles();
        info!(action = %request.action(), sessions = handles.len(), "Broadcasting request");
        Ok(handles
            .into_iter()
            .map(|handle| (handle, self.send_resolved(request, handle)))
            .collect())
    }

    /// Send and await the typed confirmation.
    pub async fn call<R: OcppRequest>(
        &self,
        request: &R,
        target: Target,
    ) -> Result<R::Confirmation, DispatchError> {
        self.send(request, target).into_typed().await
    }

    fn send_resolved<R: OcppRequest>(&self, request: &R, handle: SessionHandle) -> PendingConfirmation {
        let action = request.action();
        let fail = |error: DispatchError| PendingConfirmation::failed(Some(handle), action, error);

        let Some(transport) = self.transport.current() else {
            return fail(DispatchError::NotRunning);
        };

        let payload: Value = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%handle, %action, request = ?request, error = %e, "Request serialization failed");
                return fail(DispatchError::Serialization(e.to_string()));
            }
        };
        let identifier = self
            .registry
            .get(&handle)
            .map(|info| info.identifier)
            .unwrap_or_default();

        info!(%handle, identifier = %identifier, %action, request = %payload, "Sending request");

        let call = match OutboundCall::new(action, payload.clone()) {
            Ok(call) => call,
            Err(e) => {
                warn!(%handle, identifier = %identifier, %action, request = %payload, error = %e, "Request refused");
                return fail(e.into());
            }
        };

        let confirmation = match transport.send(handle, call) {
            Ok(confirmation) => confirmation,
            Err(e) => {
                warn!(%handle, identifier = %identifier, %action, request = %payload, error = %e, "Transport refused request");
                record_request(action, "refused", Instant::now());
                return fail(e.into());
            }
        };

        let (sender, pending) = PendingConfirmation::channel(handle, action);
        let start = Instant::now();
        tokio::spawn(async move {
            let result = confirmation.await.map_err(DispatchError::from);
            match &result {
                Ok(response) => {
                    record_request(action, "confirmed", start);
                    info!(%handle, identifier = %identifier, %action, response = %response, "Confirmation received");
                }
                Err(e) => {
                    record_request(action, "failed", start);
                    warn!(%handle, identifier = %identifier, %action, request = %payload, error = %e, "Request failed");
                }
            }
            if sender.send(result).is_err() {
                debug!(%handle, %action, "Confirmation dropped by caller");
            }
        });
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
    use rust_ocpp::v1_6::messages::update_firmware::UpdateFirmwareRequest;
    use serde_json::json;

    use crate::application::dispatch::join_all;
    use crate::application::ports::stub::StubTransport;
    use crate::application::session::SessionRegistry;
    use crate::domain::{FeatureSet, RawRequest, SessionInfo};

    struct Fixture {
        registry: SharedSessionRegistry,
        transport: Arc<StubTransport>,
        dispatcher: Dispatcher,
    }

    fn fixture(features: &[FeatureSet]) -> Fixture {
        let registry = SessionRegistry::shared();
        let transport = Arc::new(StubTransport::new());
        for feature in features {
            transport.features.register(*feature).unwrap();
        }
        let slot = TransportSlot::new();
        slot.install(transport.clone());
        Fixture {
            dispatcher: Dispatcher::new(registry.clone(), slot),
            registry,
            transport,
        }
    }

    impl Fixture {
        fn connect(&self, identifier: &str, port: u16) -> SessionHandle {
            let handle = SessionHandle::new();
            let info = SessionInfo::new(identifier, ([127, 0, 0, 1], port).into());
            self.transport.connect(handle);
            self.registry.on_connected(handle, info).unwrap();
            handle
        }
    }

    fn update_firmware() -> UpdateFirmwareRequest {
        UpdateFirmwareRequest {
            location: "https://fw.example/1.2.bin".into(),
            retries: None,
            retrieve_date: chrono::Utc::now(),
            retry_interval: None,
        }
    }

    #[tokio::test]
    async fn handle_target_round_trip() {
        let fx = fixture(&[FeatureSet::Core]);
        let handle = fx.connect("CP1", 1);

        let response: ClearCacheResponse = fx
            .dispatcher
            .call(&ClearCacheRequest {}, Target::Handle(handle))
            .await
            .unwrap();
        assert_eq!(format!("{:?}", response.status), "Accepted");
        assert_eq!(fx.transport.sent(handle), vec![Action::ClearCache]);
    }

    #[tokio::test]
    async fn token_and_identifier_targets() {
        let fx = fixture(&[FeatureSet::Core]);
        let handle = fx.connect("CP1", 4000);
        let token = fx.registry.get(&handle).unwrap().token().to_string();

        let pending = fx.dispatcher.send(&ClearCacheRequest {}, Target::Token(token));
        assert_eq!(pending.handle(), Some(handle));
        assert!(pending.await.is_ok());

        assert!(fx
            .dispatcher
            .send_to_identifier(&ClearCacheRequest {}, "/CP1")
            .await
            .is_ok());
        assert!(matches!(
            fx.dispatcher
                .send_to_identifier(&ClearCacheRequest {}, "CP2")
                .await,
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn only_session_requires_exactly_one() {
        let fx = fixture(&[FeatureSet::Core]);
        assert_eq!(
            fx.dispatcher.send_to_only(&ClearCacheRequest {}).await,
            Err(DispatchError::SingleSessionRequired { connected: 0 })
        );

        let handle = fx.connect("CP1", 1);
        let pending = fx.dispatcher.send_to_only(&ClearCacheRequest {});
        assert_eq!(pending.handle(), Some(handle));
        assert!(pending.await.is_ok());

        fx.connect("CP2", 2);
        assert_eq!(
            fx.dispatcher.send_to_only(&ClearCacheRequest {}).await,
            Err(DispatchError::SingleSessionRequired { connected: 2 })
        );
    }

    #[tokio::test]
    async fn broadcast_isolates_failures() {
        let fx = fixture(&[FeatureSet::Core]);
        let handles: Vec<_> = (0..4).map(|i| fx.connect(&format!("CP{}", i), i)).collect();
        // connection is gone but the lifecycle event has not arrived yet
        fx.transport.drop_connection(handles[2]);

        let pending = fx.dispatcher.send_to_all(&ClearCacheRequest {}).unwrap();
        assert_eq!(pending.len(), 4);

        let results = join_all(pending).await;
        assert_eq!(results.len(), 4);
        for (handle, result) in &results {
            if *handle == handles[2] {
                assert_eq!(result, &Err(DispatchError::NotConnected(handles[2])));
            } else {
                assert!(result.is_ok());
            }
        }
    }

    #[tokio::test]
    async fn feature_gating_follows_registration() {
        let fx = fixture(&[FeatureSet::Core, FeatureSet::SmartCharging]);
        let handle = fx.connect("CP1", 1);
        assert_eq!(
            fx.dispatcher
                .send(&update_firmware(), Target::Handle(handle))
                .await,
            Err(DispatchError::UnsupportedFeature {
                action: Action::UpdateFirmware,
                feature: FeatureSet::FirmwareManagement,
            })
        );

        let fx = fixture(&[FeatureSet::Core, FeatureSet::FirmwareManagement]);
        let handle = fx.connect("CP1", 1);
        assert!(fx
            .dispatcher
            .send(&update_firmware(), Target::Handle(handle))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn first_client_is_oldest() {
        let fx = fixture(&[FeatureSet::Core]);
        assert!(matches!(
            fx.dispatcher.send_to_first_client(&ClearCacheRequest {}).await,
            Err(DispatchError::NotFound(_))
        ));

        let first = fx.connect("CP1", 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        fx.connect("CP2", 2);
        let pending = fx.dispatcher.send_to_first_client(&ClearCacheRequest {});
        assert_eq!(pending.handle(), Some(first));
    }

    #[tokio::test]
    async fn inbound_only_action_is_a_protocol_error() {
        let fx = fixture(&[FeatureSet::Core]);
        let handle = fx.connect("CP1", 1);
        let request = RawRequest::new(Action::Heartbeat, json!({}));
        assert!(matches!(
            fx.dispatcher.send(&request, Target::Handle(handle)).await,
            Err(DispatchError::ProtocolConstraint(_))
        ));
        assert!(fx.transport.sent(handle).is_empty());
    }

    #[tokio::test]
    async fn stopped_dispatcher_reports_not_running() {
        let registry = SessionRegistry::shared();
        let dispatcher = Dispatcher::new(registry, TransportSlot::new());
        assert_eq!(
            dispatcher.send_to_only(&ClearCacheRequest {}).await,
            Err(DispatchError::NotRunning)
        );
        assert_eq!(
            dispatcher.send_to_all(&ClearCacheRequest {}).err(),
            Some(DispatchError::NotRunning)
        );
    }
}
