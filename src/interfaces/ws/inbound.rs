//! Charge point initiated requests.
//!
//! The transport routes every supported inbound Call to an
//! [`InboundHandler`]. [`DefaultInboundHandler`] answers each action with a
//! protocol-valid confirmation and keeps no state beyond a transaction
//! counter.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, DataTransferStatus, IdTagInfo, RegistrationStatus,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Action, SessionHandle};
use crate::shared::ocpp_frame::CallErrorCode;

/// Who sent an inbound request.
#[derive(Debug, Clone)]
pub struct InboundContext {
    pub handle: SessionHandle,
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InboundError {
    #[error("{0} is not implemented")]
    NotImplemented(Action),

    #[error("Malformed {action} payload: {reason}")]
    FormationViolation { action: Action, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InboundError {
    pub fn code(&self) -> CallErrorCode {
        match self {
            Self::NotImplemented(_) => CallErrorCode::NotImplemented,
            Self::FormationViolation { .. } => CallErrorCode::FormationViolation,
            Self::Internal(_) => CallErrorCode::InternalError,
        }
    }
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Produce the CallResult payload for `action`.
    async fn handle(
        &self,
        context: &InboundContext,
        action: Action,
        payload: Value,
    ) -> Result<Value, InboundError>;
}

fn parse<T: DeserializeOwned>(action: Action, payload: Value) -> Result<T, InboundError> {
    serde_json::from_value(payload).map_err(|e| InboundError::FormationViolation {
        action,
        reason: e.to_string(),
    })
}

fn respond<T: Serialize>(response: &T) -> Result<Value, InboundError> {
    serde_json::to_value(response).map_err(|e| InboundError::Internal(e.to_string()))
}

fn require_object(action: Action, payload: &Value) -> Result<(), InboundError> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(InboundError::FormationViolation {
            action,
            reason: "payload must be a JSON object".into(),
        })
    }
}

fn accepted_tag() -> IdTagInfo {
    IdTagInfo {
        status: AuthorizationStatus::Accepted,
        expiry_date: None,
        parent_id_tag: None,
    }
}

/// Accepts everything; business decisions belong to the application.
pub struct DefaultInboundHandler {
    heartbeat_interval: u16,
    next_transaction_id: AtomicI32,
}

impl DefaultInboundHandler {
    pub fn new(heartbeat_interval: u16) -> Self {
        Self {
            heartbeat_interval,
            next_transaction_id: AtomicI32::new(1),
        }
    }
}

impl Default for DefaultInboundHandler {
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait]
impl InboundHandler for DefaultInboundHandler {
    async fn handle(
        &self,
        context: &InboundContext,
        action: Action,
        payload: Value,
    ) -> Result<Value, InboundError> {
        let identifier = context.identifier.as_str();
        match action {
            Action::BootNotification => {
                let req: BootNotificationRequest = parse(action, payload)?;
                info!(
                    identifier,
                    vendor = req.charge_point_vendor.as_str(),
                    model = req.charge_point_model.as_str(),
                    "BootNotification"
                );
                respond(&BootNotificationResponse {
                    current_time: Utc::now(),
                    interval: self.heartbeat_interval.into(),
                    status: RegistrationStatus::Accepted,
                })
            }
            Action::Heartbeat => {
                let _: HeartbeatRequest = parse(action, payload)?;
                debug!(identifier, "Heartbeat");
                respond(&HeartbeatResponse {
                    current_time: Utc::now(),
                })
            }
            Action::Authorize => {
                let req: AuthorizeRequest = parse(action, payload)?;
                info!(identifier, id_tag = req.id_tag.as_str(), "Authorize");
                respond(&AuthorizeResponse {
                    id_tag_info: accepted_tag(),
                })
            }
            Action::StartTransaction => {
                let req: StartTransactionRequest = parse(action, payload)?;
                let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
                info!(
                    identifier,
                    connector_id = req.connector_id,
                    id_tag = req.id_tag.as_str(),
                    transaction_id,
                    "StartTransaction"
                );
                respond(&StartTransactionResponse {
                    transaction_id,
                    id_tag_info: accepted_tag(),
                })
            }
            Action::StopTransaction => {
                let req: StopTransactionRequest = parse(action, payload)?;
                info!(identifier, transaction_id = req.transaction_id, "StopTransaction");
                respond(&StopTransactionResponse {
                    id_tag_info: Some(accepted_tag()),
                })
            }
            Action::StatusNotification => {
                let req: StatusNotificationRequest = parse(action, payload)?;
                info!(
                    identifier,
                    connector_id = req.connector_id,
                    status = ?req.status,
                    "StatusNotification"
                );
                respond(&StatusNotificationResponse {})
            }
            Action::MeterValues => {
                let req: MeterValuesRequest = parse(action, payload)?;
                debug!(identifier, connector_id = req.connector_id, "MeterValues");
                respond(&MeterValuesResponse {})
            }
            Action::DiagnosticsStatusNotification => {
                let req: DiagnosticsStatusNotificationRequest = parse(action, payload)?;
                info!(identifier, status = ?req.status, "DiagnosticsStatusNotification");
                respond(&DiagnosticsStatusNotificationResponse {})
            }
            Action::FirmwareStatusNotification => {
                let req: FirmwareStatusNotificationRequest = parse(action, payload)?;
                info!(identifier, status = ?req.status, "FirmwareStatusNotification");
                respond(&FirmwareStatusNotificationResponse {})
            }
            Action::DataTransfer => {
                let req: DataTransferRequest = parse(action, payload)?;
                info!(identifier, vendor_id = req.vendor_string.as_str(), "DataTransfer");
                respond(&DataTransferResponse {
                    status: DataTransferStatus::UnknownVendorId,
                    data: None,
                })
            }
            // Security extension and ISO 15118 messages: acknowledged only.
            Action::SecurityEventNotification
            | Action::LogStatusNotification
            | Action::SignedFirmwareStatusNotification => {
                require_object(action, &payload)?;
                info!(identifier, %action, payload = %payload, "Notification");
                Ok(json!({}))
            }
            Action::SignCertificate => {
                require_object(action, &payload)?;
                info!(identifier, "SignCertificate");
                Ok(json!({"status": "Rejected"}))
            }
            Action::Get15118EVCertificate => {
                require_object(action, &payload)?;
                info!(identifier, "Get15118EVCertificate");
                Ok(json!({"status": "Failed", "exiResponse": ""}))
            }
            Action::GetCertificateStatus => {
                require_object(action, &payload)?;
                info!(identifier, "GetCertificateStatus");
                Ok(json!({"status": "Failed"}))
            }
            other => {
                warn!(identifier, action = %other, "No inbound handler for action");
                Err(InboundError::NotImplemented(other))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> InboundContext {
        InboundContext {
            handle: SessionHandle::new(),
            identifier: "CP001".into(),
        }
    }

    async fn handle(action: Action, payload: Value) -> Result<Value, InboundError> {
        DefaultInboundHandler::new(120)
            .handle(&context(), action, payload)
            .await
    }

    #[tokio::test]
    async fn boot_notification_is_accepted_with_interval() {
        let response = handle(
            Action::BootNotification,
            json!({"chargePointVendor": "Acme", "chargePointModel": "X1"}),
        )
        .await
        .unwrap();
        assert_eq!(response["status"], "Accepted");
        assert_eq!(response["interval"], 120);
        assert!(response["currentTime"].is_string());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_formation_violation() {
        let err = handle(Action::BootNotification, json!({"chargePointVendor": 7}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), CallErrorCode::FormationViolation);
    }

    #[tokio::test]
    async fn transactions_get_increasing_ids() {
        let handler = DefaultInboundHandler::default();
        let request = json!({
            "connectorId": 1,
            "idTag": "TAG1",
            "meterStart": 0,
            "timestamp": "2024-01-01T00:00:00Z"
        });
        let first = handler
            .handle(&context(), Action::StartTransaction, request.clone())
            .await
            .unwrap();
        let second = handler
            .handle(&context(), Action::StartTransaction, request)
            .await
            .unwrap();
        assert_eq!(first["transactionId"], 1);
        assert_eq!(second["transactionId"], 2);
        assert_eq!(first["idTagInfo"]["status"], "Accepted");
    }

    #[tokio::test]
    async fn heartbeat_and_notifications() {
        let heartbeat = handle(Action::Heartbeat, json!({})).await.unwrap();
        assert!(heartbeat["currentTime"].is_string());

        let event = handle(
            Action::SecurityEventNotification,
            json!({"type": "FirmwareUpdated", "timestamp": "2024-01-01T00:00:00Z"}),
        )
        .await
        .unwrap();
        assert_eq!(event, json!({}));
    }

    #[tokio::test]
    async fn data_transfer_reports_unknown_vendor() {
        let response = handle(
            Action::DataTransfer,
            json!({"vendorId": "Acme", "messageId": "ping"}),
        )
        .await
        .unwrap();
        assert_eq!(response, json!({"status": "UnknownVendorId"}));
    }

    #[tokio::test]
    async fn outbound_action_is_not_implemented() {
        let err = handle(Action::Reset, json!({"type": "Hard"})).await.unwrap_err();
        assert_eq!(err, InboundError::NotImplemented(Action::Reset));
        assert_eq!(err.code(), CallErrorCode::NotImplemented);
    }
}
