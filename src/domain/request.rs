//! Typed request payloads sent from the central system to charge points.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;

use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use rust_ocpp::v1_6::messages::clear_cache::{ClearCacheRequest, ClearCacheResponse};
use rust_ocpp::v1_6::messages::clear_charging_profile::{
    ClearChargingProfileRequest, ClearChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::get_composite_schedule::{
    GetCompositeScheduleRequest, GetCompositeScheduleResponse,
};
use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};

use super::feature::Action;
use super::messages::{
    CertificateSignedRequest, CertificateSignedResponse, DeleteCertificateRequest,
    DeleteCertificateResponse, ExtendedTriggerMessageRequest, ExtendedTriggerMessageResponse,
    GetInstalledCertificateIdsRequest, GetInstalledCertificateIdsResponse, GetLogRequest,
    GetLogResponse, InstallCertificateRequest, InstallCertificateResponse,
    SignedUpdateFirmwareRequest, SignedUpdateFirmwareResponse,
};

/// A request the central system can send.
///
/// The serialized form is the Call payload; the action name comes from
/// [`OcppRequest::action`].
pub trait OcppRequest: Serialize + fmt::Debug + Send + Sync {
    /// Shape of the matching CallResult payload.
    type Confirmation: DeserializeOwned + Send + 'static;

    fn action(&self) -> Action;
}

macro_rules! ocpp_requests {
    ($($request:ty => $confirmation:ty, $action:ident;)+) => {
        $(
            impl OcppRequest for $request {
                type Confirmation = $confirmation;

                fn action(&self) -> Action {
                    Action::$action
                }
            }
        )+
    };
}

ocpp_requests! {
    ChangeAvailabilityRequest => ChangeAvailabilityResponse, ChangeAvailability;
    ChangeConfigurationRequest => ChangeConfigurationResponse, ChangeConfiguration;
    ClearCacheRequest => ClearCacheResponse, ClearCache;
    DataTransferRequest => DataTransferResponse, DataTransfer;
    GetConfigurationRequest => GetConfigurationResponse, GetConfiguration;
    RemoteStartTransactionRequest => RemoteStartTransactionResponse, RemoteStartTransaction;
    RemoteStopTransactionRequest => RemoteStopTransactionResponse, RemoteStopTransaction;
    ResetRequest => ResetResponse, Reset;
    UnlockConnectorRequest => UnlockConnectorResponse, UnlockConnector;
    GetDiagnosticsRequest => GetDiagnosticsResponse, GetDiagnostics;
    UpdateFirmwareRequest => UpdateFirmwareResponse, UpdateFirmware;
    TriggerMessageRequest => TriggerMessageResponse, TriggerMessage;
    GetLocalListVersionRequest => GetLocalListVersionResponse, GetLocalListVersion;
    SendLocalListRequest => SendLocalListResponse, SendLocalList;
    SetChargingProfileRequest => SetChargingProfileResponse, SetChargingProfile;
    ClearChargingProfileRequest => ClearChargingProfileResponse, ClearChargingProfile;
    GetCompositeScheduleRequest => GetCompositeScheduleResponse, GetCompositeSchedule;
    ExtendedTriggerMessageRequest => ExtendedTriggerMessageResponse, ExtendedTriggerMessage;
    CertificateSignedRequest => CertificateSignedResponse, CertificateSigned;
    DeleteCertificateRequest => DeleteCertificateResponse, DeleteCertificate;
    GetInstalledCertificateIdsRequest => GetInstalledCertificateIdsResponse, GetInstalledCertificateIds;
    GetLogRequest => GetLogResponse, GetLog;
    InstallCertificateRequest => InstallCertificateResponse, InstallCertificate;
    SignedUpdateFirmwareRequest => SignedUpdateFirmwareResponse, SignedUpdateFirmware;
}

/// Untyped request, e.g. parsed from operator input.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRequest {
    pub action: Action,
    pub payload: Value,
}

impl RawRequest {
    pub fn new(action: Action, payload: Value) -> Self {
        Self { action, payload }
    }

    /// Build from an action name and JSON text.
    pub fn parse(action: &str, payload: &str) -> Result<Self, RawRequestError> {
        let action =
            Action::from_name(action).ok_or_else(|| RawRequestError::UnknownAction(action.into()))?;
        let payload = serde_json::from_str(payload)?;
        Ok(Self { action, payload })
    }
}

impl Serialize for RawRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

impl OcppRequest for RawRequest {
    type Confirmation = Value;

    fn action(&self) -> Action {
        self.action
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RawRequestError {
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}
