//! OCPP 1.6 feature profiles and the actions they own.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named, independently enable-able group of protocol operations.
///
/// Variant order is the registration order used at server start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureSet {
    Core,
    FirmwareManagement,
    RemoteTrigger,
    LocalAuthList,
    SmartCharging,
    /// ISO 15118 vehicle certificate exchange.
    VehicleCertificateExchange,
    /// Security whitepaper for OCPP 1.6 (edition 2).
    ExtendedSecurity,
}

impl FeatureSet {
    pub const ALL: &'static [FeatureSet] = &[
        Self::Core,
        Self::FirmwareManagement,
        Self::RemoteTrigger,
        Self::LocalAuthList,
        Self::SmartCharging,
        Self::VehicleCertificateExchange,
        Self::ExtendedSecurity,
    ];

    /// Name used in configuration files.
    pub fn config_name(&self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::FirmwareManagement => "FirmwareManagement",
            Self::RemoteTrigger => "RemoteTrigger",
            Self::LocalAuthList => "LocalAuthList",
            Self::SmartCharging => "SmartCharging",
            Self::VehicleCertificateExchange => "ISO15118",
            Self::ExtendedSecurity => "SecuritySpec16",
        }
    }

    /// Actions that belong to this feature-set, in both directions.
    pub fn actions(&self) -> &'static [Action] {
        use Action::*;
        match self {
            Self::Core => &[
                ChangeAvailability,
                ChangeConfiguration,
                ClearCache,
                DataTransfer,
                GetConfiguration,
                RemoteStartTransaction,
                RemoteStopTransaction,
                Reset,
                UnlockConnector,
                Authorize,
                BootNotification,
                Heartbeat,
                MeterValues,
                StartTransaction,
                StatusNotification,
                StopTransaction,
            ],
            Self::FirmwareManagement => &[
                GetDiagnostics,
                UpdateFirmware,
                DiagnosticsStatusNotification,
                FirmwareStatusNotification,
            ],
            Self::RemoteTrigger => &[TriggerMessage],
            Self::LocalAuthList => &[GetLocalListVersion, SendLocalList],
            Self::SmartCharging => &[
                SetChargingProfile,
                ClearChargingProfile,
                GetCompositeSchedule,
            ],
            Self::VehicleCertificateExchange => &[
                InstallCertificate,
                SignedUpdateFirmware,
                Get15118EVCertificate,
                GetCertificateStatus,
            ],
            Self::ExtendedSecurity => &[
                ExtendedTriggerMessage,
                CertificateSigned,
                DeleteCertificate,
                GetInstalledCertificateIds,
                GetLog,
                InstallCertificate,
                SignedUpdateFirmware,
                SecurityEventNotification,
                SignCertificate,
                LogStatusNotification,
                SignedFirmwareStatusNotification,
            ],
        }
    }

    pub fn owns(&self, action: Action) -> bool {
        self.actions().contains(&action)
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown feature profile '{0}'")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureSet {
    type Err = UnknownFeature;

    /// Case-insensitive match on the configuration name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.config_name().eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownFeature(name.to_string()))
    }
}

// ── Action ─────────────────────────────────────────────────────

/// Which side initiates an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    CentralToChargePoint,
    ChargePointToCentral,
    Both,
}

impl Direction {
    pub fn allows_outbound(&self) -> bool {
        matches!(self, Self::CentralToChargePoint | Self::Both)
    }

    pub fn allows_inbound(&self) -> bool {
        matches!(self, Self::ChargePointToCentral | Self::Both)
    }
}

macro_rules! actions {
    ($($variant:ident => $dir:ident),+ $(,)?) => {
        /// OCPP action names known to this central system.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Action {
            $($variant),+
        }

        impl Action {
            pub const ALL: &'static [Action] = &[$(Action::$variant),+];

            /// Wire name as used in the `action` field of a Call frame.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Action::$variant => stringify!($variant)),+
                }
            }

            pub fn direction(&self) -> Direction {
                match self {
                    $(Action::$variant => Direction::$dir),+
                }
            }
        }
    };
}

actions! {
    // Core
    ChangeAvailability => CentralToChargePoint,
    ChangeConfiguration => CentralToChargePoint,
    ClearCache => CentralToChargePoint,
    DataTransfer => Both,
    GetConfiguration => CentralToChargePoint,
    RemoteStartTransaction => CentralToChargePoint,
    RemoteStopTransaction => CentralToChargePoint,
    Reset => CentralToChargePoint,
    UnlockConnector => CentralToChargePoint,
    Authorize => ChargePointToCentral,
    BootNotification => ChargePointToCentral,
    Heartbeat => ChargePointToCentral,
    MeterValues => ChargePointToCentral,
    StartTransaction => ChargePointToCentral,
    StatusNotification => ChargePointToCentral,
    StopTransaction => ChargePointToCentral,
    // Firmware management
    GetDiagnostics => CentralToChargePoint,
    UpdateFirmware => CentralToChargePoint,
    DiagnosticsStatusNotification => ChargePointToCentral,
    FirmwareStatusNotification => ChargePointToCentral,
    // Remote trigger
    TriggerMessage => CentralToChargePoint,
    // Local authorization list
    GetLocalListVersion => CentralToChargePoint,
    SendLocalList => CentralToChargePoint,
    // Smart charging
    SetChargingProfile => CentralToChargePoint,
    ClearChargingProfile => CentralToChargePoint,
    GetCompositeSchedule => CentralToChargePoint,
    // Certificates (ISO 15118 and security extension)
    InstallCertificate => CentralToChargePoint,
    SignedUpdateFirmware => CentralToChargePoint,
    Get15118EVCertificate => ChargePointToCentral,
    GetCertificateStatus => ChargePointToCentral,
    // Security extension
    ExtendedTriggerMessage => CentralToChargePoint,
    CertificateSigned => CentralToChargePoint,
    DeleteCertificate => CentralToChargePoint,
    GetInstalledCertificateIds => CentralToChargePoint,
    GetLog => CentralToChargePoint,
    SecurityEventNotification => ChargePointToCentral,
    SignCertificate => ChargePointToCentral,
    LogStatusNotification => ChargePointToCentral,
    SignedFirmwareStatusNotification => ChargePointToCentral,
}

impl Action {
    /// Feature-sets that declare this action. Non-empty for every action.
    pub fn feature_sets(&self) -> impl Iterator<Item = FeatureSet> + '_ {
        FeatureSet::ALL.iter().copied().filter(move |f| f.owns(*self))
    }

    /// First declaring feature-set, used in error messages.
    pub fn primary_feature(&self) -> FeatureSet {
        self.feature_sets().next().unwrap_or(FeatureSet::Core)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
