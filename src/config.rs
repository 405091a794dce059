//! Application configuration loaded from a TOML file.
//!
//! Default location: `~/.config/ocpp-central/config.toml`.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8887
//!
//! [ocpp]
//! # every profile is enabled when `features` is omitted
//! features = ["Core", "FirmwareManagement", "SmartCharging"]
//! auth_password = "s3cret"
//!
//! [tls]
//! enabled = true
//! cert_chain = "/etc/ocpp/chain.pem"
//! private_key = "/etc/ocpp/key.pem"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::application::admission::AdmissionGate;
use crate::application::features::FeatureProfiles;
use crate::application::security::{CertificateMaterial, TlsPolicy, TransportStartStrategy};
use crate::domain::{FeatureSet, UnknownFeature};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    UnknownFeature(#[from] UnknownFeature),

    #[error("TLS is enabled but [tls] {0} is not set")]
    MissingTlsFile(&'static str),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ocpp: OcppConfig,
    pub tls: TlsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8887,
            shutdown_timeout: 10,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcppConfig {
    /// Feature profile names; `Core` is implied. Defaults to every profile.
    pub features: Vec<String>,
    /// Basic auth password expected from charge points. Empty disables the check.
    pub auth_password: String,
    /// Heartbeat interval handed out in BootNotification confirmations.
    pub heartbeat_interval: u16,
    pub response_timeout_secs: u64,
}

impl Default for OcppConfig {
    fn default() -> Self {
        Self {
            features: FeatureSet::ALL
                .iter()
                .map(|feature| feature.config_name().to_string())
                .collect(),
            auth_password: String::new(),
            heartbeat_interval: 300,
            response_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_chain: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
    pub client_auth: bool,
    pub ciphers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `ocpp_central=debug`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint. Unset disables the exporter.
    pub listen: Option<SocketAddr>,
}

impl AppConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // fail fast on names and TLS files
        config.feature_profiles()?;
        config.tls_policy()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn feature_profiles(&self) -> Result<FeatureProfiles, ConfigError> {
        Ok(FeatureProfiles::from_names(&self.ocpp.features)?)
    }

    pub fn gate(&self) -> AdmissionGate {
        AdmissionGate::new(self.ocpp.auth_password.clone())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.ocpp.response_timeout_secs)
    }

    /// `None` when TLS is disabled.
    pub fn tls_policy(&self) -> Result<Option<TlsPolicy>, ConfigError> {
        let tls = &self.tls;
        if !tls.enabled {
            return Ok(None);
        }
        let cert_chain = tls
            .cert_chain
            .clone()
            .ok_or(ConfigError::MissingTlsFile("cert_chain"))?;
        let private_key = tls
            .private_key
            .clone()
            .ok_or(ConfigError::MissingTlsFile("private_key"))?;
        Ok(Some(TlsPolicy {
            cipher_suites: tls.ciphers.clone(),
            require_client_certificate: tls.client_auth,
            certificate: CertificateMaterial {
                cert_chain,
                private_key,
                client_ca: tls.client_ca.clone(),
            },
        }))
    }

    pub fn start_strategy(&self) -> Result<TransportStartStrategy, ConfigError> {
        Ok(TransportStartStrategy::decide(self.tls_policy()?))
    }
}

/// `~/.config/ocpp-central/config.toml`, or `./config.toml` without a home.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("ocpp-central").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}
