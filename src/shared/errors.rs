use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{Action, FeatureSet, InvalidToken, SessionHandle};

/// Lookup and bookkeeping failures of the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No session matches '{0}'")]
    NotFound(String),

    #[error("{matches} sessions match '{query}'")]
    Ambiguous { query: String, matches: usize },

    #[error("Session handle {0} is already registered")]
    DuplicateHandle(SessionHandle),

    #[error(transparent)]
    InvalidToken(#[from] InvalidToken),
}

/// Failures reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Action {action} requires feature profile {feature}, which is not registered")]
    UnsupportedFeature { action: Action, feature: FeatureSet },

    #[error("Protocol constraint violated: {0}")]
    ProtocolConstraint(String),

    #[error("Session {0} is not connected")]
    NotConnected(SessionHandle),

    #[error("Feature profiles cannot change while the transport is listening")]
    AlreadyListening,

    #[error("Transport is closed")]
    Closed,

    #[error("No confirmation for {action} within {secs}s")]
    Timeout { action: Action, secs: u64 },

    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Handshake not completed within {secs}s")]
    HandshakeTimeout { secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("No session matches '{0}'")]
    NotFound(String),

    #[error("{matches} sessions match '{query}'")]
    Ambiguous { query: String, matches: usize },

    #[error("Action {action} requires feature profile {feature}, which is not registered")]
    UnsupportedFeature { action: Action, feature: FeatureSet },

    #[error("Protocol constraint violated: {0}")]
    ProtocolConstraint(String),

    #[error("Session {0} is not connected")]
    NotConnected(SessionHandle),

    #[error("Server is not running")]
    NotRunning,

    #[error("Exactly one connected session required, found {connected}")]
    SingleSessionRequired { connected: usize },

    #[error("No confirmation for {action} within {secs}s")]
    Timeout { action: Action, secs: u64 },

    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },

    #[error("Invalid confirmation: {0}")]
    InvalidConfirmation(String),

    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Caller misuse rather than a runtime failure.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::NotRunning | Self::SingleSessionRequired { .. })
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(query) => Self::NotFound(query),
            RegistryError::Ambiguous { query, matches } => Self::Ambiguous { query, matches },
            RegistryError::InvalidToken(e) => Self::NotFound(e.token),
            other @ RegistryError::DuplicateHandle(_) => Self::Transport(other.to_string()),
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UnsupportedFeature { action, feature } => {
                Self::UnsupportedFeature { action, feature }
            }
            TransportError::ProtocolConstraint(msg) => Self::ProtocolConstraint(msg),
            TransportError::NotConnected(handle) => Self::NotConnected(handle),
            TransportError::Timeout { action, secs } => Self::Timeout { action, secs },
            TransportError::CallError { code, description } => {
                Self::CallError { code, description }
            }
            TransportError::Closed => Self::NotRunning,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// TLS material and policy problems, reported at start.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Unknown cipher suite '{0}'")]
    UnknownCipher(String),

    #[error("Cannot read {path}: {source}")]
    Pem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Client certificates are required but no client CA is configured")]
    MissingClientCa,

    #[error("Client verifier: {0}")]
    ClientVerifier(String),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Startup failed: {0}")]
    Startup(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),
}
