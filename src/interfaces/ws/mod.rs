//! WebSocket interfaces
//!
//! - `security`: rustls builder for the TLS start strategy
//! - `inbound`: answers charge point initiated calls
//! - `websocket`: OCPP 1.6 transport over tokio-tungstenite

pub mod inbound;
pub mod security;
pub mod websocket;

pub use crate::application::admission::{AdmissionGate, AdmissionRejected};
pub use crate::application::security::{
    CertificateMaterial, SecurityBuilder, TlsPolicy, TransportStartStrategy,
};
pub use inbound::{DefaultInboundHandler, InboundContext, InboundError, InboundHandler};
pub use security::RustlsSecurityBuilder;
pub use websocket::{WsConnector, WsTransport};
