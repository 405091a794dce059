//! # OCPP Central System
//!
//! Session registry and asynchronous request dispatch for an OCPP 1.6
//! central system.
//!
//! ## Architecture
//!
//! - **domain**: protocol vocabulary (feature profiles, actions, sessions, messages)
//! - **application**: session registry, feature composition, dispatcher, admission, TLS policy and the transport port
//! - **interfaces**: WebSocket transport and its rustls backend
//! - **server**: `Stopped ⇄ Running` lifecycle tying the pieces together
//! - **config**: TOML configuration

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use application::{Dispatcher, FeatureProfiles, SessionRegistry, SessionsListener, Target};
pub use config::{default_config_path, AppConfig};
pub use domain::{Action, FeatureSet, OcppRequest, RawRequest, SessionHandle, SessionInfo};
pub use server::{init_tracing, OcppServer};
pub use shared::errors::{DispatchError, ServerError};
