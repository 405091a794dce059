pub mod admission;
pub mod dispatch;
pub mod features;
pub mod ports;
pub mod security;
pub mod session;

pub use admission::{AdmissionGate, AdmissionRejected};
pub use dispatch::{join_all, Dispatcher, PendingConfirmation, Target};
pub use features::{FeatureProfiles, FeatureRegistry};
pub use security::{CertificateMaterial, SecurityBuilder, TlsPolicy, TransportStartStrategy};
pub use session::{
    SessionEvent, SessionEventBus, SessionEventSubscriber, SessionRegistry, SessionsListener,
    SharedSessionRegistry,
};
