//! Application ports (hexagonal architecture boundaries)

pub mod transport;

#[cfg(test)]
pub mod stub;

pub use transport::{
    ConfirmationFuture, OutboundCall, SessionEvents, SharedTransport, Transport,
    TransportConnector, TransportSlot,
};
