pub mod errors;
pub mod ocpp_frame;
pub mod shutdown;

pub use errors::*;
pub use shutdown::{os_shutdown_signal, ShutdownSignal};
