//! Request dispatch from the central system to connected charge points.
//!
//! ```text
//! caller ──► Dispatcher::send(request, Target)
//!                 │ resolve via SessionRegistry
//!                 │ serialize + direction check (OutboundCall)
//!                 ▼
//!            Transport::send ──► ConfirmationFuture
//!                 │
//!            tokio::spawn: await, log, record metrics
//!                 ▼
//!            PendingConfirmation (returned immediately)
//! ```

pub mod dispatcher;
pub mod pending;

pub use dispatcher::{Dispatcher, Target};
pub use pending::{join_all, ConfirmationResult, PendingConfirmation};
