pub mod feature;
pub mod messages;
pub mod request;
pub mod session;

pub use feature::{Action, Direction, FeatureSet, UnknownFeature};
pub use request::{OcppRequest, RawRequest, RawRequestError};
pub use session::{InvalidToken, SessionHandle, SessionInfo, SessionSnapshot, SessionToken};
