pub mod observer;
pub mod registry;

pub use observer::{
    SessionEvent, SessionEventBus, SessionEventMessage, SessionEventSubscriber, SessionsListener,
};
pub use registry::{SessionRegistry, SharedSessionRegistry};
