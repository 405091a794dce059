//! Adapters between the core and the outside world.

pub mod ws;
