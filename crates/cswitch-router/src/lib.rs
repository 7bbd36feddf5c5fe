//! HTTP surface of the relay.

mod proxy;

pub use proxy::{RelayState, relay_router, to_axum_response};
