//! HTTP and WebSocket gateway for the call relay.
//!
//! Hosts the telephony webhooks (call start and continuation), the
//! media-stream WebSocket that feeds the transcription leg, number search
//! and health endpoints.

pub mod calls;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod numbers;
pub mod server;
pub mod state;
pub mod stream;
pub mod twiml;

pub use server::{build_router, start_gateway};
pub use state::GatewayState;
