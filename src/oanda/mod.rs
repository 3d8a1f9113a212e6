// =============================================================================
// OANDA v20 REST integration
// =============================================================================

pub mod client;
pub mod wire;

pub use client::OandaClient;
