// =============================================================================
// Error taxonomy — fatal vs. per-trade vs. notification failures
// =============================================================================
//
// ConnectionError / FetchError abort the run before anything is mutated.
// CloseError is isolated to one trade. NotificationError never leaves the
// notifier.
// =============================================================================

use thiserror::Error;

use crate::types::TradeId;

/// What went wrong talking to a remote HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiFailure {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("{reason} (HTTP {status})")]
    Rejected { status: u16, reason: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ApiFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// The account could not be reached or did not authenticate.
#[derive(Debug, Clone, Error)]
#[error("could not connect to account {account_id}: {source}")]
pub struct ConnectionError {
    pub account_id: String,
    #[source]
    pub source: ApiFailure,
}

/// Open trades could not be listed.
#[derive(Debug, Clone, Error)]
#[error("could not retrieve open trades: {0}")]
pub struct FetchError(#[from] pub ApiFailure);

/// The broker refused or failed to close one trade.
#[derive(Debug, Clone, Error)]
#[error("close of trade {trade_id} failed: {source}")]
pub struct CloseError {
    pub trade_id: TradeId,
    #[source]
    pub source: ApiFailure,
}

impl CloseError {
    /// The broker-facing reason, without the trade id prefix.
    pub fn reason(&self) -> String {
        self.source.to_string()
    }
}

/// Remote notification delivery failed. Only ever logged locally.
#[derive(Debug, Clone, Error)]
#[error("failed to send remote notification: {0}")]
pub struct NotificationError(#[from] pub ApiFailure);

/// Startup configuration is missing or unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
