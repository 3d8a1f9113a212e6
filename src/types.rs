// =============================================================================
// Shared types used across the trade closer
// =============================================================================

use chrono::{DateTime, Local};

/// Broker-assigned trade identifier. OANDA sends these as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TradeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Direction of an open trade, derived from the sign of its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn from_units(units: f64) -> Self {
        if units < 0.0 {
            Self::Short
        } else {
            Self::Long
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "Long"),
            Self::Short => write!(f, "Short"),
        }
    }
}

/// Snapshot of one open trade as returned by a single fetch.
///
/// The pipeline only looks at `id` and `instrument`; the remaining fields are
/// carried for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: TradeId,
    pub instrument: String,
    /// Signed current units (negative for shorts).
    pub units: f64,
    pub side: TradeSide,
    pub open_price: f64,
    pub unrealized_pl: Option<f64>,
}

#[cfg(test)]
impl Position {
    /// Minimal constructor used where only identity matters.
    pub fn new(id: impl Into<String>, instrument: impl Into<String>, units: f64) -> Self {
        Self {
            id: TradeId(id.into()),
            instrument: instrument.into(),
            units,
            side: TradeSide::from_units(units),
            open_price: 0.0,
            unrealized_pl: None,
        }
    }
}

/// Outcome of a successful close request.
#[derive(Debug, Clone)]
pub struct CloseResult {
    pub trade_id: TradeId,
    /// Realized profit/loss in account currency, when the fill reports one.
    pub realized_pnl: Option<f64>,
    /// Untouched response body from the broker.
    pub raw: serde_json::Value,
}

/// Authenticated handle to one brokerage account, valid for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub account_id: String,
    /// Human label for the account environment, e.g. "practice" or "live".
    pub environment: String,
    pub balance: Option<f64>,
    pub nav: Option<f64>,
    pub currency: Option<String>,
}

/// How a message should be treated by sinks that care (log level only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
    Fatal,
}

/// One line of run output, stamped when it is created.
#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
    pub severity: Severity,
    pub created_at: DateTime<Local>,
}

impl Message {
    pub fn info(text: impl Into<String>) -> Self {
        Self::with_severity(text, Severity::Info)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::with_severity(text, Severity::Error)
    }

    pub fn fatal(text: impl Into<String>) -> Self {
        Self::with_severity(text, Severity::Fatal)
    }

    fn with_severity(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
            created_at: Local::now(),
        }
    }

    /// `[YYYY-MM-DD HH:MM:SS] text`, the form written to every sink.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.text
        )
    }
}
