// =============================================================================
// Broker — the narrow account/trade surface the pipeline depends on
// =============================================================================

use async_trait::async_trait;

use crate::error::{CloseError, ConnectionError, FetchError};
use crate::types::{CloseResult, Position, Session, TradeId};

/// Authenticated access to a single brokerage account.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Authenticate and make one verifying round-trip against the account.
    async fn connect(&self) -> Result<Session, ConnectionError>;

    /// All currently open trades. An empty vector is a normal result.
    async fn list_open_positions(&self, session: &Session) -> Result<Vec<Position>, FetchError>;

    /// Close `trade_id` in full. Irreversible on success.
    async fn close_position(
        &self,
        session: &Session,
        trade_id: &TradeId,
    ) -> Result<CloseResult, CloseError>;
}
