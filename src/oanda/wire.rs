// =============================================================================
// OANDA wire format — response bodies and their conversion to domain types
// =============================================================================
//
// OANDA encodes every decimal as a JSON string ("100000.0000", "-2"). The
// raw structs below mirror the JSON; the `parse_*` functions turn a response
// body into crate types so they can be tested without a network.
// =============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiFailure;
use crate::types::{CloseResult, Position, TradeId, TradeSide};

#[derive(Debug, Deserialize)]
struct AccountSummaryResponse {
    account: AccountSummary,
}

#[derive(Debug, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default, rename = "NAV")]
    nav: Option<String>,
}

impl AccountSummary {
    pub fn balance(&self) -> Option<f64> {
        self.balance.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn nav(&self) -> Option<f64> {
        self.nav.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct OpenTradesResponse {
    #[serde(default)]
    trades: Vec<RawTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrade {
    id: String,
    instrument: String,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    current_units: Option<String>,
    #[serde(default, rename = "unrealizedPL")]
    unrealized_pl: Option<String>,
}

/// Parse `GET /v3/accounts/{id}/summary`.
pub fn parse_account_summary(body: &Value) -> Result<AccountSummary, ApiFailure> {
    AccountSummaryResponse::deserialize(body)
        .map(|r| r.account)
        .map_err(|e| ApiFailure::Malformed(format!("account summary: {e}")))
}

/// Parse `GET /v3/accounts/{id}/openTrades` into positions, preserving the
/// order the broker returned them in.
pub fn parse_open_trades(body: &Value) -> Result<Vec<Position>, ApiFailure> {
    let resp = OpenTradesResponse::deserialize(body)
        .map_err(|e| ApiFailure::Malformed(format!("open trades: {e}")))?;

    resp.trades
        .into_iter()
        .map(|t| {
            let units = match t.current_units.as_deref() {
                Some(s) => parse_decimal("currentUnits", s)?,
                None => 0.0,
            };
            let open_price = match t.price.as_deref() {
                Some(s) => parse_decimal("price", s)?,
                None => 0.0,
            };
            Ok(Position {
                id: TradeId(t.id),
                instrument: t.instrument,
                units,
                side: TradeSide::from_units(units),
                open_price,
                unrealized_pl: t.unrealized_pl.as_deref().and_then(|s| s.parse().ok()),
            })
        })
        .collect()
}

/// Build a [`CloseResult`] from a 2xx `PUT .../trades/{id}/close` body.
///
/// OANDA answers a close it could not carry out (market halted, no liquidity)
/// with a 2xx and an `orderCancelTransaction` instead of a fill; the trade is
/// still open, so that is a rejection. A body with neither is malformed. The
/// realized P/L lives in `orderFillTransaction.pl`.
pub fn parse_close_response(trade_id: &TradeId, body: Value) -> Result<CloseResult, ApiFailure> {
    if let Some(cancel) = body.get("orderCancelTransaction") {
        let reason = cancel
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("close order cancelled")
            .to_string();
        return Err(ApiFailure::Rejected {
            status: 200,
            reason,
        });
    }

    let Some(fill) = body.get("orderFillTransaction") else {
        return Err(ApiFailure::Malformed(format!(
            "close of trade {trade_id} returned no fill transaction"
        )));
    };
    let realized_pnl = fill.get("pl").and_then(value_as_f64);

    Ok(CloseResult {
        trade_id: trade_id.clone(),
        realized_pnl,
        raw: body,
    })
}

/// Best human-readable reason from an OANDA error body.
///
/// Prefers `errorMessage`, then a reject transaction's `rejectReason`, then
/// `errorCode`, and finally the raw body.
pub fn error_reason(body: &Value) -> String {
    let reject = body
        .get("orderRejectTransaction")
        .and_then(|t| t.get("rejectReason"));

    body.get("errorMessage")
        .or(reject)
        .or_else(|| body.get("errorCode"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn parse_decimal(field: &str, s: &str) -> Result<f64, ApiFailure> {
    s.parse::<f64>()
        .map_err(|_| ApiFailure::Malformed(format!("field '{field}' is not a number: '{s}'")))
}

/// A JSON value that may be either a string or a number, as `f64`.
fn value_as_f64(val: &Value) -> Option<f64> {
    match val {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
