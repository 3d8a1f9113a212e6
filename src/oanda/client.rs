// =============================================================================
// OANDA REST API Client — bearer-token authenticated v20 requests
// =============================================================================
//
// SECURITY: the access token is never logged or serialized. It lives only in
// the default `Authorization` header of the inner reqwest client, marked
// sensitive.
//
// Every request inherits the client-level timeout from configuration, so a
// stalled brokerage endpoint cannot hang a run.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::RequestBuilder;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace, warn};

use crate::broker::Broker;
use crate::config::OandaCredentials;
use crate::error::{ApiFailure, CloseError, ConnectionError, FetchError};
use crate::oanda::wire;
use crate::types::{CloseResult, Position, Session, TradeId};

/// OANDA v20 client bound to one account.
#[derive(Clone)]
pub struct OandaClient {
    account_id: String,
    environment: String,
    base_url: String,
    client: reqwest::Client,
}

impl OandaClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a client for the account and environment in `creds`.
    pub fn new(creds: &OandaCredentials) -> Result<Self> {
        Self::with_base_url(creds, creds.environment.base_url())
    }

    /// Same as [`OandaClient::new`] but against an explicit base URL.
    pub fn with_base_url(creds: &OandaCredentials, base_url: impl Into<String>) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", creds.api_key))
            .context("OANDA API key contains characters not allowed in a header")?;
        auth.set_sensitive(true);

        let mut default_headers = HeaderMap::new();
        default_headers.insert(AUTHORIZATION, auth);
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(creds.request_timeout)
            .build()
            .context("failed to build OANDA HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, account_id = %creds.account_id, "OandaClient initialised");

        Ok(Self {
            account_id: creds.account_id.clone(),
            environment: creds.environment.to_string(),
            base_url,
            client,
        })
    }

    fn account_url(&self, path: &str) -> String {
        format!("{}/v3/accounts/{}{}", self.base_url, self.account_id, path)
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Send `req` and return the JSON body of a 2xx response. Non-2xx
    /// responses become [`ApiFailure::Rejected`] carrying OANDA's reason.
    async fn send_json(&self, req: RequestBuilder, endpoint: &str) -> Result<Value, ApiFailure> {
        let resp = req.send().await.map_err(|e| {
            warn!(endpoint, error = %e, "OANDA request failed");
            ApiFailure::from(e)
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(ApiFailure::from)?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<Value>(&text) {
                Ok(body) => wire::error_reason(&body),
                Err(_) if text.trim().is_empty() => {
                    status.canonical_reason().unwrap_or("no body").to_string()
                }
                Err(_) => text.trim().to_string(),
            };
            warn!(endpoint, status = status.as_u16(), reason = %reason, "OANDA rejected request");
            return Err(ApiFailure::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| ApiFailure::Malformed(format!("{endpoint} returned invalid JSON: {e}")))
    }
}

// -----------------------------------------------------------------------------
// Broker implementation
// -----------------------------------------------------------------------------

#[async_trait]
impl Broker for OandaClient {
    /// GET /v3/accounts/{id}/summary — proves the token and account id.
    #[instrument(skip(self), name = "oanda::connect", fields(account_id = %self.account_id))]
    async fn connect(&self) -> Result<Session, ConnectionError> {
        let to_conn_err = |source: ApiFailure| ConnectionError {
            account_id: self.account_id.clone(),
            source,
        };

        let body = self
            .send_json(self.client.get(self.account_url("/summary")), "GET summary")
            .await
            .map_err(to_conn_err)?;
        let summary = wire::parse_account_summary(&body).map_err(to_conn_err)?;

        debug!(
            balance = ?summary.balance(),
            currency = ?summary.currency,
            "account summary retrieved"
        );

        Ok(Session {
            account_id: summary.id.clone(),
            environment: self.environment.clone(),
            balance: summary.balance(),
            nav: summary.nav(),
            currency: summary.currency.clone(),
        })
    }

    /// GET /v3/accounts/{id}/openTrades.
    #[instrument(skip(self, session), name = "oanda::list_open_positions")]
    async fn list_open_positions(&self, session: &Session) -> Result<Vec<Position>, FetchError> {
        debug!(account_id = %session.account_id, "fetching open trades");
        let body = self
            .send_json(self.client.get(self.account_url("/openTrades")), "GET openTrades")
            .await?;
        let positions = wire::parse_open_trades(&body)?;

        debug!(count = positions.len(), "open trades retrieved");
        Ok(positions)
    }

    /// PUT /v3/accounts/{id}/trades/{tradeId}/close — closes all units.
    #[instrument(skip(self, session, trade_id), name = "oanda::close_position", fields(trade_id = %trade_id))]
    async fn close_position(
        &self,
        session: &Session,
        trade_id: &TradeId,
    ) -> Result<CloseResult, CloseError> {
        let to_close_err = |source: ApiFailure| CloseError {
            trade_id: trade_id.clone(),
            source,
        };
        let url = self.account_url(&format!("/trades/{}/close", trade_id.as_str()));
        debug!(account_id = %session.account_id, "closing trade");

        let body = self
            .send_json(
                self.client.put(&url).json(&json!({ "units": "ALL" })),
                "PUT trades/close",
            )
            .await
            .map_err(to_close_err)?;

        let result = wire::parse_close_response(trade_id, body).map_err(|source| {
            warn!(reason = %source, "close order was not filled");
            to_close_err(source)
        })?;
        debug!(realized_pnl = ?result.realized_pnl, "trade closed");
        trace!(response = %result.raw, "close response body");
        Ok(result)
    }
}

impl std::fmt::Debug for OandaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OandaClient")
            .field("account_id", &self.account_id)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OandaEnvironment;
    use crate::http_stub::respond_once;
    use std::time::Duration;

    fn session() -> Session {
        Session {
            account_id: "101-001-0000000-001".into(),
            environment: "practice".into(),
            balance: None,
            nav: None,
            currency: None,
        }
    }

    fn creds() -> OandaCredentials {
        OandaCredentials {
            api_key: "test-token".into(),
            account_id: "101-001-0000000-001".into(),
            environment: OandaEnvironment::Practice,
            request_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn builds_account_scoped_urls() {
        let client = OandaClient::with_base_url(&creds(), "http://localhost:8080/").unwrap();
        assert_eq!(
            client.account_url("/openTrades"),
            "http://localhost:8080/v3/accounts/101-001-0000000-001/openTrades"
        );
    }

    #[test]
    fn default_base_url_follows_environment() {
        let client = OandaClient::new(&creds()).unwrap();
        assert_eq!(client.base_url, "https://api-fxpractice.oanda.com");
        assert_eq!(client.environment, "practice");
    }

    #[test]
    fn debug_output_hides_token() {
        let client = OandaClient::new(&creds()).unwrap();
        assert!(!format!("{client:?}").contains("test-token"));
    }

    #[test]
    fn rejects_token_with_newline() {
        let mut c = creds();
        c.api_key = "bad\ntoken".into();
        assert!(OandaClient::new(&c).is_err());
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        // Port 9 (discard) is closed on any sane test host.
        let client = OandaClient::with_base_url(&creds(), "http://127.0.0.1:9").unwrap();
        let err = client.connect().await.unwrap_err();
        assert_eq!(err.account_id, "101-001-0000000-001");
        assert!(matches!(err.source, ApiFailure::Transport(_) | ApiFailure::Timeout));
    }

    #[tokio::test]
    async fn close_rejected_by_broker_carries_error_message() {
        let (url, request) = respond_once(
            "404 Not Found",
            r#"{"errorCode":"TRADE_DOESNT_EXIST","errorMessage":"The Trade specified does not exist"}"#,
        )
        .await;
        let client = OandaClient::with_base_url(&creds(), url).unwrap();

        let err = client
            .close_position(&session(), &TradeId::from("7"))
            .await
            .unwrap_err();

        assert_eq!(err.trade_id, TradeId::from("7"));
        assert_eq!(
            err.source,
            ApiFailure::Rejected {
                status: 404,
                reason: "The Trade specified does not exist".into()
            }
        );

        let request = request.await.unwrap();
        assert!(request.starts_with("PUT /v3/accounts/101-001-0000000-001/trades/7/close "));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer test-token"));
        assert!(request.contains(r#""units":"ALL""#));
    }

    #[tokio::test]
    async fn cancelled_close_over_http_is_a_close_error() {
        let (url, _request) = respond_once(
            "200 OK",
            r#"{"orderCreateTransaction":{"type":"MARKET_ORDER"},"orderCancelTransaction":{"type":"ORDER_CANCEL","reason":"MARKET_HALTED"}}"#,
        )
        .await;
        let client = OandaClient::with_base_url(&creds(), url).unwrap();

        let err = client
            .close_position(&session(), &TradeId::from("5"))
            .await
            .unwrap_err();

        assert_eq!(
            err.source,
            ApiFailure::Rejected {
                status: 200,
                reason: "MARKET_HALTED".into()
            }
        );
    }

    #[tokio::test]
    async fn filled_close_over_http_returns_pl() {
        let (url, _request) = respond_once(
            "200 OK",
            r#"{"orderFillTransaction":{"id":"91","pl":"12.5000"}}"#,
        )
        .await;
        let client = OandaClient::with_base_url(&creds(), url).unwrap();

        let result = client
            .close_position(&session(), &TradeId::from("5"))
            .await
            .unwrap();
        assert_eq!(result.realized_pnl, Some(12.5));
    }

    #[tokio::test]
    async fn non_json_success_body_is_malformed() {
        let (url, _request) = respond_once("200 OK", "<html>maintenance</html>").await;
        let client = OandaClient::with_base_url(&creds(), url).unwrap();

        let err = client.list_open_positions(&session()).await.unwrap_err();
        assert!(matches!(err.0, ApiFailure::Malformed(m) if m.contains("GET openTrades")));
    }

    #[tokio::test]
    async fn unauthorized_summary_is_a_connection_error() {
        let (url, _request) = respond_once(
            "401 Unauthorized",
            r#"{"errorMessage":"Insufficient authorization to perform request."}"#,
        )
        .await;
        let client = OandaClient::with_base_url(&creds(), url).unwrap();

        let err = client.connect().await.unwrap_err();
        assert_eq!(
            err.source,
            ApiFailure::Rejected {
                status: 401,
                reason: "Insufficient authorization to perform request.".into()
            }
        );
    }
}
