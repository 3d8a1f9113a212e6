// =============================================================================
// Close-Trade Pipeline — connect, fetch, filter, close, report
// =============================================================================
//
// Life-cycle:
//   Idle -> Connecting -> Fetching -> Filtering -> Closing(i)... -> Reporting -> Done
//   Connecting | Fetching  -> Aborted   (fatal, nothing has been mutated)
//   Fetching (empty)       -> Done
//
// Per-trade close failures are reported and absorbed; only connect and fetch
// failures end the run early. Each matching trade id is closed at most once.
// =============================================================================

use std::collections::HashSet;

use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::broker::Broker;
use crate::notifier::Notifier;
use crate::types::{CloseResult, Message, Position, Session, TradeId};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connecting,
    Fetching,
    Filtering,
    /// Closing the i-th matching trade (zero-based).
    Closing(usize),
    Reporting,
    Done,
    Aborted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Filtering => write!(f, "Filtering"),
            Self::Closing(i) => write!(f, "Closing({i})"),
            Self::Reporting => write!(f, "Reporting"),
            Self::Done => write!(f, "Done"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A trade the broker refused to close.
#[derive(Debug, Clone)]
pub struct CloseFailure {
    pub trade_id: TradeId,
    pub reason: String,
}

/// Everything that happened in one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub final_state: PipelineState,
    /// Open trades seen in the fetch (0 when aborted before fetching).
    pub open_positions: usize,
    /// Trades whose instrument matched the target.
    pub matched: usize,
    pub closed: Vec<CloseResult>,
    pub failed: Vec<CloseFailure>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            final_state: PipelineState::Idle,
            open_positions: 0,
            matched: 0,
            closed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn aborted(&self) -> bool {
        self.final_state == PipelineState::Aborted
    }

    /// Close attempts made, successful or not.
    pub fn processed(&self) -> usize {
        self.closed.len() + self.failed.len()
    }

    /// Sum of realized P/L over closes that reported one.
    pub fn realized_pnl(&self) -> Option<f64> {
        let values: Vec<f64> = self.closed.iter().filter_map(|c| c.realized_pnl).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum())
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a, B: Broker + ?Sized> {
    broker: &'a B,
    notifier: &'a Notifier,
    target: String,
    state: PipelineState,
}

impl<'a, B: Broker + ?Sized> Pipeline<'a, B> {
    /// `target` must already be a canonical instrument name.
    pub fn new(broker: &'a B, notifier: &'a Notifier, target: impl Into<String>) -> Self {
        Self {
            broker,
            notifier,
            target: target.into(),
            state: PipelineState::Idle,
        }
    }

    /// Execute one full run. Never returns an error: every failure is
    /// reported through the notifier and reflected in the report.
    pub async fn run(mut self) -> RunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("close_run", %run_id, instrument = %self.target);
        async move {
            let mut report = RunReport::new();
            self.execute(&mut report).await;
            report.final_state = self.state;

            let (sent, failed) = self.notifier.remote_stats();
            info!(
                final_state = %report.final_state,
                matched = report.matched,
                closed = report.closed.len(),
                failed = report.failed.len(),
                remote_sent = sent,
                remote_failed = failed,
                "run finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = %self.state, to = %next, "pipeline transition");
        self.state = next;
    }

    async fn say(&self, message: Message) {
        self.notifier.report(message).await;
    }

    async fn execute(&mut self, report: &mut RunReport) {
        self.say(Message::info("🤖 OANDA Trade Closer Bot: Script started.")).await;

        // ── Connecting ──────────────────────────────────────────────────
        self.transition(PipelineState::Connecting);
        let session = match self.broker.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.say(Message::fatal(format!(
                    "❌ FATAL: Could not connect to OANDA. {e}"
                )))
                .await;
                self.transition(PipelineState::Aborted);
                return;
            }
        };
        debug!(
            account_id = %session.account_id,
            balance = ?session.balance,
            nav = ?session.nav,
            "session established"
        );
        self.say(Message::info(connected_text(&session))).await;

        // ── Fetching ────────────────────────────────────────────────────
        self.transition(PipelineState::Fetching);
        let positions = match self.broker.list_open_positions(&session).await {
            Ok(positions) => positions,
            Err(e) => {
                self.say(Message::fatal(format!(
                    "❌ FATAL: Could not retrieve open trades from OANDA. {e}"
                )))
                .await;
                self.transition(PipelineState::Aborted);
                return;
            }
        };
        report.open_positions = positions.len();

        if positions.is_empty() {
            self.say(Message::info(
                "👍 No open trades found. Nothing to do. Script will now exit.",
            ))
            .await;
            self.transition(PipelineState::Done);
            return;
        }

        // ── Filtering ───────────────────────────────────────────────────
        self.transition(PipelineState::Filtering);
        let matches = select_matching(&positions, &self.target);
        report.matched = matches.len();
        self.say(Message::info(format!(
            "🔎 Found {} open trade(s). {} match '{}'.",
            positions.len(),
            matches.len(),
            self.target
        )))
        .await;

        // ── Closing ─────────────────────────────────────────────────────
        for (i, position) in matches.iter().enumerate() {
            self.transition(PipelineState::Closing(i));
            self.close_one(&session, position, report).await;
        }

        // ── Reporting ───────────────────────────────────────────────────
        self.transition(PipelineState::Reporting);
        self.say(Message::info(summary_text(report, &self.target))).await;
        self.transition(PipelineState::Done);
    }

    async fn close_one(&self, session: &Session, position: &Position, report: &mut RunReport) {
        let trade_id = &position.id;
        debug!(
            trade_id = %trade_id,
            side = %position.side,
            units = position.units,
            open_price = position.open_price,
            unrealized_pl = ?position.unrealized_pl,
            "closing matching trade"
        );
        self.say(Message::info(format!(
            "🎯 Found matching trade! Attempting to close Trade ID: {trade_id}..."
        )))
        .await;

        match self.broker.close_position(session, trade_id).await {
            Ok(result) => {
                self.say(Message::info(format!(
                    "✅ Successfully closed trade {trade_id}."
                )))
                .await;
                if let Some(pnl) = result.realized_pnl {
                    self.say(Message::info(format!("💰 P/L for trade {trade_id}: {pnl}")))
                        .await;
                }
                report.closed.push(result);
            }
            Err(e) => {
                let reason = e.reason();
                self.say(Message::error(format!(
                    "❌ ERROR: Failed to close trade {trade_id}. Reason: {reason}"
                )))
                .await;
                report.failed.push(CloseFailure {
                    trade_id: trade_id.clone(),
                    reason,
                });
            }
        }
    }
}

/// Positions on `target`, in fetch order, with any repeated id dropped so no
/// trade can be attempted twice in one run.
pub fn select_matching<'p>(positions: &'p [Position], target: &str) -> Vec<&'p Position> {
    let mut seen: HashSet<&TradeId> = HashSet::new();
    let mut selected = Vec::new();
    for position in positions.iter().filter(|p| p.instrument == target) {
        if seen.insert(&position.id) {
            selected.push(position);
        } else {
            warn!(trade_id = %position.id, "duplicate trade id in fetch, skipping");
        }
    }
    selected
}

fn connected_text(session: &Session) -> String {
    let mut text = format!(
        "✅ Successfully connected to OANDA {} account {}.",
        session.environment, session.account_id
    );
    if let Some(balance) = session.balance {
        let currency = session.currency.as_deref().unwrap_or("");
        text.push_str(&format!(" Balance: {balance:.2} {currency}"));
        text = text.trim_end().to_string();
    }
    text
}

fn summary_text(report: &RunReport, target: &str) -> String {
    if report.matched == 0 {
        return format!(
            "🏁 Finished: no open trades for '{target}' among {} open position(s).",
            report.open_positions
        );
    }

    let mut text = format!(
        "🏁 Finished: processed {} trade(s) for '{target}' ({} closed, {} failed).",
        report.processed(),
        report.closed.len(),
        report.failed.len()
    );
    if let Some(total) = report.realized_pnl() {
        text.push_str(&format!(" Total P/L: {total:.2}"));
    }
    text
}
