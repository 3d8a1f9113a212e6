// =============================================================================
// OANDA Trade Closer — Main Entry Point
// =============================================================================
//
// Runs once and exits: load config, connect, close every open trade on the
// configured instrument, report each step to the console (and Telegram when
// configured). Exit status is 0 for a completed run and 1 when the run was
// aborted before any trade could be touched.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod config;
mod error;
mod notifier;
mod oanda;
mod pipeline;
mod types;

#[cfg(test)]
mod http_stub;

use std::process::ExitCode;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Settings, DEFAULT_CONFIG_PATH};
use crate::notifier::{ConsoleSink, Notifier};
use crate::oanda::OandaClient;
use crate::pipeline::Pipeline;
use crate::types::Message;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("OANDA Trade Closer starting");

    // ── 2. Configuration ─────────────────────────────────────────────────
    let config_path =
        std::env::var("TRADE_CLOSER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let mut settings = Settings::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config file, using defaults");
        Settings::default()
    });
    let env_result = settings.apply_env();

    // ── 3. Notifier (needed before anything can be reported) ─────────────
    let notifier = Notifier::configure(Box::new(ConsoleSink), &settings.telegram);

    let validated = match env_result.and_then(|()| settings.validate()) {
        Ok(v) => v,
        Err(e) => {
            notifier
                .report(Message::fatal(format!("❌ FATAL: Configuration error. {e}")))
                .await;
            return Ok(ExitCode::FAILURE);
        }
    };

    info!(
        account_id = %validated.oanda.account_id,
        environment = %validated.oanda.environment,
        instrument = %validated.instrument,
        remote = notifier.remote_enabled(),
        "configuration ready"
    );

    // ── 4. Broker client ─────────────────────────────────────────────────
    let client = match OandaClient::new(&validated.oanda) {
        Ok(c) => c,
        Err(e) => {
            notifier
                .report(Message::fatal(format!("❌ FATAL: Could not set up the OANDA client. {e:#}")))
                .await;
            return Ok(ExitCode::FAILURE);
        }
    };

    // ── 5. Run ───────────────────────────────────────────────────────────
    let report = Pipeline::new(&client, &notifier, validated.instrument.as_str())
        .run()
        .await;

    if report.aborted() {
        return Ok(ExitCode::FAILURE);
    }

    for failure in &report.failed {
        warn!(trade_id = %failure.trade_id, reason = %failure.reason, "trade left open");
    }

    Ok(ExitCode::SUCCESS)
}
