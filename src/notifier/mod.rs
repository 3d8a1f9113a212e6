// =============================================================================
// Notifier — every report line to the local sink, then best-effort remote
// =============================================================================
//
// Delivery rules:
//   1. The local sink is written first and cannot fail.
//   2. The remote sink (if configured) gets one bounded attempt per line.
//   3. A remote failure produces exactly one local diagnostic line, written
//      straight to the local sink and never through `report`.
//   4. Lines are delivered in call order; nothing is batched or dropped
//      locally.
// =============================================================================

pub mod console;
pub mod telegram;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::config::TelegramSettings;
use crate::error::NotificationError;
use crate::types::{Message, Severity};

pub use console::ConsoleSink;
pub use telegram::TelegramSink;

/// A terminal that always accepts a line.
pub trait LocalSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// A remote channel that may fail or time out.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotificationError>;
}

/// Dual-sink reporter handed to the pipeline by reference.
pub struct Notifier {
    local: Box<dyn LocalSink>,
    remote: Option<Box<dyn RemoteSink>>,
    remote_sent: AtomicU32,
    remote_failed: AtomicU32,
}

impl Notifier {
    /// Build a notifier from explicit sinks.
    pub fn new(local: Box<dyn LocalSink>, remote: Option<Box<dyn RemoteSink>>) -> Self {
        Self {
            local,
            remote,
            remote_sent: AtomicU32::new(0),
            remote_failed: AtomicU32::new(0),
        }
    }

    /// Build a notifier from Telegram settings.
    ///
    /// Missing or incomplete credentials, or a sink that cannot be built,
    /// leave the notifier in local-only mode with a single warning line on
    /// the local sink. This never fails.
    pub fn configure(local: Box<dyn LocalSink>, telegram: &TelegramSettings) -> Self {
        Self::configure_with(local, telegram, |token, chat_id, timeout| {
            let sink = TelegramSink::new(token, chat_id, timeout)?;
            Ok(Box::new(sink) as Box<dyn RemoteSink>)
        })
    }

    fn configure_with<F>(local: Box<dyn LocalSink>, telegram: &TelegramSettings, build: F) -> Self
    where
        F: FnOnce(&str, &str, Duration) -> anyhow::Result<Box<dyn RemoteSink>>,
    {
        let Some((token, chat_id)) = telegram.credentials() else {
            warn!("Telegram credentials missing, reporting to console only");
            local.emit("[!] Telegram credentials not found or incomplete. Reporting to console only.");
            return Self::new(local, None);
        };

        match build(token, chat_id, telegram.timeout()) {
            Ok(sink) => {
                info!(chat_id, timeout_secs = telegram.timeout_secs, "Telegram reporting enabled");
                Self::new(local, Some(sink))
            }
            Err(e) => {
                warn!(error = %e, "Telegram sink could not be built, reporting to console only");
                local.emit(&format!(
                    "[!] Telegram is configured but could not be set up ({e:#}). Reporting to console only."
                ));
                Self::new(local, None)
            }
        }
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Deliver one message to both sinks, in that order.
    pub async fn report(&self, message: Message) {
        let line = message.render();

        match message.severity {
            Severity::Info => debug!(text = %message.text, "report"),
            Severity::Error => warn!(text = %message.text, "report"),
            Severity::Fatal => error!(text = %message.text, "report"),
        }

        self.local.emit(&line);

        let Some(remote) = &self.remote else {
            return;
        };

        match remote.send(&line).await {
            Ok(()) => {
                self.remote_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.remote_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "remote notification dropped");
                self.local
                    .emit(&format!("[!] Failed to send Telegram message: {e}"));
            }
        }
    }

    /// (sent, failed) remote delivery counts so far.
    pub fn remote_stats(&self) -> (u32, u32) {
        (
            self.remote_sent.load(Ordering::Relaxed),
            self.remote_failed.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("remote_enabled", &self.remote_enabled())
            .field("remote_stats", &self.remote_stats())
            .finish()
    }
}
