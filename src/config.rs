// =============================================================================
// Configuration — JSON file plus environment overrides, validated once
// =============================================================================
//
// Everything is read exactly once at startup into a `Settings` value and then
// handed to the broker and notifier constructors. All fields carry
// `#[serde(default)]` so a partial (or absent) file still loads; the
// environment is applied on top and always wins.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "trade_closer.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_notify_timeout_secs() -> u64 {
    10
}

// =============================================================================
// OANDA
// =============================================================================

/// Which OANDA deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OandaEnvironment {
    Practice,
    Live,
}

impl Default for OandaEnvironment {
    fn default() -> Self {
        Self::Practice
    }
}

impl OandaEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Practice => "https://api-fxpractice.oanda.com",
            Self::Live => "https://api-fxtrade.oanda.com",
        }
    }
}

impl std::fmt::Display for OandaEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Practice => write!(f, "practice"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for OandaEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "practice" | "demo" => Ok(Self::Practice),
            "live" | "trade" => Ok(Self::Live),
            other => Err(ConfigError::Invalid {
                field: "OANDA_ENVIRONMENT",
                reason: format!("expected 'practice' or 'live', got '{other}'"),
            }),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct OandaSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub environment: OandaEnvironment,
    /// Per-request timeout for every brokerage call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for OandaSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            account_id: None,
            environment: OandaEnvironment::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for OandaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OandaSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("account_id", &self.account_id)
            .field("environment", &self.environment)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Validated credentials for one OANDA account.
#[derive(Clone)]
pub struct OandaCredentials {
    pub api_key: String,
    pub account_id: String,
    pub environment: OandaEnvironment,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for OandaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OandaCredentials")
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("environment", &self.environment)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Telegram
// =============================================================================

#[derive(Clone, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl TelegramSettings {
    /// Both halves of the credential pair, or `None` if either is missing or
    /// blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let token = non_blank(self.bot_token.as_deref())?;
        let chat = non_blank(self.chat_id.as_deref())?;
        Some((token, chat))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level settings for one run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub oanda: OandaSettings,

    /// Instrument whose open trades are closed, e.g. "NAS100_USD".
    #[serde(default)]
    pub instrument: Option<String>,

    #[serde(default)]
    pub telegram: TelegramSettings,
}

/// Everything the pipeline needs once configuration has been checked.
#[derive(Debug, Clone)]
pub struct ValidatedSettings {
    pub oanda: OandaCredentials,
    pub instrument: String,
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    ///
    /// A missing file is not an error: defaults are returned so that a
    /// purely environment-driven setup keeps working.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            environment = %settings.oanda.environment,
            "config file loaded"
        );

        Ok(settings)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in
    /// production, a map in tests). Blank values are ignored.
    ///
    /// Every override is applied even when one of them is invalid, so the
    /// Telegram credentials are in place to report the error; the first
    /// invalid value is returned afterwards.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OANDA_API_KEY") {
            self.oanda.api_key = Some(v);
        }
        if let Some(v) = get("OANDA_ACCOUNT_ID") {
            self.oanda.account_id = Some(v);
        }
        let mut invalid = None;
        if let Some(v) = get("OANDA_ENVIRONMENT") {
            match v.parse() {
                Ok(environment) => self.oanda.environment = environment,
                Err(e) => invalid = Some(e),
            }
        }
        if let Some(v) = get("OANDA_INSTRUMENT") {
            self.instrument = Some(v);
        }
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = Some(v);
        }

        match invalid {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check that the brokerage half of the configuration is complete.
    /// Telegram settings are optional and never fail validation.
    pub fn validate(&self) -> std::result::Result<ValidatedSettings, ConfigError> {
        let api_key = non_blank(self.oanda.api_key.as_deref())
            .ok_or(ConfigError::Missing("OANDA_API_KEY"))?;
        let account_id = non_blank(self.oanda.account_id.as_deref())
            .ok_or(ConfigError::Missing("OANDA_ACCOUNT_ID"))?;
        let raw_instrument = non_blank(self.instrument.as_deref())
            .ok_or(ConfigError::Missing("OANDA_INSTRUMENT"))?;

        if self.oanda.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(ValidatedSettings {
            oanda: OandaCredentials {
                api_key: api_key.to_string(),
                account_id: account_id.to_string(),
                environment: self.oanda.environment,
                request_timeout: Duration::from_secs(self.oanda.request_timeout_secs),
            },
            instrument: normalize_instrument(raw_instrument),
        })
    }
}

/// Canonical OANDA instrument name: upper case, `_` separated.
///
/// `eur/usd`, `EUR-USD` and `eurusd` all become `EUR_USD`. Only a bare
/// six-letter pair is split; anything else (`NAS100_USD`, `SPX500`) is just
/// upper-cased.
pub fn normalize_instrument(raw: &str) -> String {
    let formatted = raw.trim().to_uppercase().replace(['/', '-'], "_");
    if formatted.len() == 6 && formatted.bytes().all(|b| b.is_ascii_alphabetic()) {
        format!("{}_{}", &formatted[..3], &formatted[3..])
    } else {
        formatted
    }
}

fn non_blank(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s.oanda.environment, OandaEnvironment::Practice);
        assert_eq!(s.oanda.request_timeout_secs, 30);
        assert_eq!(s.telegram.timeout_secs, 10);
        assert!(s.instrument.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "oanda": { "environment": "live" }, "instrument": "NAS100_USD" }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.oanda.environment, OandaEnvironment::Live);
        assert_eq!(s.oanda.request_timeout_secs, 30);
        assert_eq!(s.instrument.as_deref(), Some("NAS100_USD"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut s = Settings {
            instrument: Some("EUR_USD".into()),
            ..Default::default()
        };
        s.apply_overrides(env(&[
            ("OANDA_API_KEY", "key"),
            ("OANDA_ACCOUNT_ID", "101-001-1"),
            ("OANDA_INSTRUMENT", "NAS100_USD"),
            ("OANDA_ENVIRONMENT", "live"),
            ("TELEGRAM_CHAT_ID", "   "),
        ]))
        .unwrap();

        assert_eq!(s.instrument.as_deref(), Some("NAS100_USD"));
        assert_eq!(s.oanda.environment, OandaEnvironment::Live);
        assert!(s.telegram.chat_id.is_none());

        let v = s.validate().unwrap();
        assert_eq!(v.oanda.account_id, "101-001-1");
        assert_eq!(v.instrument, "NAS100_USD");
        assert_eq!(v.oanda.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn bad_environment_is_rejected() {
        let mut s = Settings::default();
        let err = s
            .apply_overrides(env(&[("OANDA_ENVIRONMENT", "sandbox")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "OANDA_ENVIRONMENT", .. }));
    }

    #[test]
    fn bad_environment_still_applies_the_other_overrides() {
        let mut s = Settings::default();
        let err = s
            .apply_overrides(env(&[
                ("OANDA_ENVIRONMENT", "sandbox"),
                ("TELEGRAM_BOT_TOKEN", "t"),
                ("TELEGRAM_CHAT_ID", "42"),
                ("OANDA_INSTRUMENT", "NAS100_USD"),
            ]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { field: "OANDA_ENVIRONMENT", .. }));
        assert_eq!(s.telegram.credentials(), Some(("t", "42")));
        assert_eq!(s.instrument.as_deref(), Some("NAS100_USD"));
        assert_eq!(s.oanda.environment, OandaEnvironment::Practice);
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let mut s = Settings::default();
        assert_eq!(s.validate().unwrap_err(), ConfigError::Missing("OANDA_API_KEY"));

        s.oanda.api_key = Some("k".into());
        s.oanda.account_id = Some("a".into());
        assert_eq!(s.validate().unwrap_err(), ConfigError::Missing("OANDA_INSTRUMENT"));
    }

    #[test]
    fn telegram_credentials_need_both_halves() {
        let mut t = TelegramSettings::default();
        assert!(t.credentials().is_none());
        t.bot_token = Some("token".into());
        assert!(t.credentials().is_none());
        t.chat_id = Some("42".into());
        assert_eq!(t.credentials(), Some(("token", "42")));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut s = Settings::default();
        s.oanda.api_key = Some("super-secret".into());
        s.telegram.bot_token = Some("bot-secret".into());
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(!dbg.contains("bot-secret"));
    }

    #[test]
    fn instrument_names_are_normalised() {
        assert_eq!(normalize_instrument("eur/usd"), "EUR_USD");
        assert_eq!(normalize_instrument("EUR-USD"), "EUR_USD");
        assert_eq!(normalize_instrument("eurusd"), "EUR_USD");
        assert_eq!(normalize_instrument(" nas100_usd "), "NAS100_USD");
        assert_eq!(normalize_instrument("XAU_USD"), "XAU_USD");
        assert_eq!(normalize_instrument("NAS100USD"), "NAS100USD");
        assert_eq!(normalize_instrument("spx500"), "SPX500");
        assert_eq!(normalize_instrument("US30"), "US30");
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let s = Settings::load("/nonexistent/trade_closer.json").unwrap();
        assert!(s.oanda.api_key.is_none());
    }
}
