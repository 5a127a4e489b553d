use crate::error::AppError;
use crate::market::types::{normalize_symbol, Interval, SubscriptionKey};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8080";
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_INTERVAL: Interval = Interval::M1;
pub const DEFAULT_HISTORY_LIMIT: u16 = 500;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 16;
pub const MIN_HISTORY_LIMIT: u16 = 1;
pub const MAX_HISTORY_LIMIT: u16 = 1_000;
pub const MIN_RECONNECT_DELAY_MS: u64 = 100;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_EMIT_INTERVAL_MS: u64 = 8;
pub const MAX_EMIT_INTERVAL_MS: u64 = 1_000;

const ENV_BACKEND_URL: &str = "MARKET_BACKEND_URL";
const ENV_SYMBOL: &str = "DEFAULT_SYMBOL";
const ENV_INTERVAL: &str = "DEFAULT_INTERVAL";
const ENV_HISTORY_LIMIT: &str = "HISTORY_LIMIT";
const ENV_RECONNECT_DELAY_SECS: &str = "WS_RECONNECT_DELAY";
const ENV_EMIT_INTERVAL_MS: &str = "EMIT_INTERVAL_MS";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncArgs {
    pub backend_url: Option<String>,
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub history_limit: Option<u16>,
    pub reconnect_delay_ms: Option<u64>,
    pub emit_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backend_url: String,
    pub stream_base_url: String,
    pub default_key: SubscriptionKey,
    pub history_limit: u16,
    pub reconnect_delay: Duration,
    pub emit_interval: Duration,
}

impl SyncArgs {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let history_limit = parse_env_number::<u16>(ENV_HISTORY_LIMIT, lookup(ENV_HISTORY_LIMIT))?;
        let reconnect_delay_secs =
            parse_env_number::<u64>(ENV_RECONNECT_DELAY_SECS, lookup(ENV_RECONNECT_DELAY_SECS))?;
        let emit_interval_ms =
            parse_env_number::<u64>(ENV_EMIT_INTERVAL_MS, lookup(ENV_EMIT_INTERVAL_MS))?;

        Ok(Self {
            backend_url: lookup(ENV_BACKEND_URL),
            symbol: lookup(ENV_SYMBOL),
            interval: lookup(ENV_INTERVAL),
            history_limit,
            reconnect_delay_ms: reconnect_delay_secs.map(|secs| secs.saturating_mul(1_000)),
            emit_interval_ms,
        })
    }

    pub fn normalize(self) -> Result<SyncConfig, AppError> {
        let backend_url = self
            .backend_url
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let stream_base_url = stream_base_url(&backend_url)?;

        let symbol = normalize_symbol(self.symbol.as_deref().unwrap_or(DEFAULT_SYMBOL))?;
        let interval = match self.interval {
            Some(raw) => raw.parse::<Interval>()?,
            None => DEFAULT_INTERVAL,
        };

        let history_limit = self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if !(MIN_HISTORY_LIMIT..=MAX_HISTORY_LIMIT).contains(&history_limit) {
            return Err(AppError::InvalidArgument(format!(
                "historyLimit must be between {MIN_HISTORY_LIMIT} and {MAX_HISTORY_LIMIT}"
            )));
        }

        let reconnect_delay_ms = self
            .reconnect_delay_ms
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if !(MIN_RECONNECT_DELAY_MS..=MAX_RECONNECT_DELAY_MS).contains(&reconnect_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be between {MIN_RECONNECT_DELAY_MS} and {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        let emit_interval_ms = self.emit_interval_ms.unwrap_or(DEFAULT_EMIT_INTERVAL_MS);
        if !(MIN_EMIT_INTERVAL_MS..=MAX_EMIT_INTERVAL_MS).contains(&emit_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "emitIntervalMs must be between {MIN_EMIT_INTERVAL_MS} and {MAX_EMIT_INTERVAL_MS}"
            )));
        }

        Ok(SyncConfig {
            backend_url,
            stream_base_url,
            default_key: SubscriptionKey { symbol, interval },
            history_limit,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            emit_interval: Duration::from_millis(emit_interval_ms),
        })
    }
}

fn parse_env_number<T>(name: &str, raw: Option<String>) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
{
    match raw {
        None => Ok(None),
        Some(value) => value.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::InvalidArgument(format!("{name} must be a non-negative integer"))
        }),
    }
}

fn stream_base_url(backend_url: &str) -> Result<String, AppError> {
    if let Some(rest) = backend_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if let Some(rest) = backend_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    Err(AppError::InvalidArgument(
        "backendUrl must start with http:// or https://".to_string(),
    ))
}
