use chrono::Duration;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::registry::EligibilityCriteria;

/// Which instant the engine treats as "now" for cooldowns and `sent_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// `Utc::now()`.
    Wall,
    /// Timestamp of the newest event in the window being evaluated.
    Event,
}

impl FromStr for ClockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wall" => Ok(ClockMode::Wall),
            "event" => Ok(ClockMode::Event),
            other => Err(format!("unknown clock mode {other:?}")),
        }
    }
}

/// Longest accepted duration setting, one year.
const MAX_MINUTES: f64 = 525_600.0;

/// Thresholds for the consensus evaluator and suppression pipeline.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub min_consensus: usize,
    pub window: Duration,
    pub cooldown: Duration,
    pub conflict_window: Duration,
    pub min_total_position_usd: Decimal,
    /// Soft band: price <= band or >= 1 - band means the market is closing.
    pub price_band: Decimal,
    /// Hard band: price <= band or >= 1 - band means the market is settled.
    pub resolved_band: Decimal,
    pub max_entry_price_divergence: Decimal,
    pub clock: ClockMode,
    /// Send suppressed candidates to the reports channel.
    pub report_suppressed: bool,
    /// At most one suppressed report per (key, reason) within this span.
    pub suppressed_report_dedup: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_consensus: 3,
            window: minutes(20.0),
            cooldown: minutes(30.0),
            conflict_window: minutes(10.0),
            min_total_position_usd: Decimal::from(2_000),
            price_band: Decimal::new(2, 2),       // 0.02
            resolved_band: Decimal::new(1, 3),    // 0.001
            max_entry_price_divergence: Decimal::new(25, 2), // 0.25
            clock: ClockMode::Wall,
            report_suppressed: true,
            suppressed_report_dedup: minutes(30.0),
        }
    }
}

impl ConsensusConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut min_consensus = env_parse("MIN_CONSENSUS", 3usize);
        if min_consensus < 2 {
            tracing::warn!(min_consensus, "MIN_CONSENSUS below 2, forcing to 2");
            min_consensus = 2;
        }

        Self {
            min_consensus,
            window: env_minutes("ALERT_WINDOW_MIN", 20.0),
            cooldown: env_minutes("ALERT_COOLDOWN_MIN", 30.0),
            conflict_window: env_minutes("ALERT_CONFLICT_WINDOW_MIN", 10.0),
            min_total_position_usd: env_parse(
                "MIN_TOTAL_POSITION_USD",
                defaults.min_total_position_usd,
            ),
            price_band: env_parse("ALERT_PRICE_BAND", defaults.price_band),
            resolved_band: env_parse("ALERT_RESOLVED_BAND", defaults.resolved_band),
            max_entry_price_divergence: env_parse(
                "MAX_ENTRY_PRICE_DIVERGENCE",
                defaults.max_entry_price_divergence,
            ),
            clock: env_parse("ALERT_CLOCK", defaults.clock),
            report_suppressed: env_parse("REPORT_SUPPRESSED", defaults.report_suppressed),
            suppressed_report_dedup: env_minutes("SUPPRESSED_REPORT_DEDUP_MIN", 30.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_json: bool,

    pub consensus: ConsensusConfig,
    pub eligibility: EligibilityCriteria,

    // Engine
    pub engine_shards: usize,
    pub dispatch_queue_size: usize,
    pub registry_refresh_secs: u64,
    /// Registry entries older than this count as ineligible. 0 disables.
    pub registry_max_age_secs: u64,

    // Trade feed
    pub trade_poll_enabled: bool,
    pub trade_poll_interval_secs: u64,

    // Notifications
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    /// Suppressed candidates and periodic reports. Falls back to the alert chat.
    pub telegram_reports_chat_id: Option<String>,
    /// Interval of the suppression report. 0 disables.
    pub suppression_report_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            log_json: Self::log_json_from_env(),

            consensus: ConsensusConfig::from_env(),
            eligibility: EligibilityCriteria::from_env(),

            engine_shards: env_parse("ENGINE_SHARDS", 4usize).max(1),
            dispatch_queue_size: env_parse("DISPATCH_QUEUE_SIZE", 256usize).max(1),
            registry_refresh_secs: env_parse("REGISTRY_REFRESH_SECS", 300u64),
            registry_max_age_secs: env_parse("REGISTRY_MAX_AGE_SECS", 3_600u64),

            trade_poll_enabled: env_parse("TRADE_POLL_ENABLED", false),
            trade_poll_interval_secs: env_parse("TRADE_POLL_INTERVAL_SECS", 7u64),

            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
            telegram_reports_chat_id: env::var("TELEGRAM_REPORTS_CHAT_ID").ok(),
            suppression_report_secs: env_parse("SUPPRESSION_REPORT_SECS", 3_600u64),
        })
    }

    /// `LOG_FORMAT=json`. Read before the subscriber exists.
    pub fn log_json_from_env() -> bool {
        env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }
}

/// Convert fractional minutes into a chrono duration (millisecond precision).
pub fn minutes(m: f64) -> Duration {
    Duration::milliseconds((m * 60_000.0).round() as i64)
}

/// Read a duration in fractional minutes. Values that are not finite, not
/// positive, or longer than a year fall back to `default`.
pub fn env_minutes(key: &str, default: f64) -> Duration {
    let value = env_parse(key, default);
    if valid_minutes(value) {
        minutes(value)
    } else {
        tracing::warn!(key, value, default, "Invalid duration, using default");
        minutes(default)
    }
}

fn valid_minutes(m: f64) -> bool {
    m.is_finite() && m > 0.0 && m <= MAX_MINUTES
}

/// Read and parse an env var, ignoring inline `# comments`.
/// Missing or unparseable values fall back to `default`.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => parse_value(&raw).unwrap_or_else(|| {
            tracing::warn!(key, raw = %raw, default = ?default, "Invalid config value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    let value = raw.split('#').next().unwrap_or_default().trim();
    value.parse().ok()
}
