use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default zone for owners that never picked one.
pub const DEFAULT_TIMEZONE: &str = "Europe/Moscow";
/// How long before a date-bound appointment the advance reminder goes out.
pub const DEFAULT_ANALYSIS_LEAD_MINUTES: u32 = 120;
/// Env var consulted when no `--config` path is passed.
pub const CONFIG_ENV_VAR: &str = "PILLBOX_CONFIG";

/// Top-level config (pillbox.toml + PILLBOX_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment, e.g.
/// `PILLBOX_DELIVERY__MAX_ATTEMPTS=5`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PillboxConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the engine polls the job table for due jobs.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Jobs due longer ago than this are dropped as misfires.
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
    /// Capacity of the fired-job channel between engine and dispatcher.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn misfire_grace(&self) -> Duration {
        Duration::from_secs(self.misfire_grace_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            misfire_grace_secs: default_misfire_grace_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff: attempt `n` waits `n * backoff_base_ms` before retrying.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl DeliveryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum concurrent sends across all owners.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Minimum spacing between two sends to the same owner.
    #[serde(default = "default_per_owner_interval_ms")]
    pub per_owner_interval_ms: u64,
}

impl RateLimitConfig {
    pub fn per_owner_interval(&self) -> Duration {
        Duration::from_millis(self.per_owner_interval_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_concurrency: default_global_concurrency(),
            per_owner_interval_ms: default_per_owner_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Run one sweep before the engine starts.
    #[serde(default = "bool_true")]
    pub on_startup: bool,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// When unset the daemon logs notifications instead of sending them.
    pub bot_token: Option<String>,
    #[serde(default = "bool_true")]
    pub parse_mode_markdown: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            parse_mode_markdown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_analysis_lead_minutes")]
    pub analysis_lead_minutes: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            analysis_lead_minutes: default_analysis_lead_minutes(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_misfire_grace_secs() -> u64 {
    3_600
}
fn default_channel_capacity() -> usize {
    256
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    5_000
}
fn default_global_concurrency() -> usize {
    30
}
fn default_per_owner_interval_ms() -> u64 {
    1_000
}
fn default_sweep_interval_secs() -> u64 {
    1_800
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_analysis_lead_minutes() -> u32 {
    DEFAULT_ANALYSIS_LEAD_MINUTES
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pillbox/pillbox.db", home)
}

impl PillboxConfig {
    /// Load config from a TOML file with PILLBOX_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. $PILLBOX_CONFIG
    ///   3. ~/.pillbox/pillbox.toml
    ///
    /// A missing file is not an error; defaults fill every field.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
            .unwrap_or_else(default_config_path);

        let config: PillboxConfig = Figment::from(Serialized::defaults(PillboxConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PILLBOX_").ignore(&["config"]).split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the runtime.
    pub fn validate(&self) -> crate::error::Result<()> {
        let bad = |msg: &str| Err(CoreError::Config(msg.to_string()));
        if self.delivery.max_attempts == 0 {
            return bad("delivery.max_attempts must be at least 1");
        }
        if self.rate_limit.global_concurrency == 0 {
            return bad("rate_limit.global_concurrency must be at least 1");
        }
        if self.scheduler.poll_interval_ms == 0 {
            return bad("scheduler.poll_interval_ms must be positive");
        }
        if self.scheduler.channel_capacity == 0 {
            return bad("scheduler.channel_capacity must be positive");
        }
        if self.sweep.interval_secs == 0 {
            return bad("sweep.interval_secs must be positive");
        }
        // A postponement restored by the sweep must still be inside the
        // grace window, or it is failed as overdue instead of delivered.
        if self.sweep.interval_secs >= self.scheduler.misfire_grace_secs {
            return bad("sweep.interval_secs must be shorter than scheduler.misfire_grace_secs");
        }
        crate::time::parse_zone(&self.defaults.timezone)?;
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.pillbox/pillbox.toml", home)
}
