use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_LOG_FILTER: &str = "cadence=info,cadence_scheduler=info";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tick engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Polling period of the tick loop in milliseconds (default: 10 000).
    /// Override with env var: CADENCE_SCHEDULER__TICK_INTERVAL_MS=500
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Run the due jobs of one tick as concurrent futures (default: true).
    /// When false they are dispatched one after another in due order.
    #[serde(default = "bool_true")]
    pub dispatch_concurrently: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            dispatch_concurrently: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive, used when RUST_LOG is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
fn bool_true() -> bool {
    true
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.cadence/cadence.toml
    ///
    /// A missing file is not an error; defaults fill every absent key.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract::<CadenceConfig>()
            .map_err(|e| CadenceError::Config(e.to_string()))?
            .validated()
    }

    fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CADENCE_").ignore(&["config"]).split("__"))
    }

    /// Reject values the engine cannot run with.
    pub fn validated(self) -> Result<Self> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(CadenceError::Config(
                "scheduler.tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
