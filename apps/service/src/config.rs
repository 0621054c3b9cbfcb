use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::CheckMode;
use crate::orchestrator::plans::PlanRules;

/// Longest accepted plan interval, one year.
pub const MAX_CHECK_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteFailed {
        path: path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("No config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub probe: ProbeConfig,
    pub orchestrator: OrchestratorConfig,
    pub alerts: AlertsConfig,
    pub retention: RetentionConfig,
    pub plans: PlansConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token the external prober fleet must present
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
    pub task_timeout_secs: u64,
    /// Reservations older than this are handed to another worker
    pub visibility_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: CheckMode,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram: TelegramConfig,
    pub email: EmailApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
}

/// Transactional mail HTTP API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailApiConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u32,
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlansConfig {
    pub default_plan: String,
    pub rules: BTreeMap<String, PlanRules>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("data/uptrack.db"), pool_size: 8 }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1".into(), port: 8080, api_token: None }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            poll_interval_ms: 500,
            max_attempts: 3,
            task_timeout_secs: 30,
            visibility_timeout_secs: 120,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { mode: CheckMode::Local, sweep_interval_secs: 60 }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self { api_base: "https://api.telegram.org".into(), bot_token: None }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { days: 30, interval_secs: 3600 }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "free".to_string(),
            PlanRules { max_domains: 50, check_interval_secs: 3600, ssl_check: false },
        );
        rules.insert(
            "pro".to_string(),
            PlanRules { max_domains: 1000, check_interval_secs: 300, ssl_check: true },
        );
        Self { default_plan: "free".into(), rules }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uptrack/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uptrack/config.toml"))
}

fn display_optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<unset>")
}

fn display_secret(value: &Option<String>) -> &'static str {
    if value.is_some() { "<set>" } else { "<unset>" }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_1(f, "API Token", &display_secret(&self.server.api_token))?;

        write_title_1(f, "Worker")?;
        write_1(f, "Concurrency", &self.worker.concurrency)?;
        write_1(f, "Max Attempts", &self.worker.max_attempts)?;
        write_1(f, "Task Timeout (s)", &self.worker.task_timeout_secs)?;

        write_title_1(f, "Orchestrator")?;
        write_1(f, "Mode", &self.orchestrator.mode)?;
        write_1(f, "Sweep Interval (s)", &self.orchestrator.sweep_interval_secs)?;

        write_title_1(f, "Alerts")?;
        write_1(f, "Telegram Bot Token", &display_secret(&self.alerts.telegram.bot_token))?;
        write_1(f, "Email API", &display_optional(&self.alerts.email.api_url))?;

        write_title_1(f, "Plans")?;
        write_1(f, "Default", &self.plans.default_plan)?;
        for (name, rules) in &self.plans.rules {
            write_1(
                f,
                name,
                &format!(
                    "{} domains, every {}s, ssl {}",
                    rules.max_domains, rules.check_interval_secs, rules.ssl_check
                ),
            )?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uptrack/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied afterwards.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| ConfigError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// `UPTRACK_API_TOKEN` and `UPTRACK_DATABASE_PATH` win over the file.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("UPTRACK_API_TOKEN").filter(|t| !t.is_empty()) {
            self.server.api_token = Some(token);
        }
        if let Some(db_path) = lookup("UPTRACK_DATABASE_PATH").filter(|p| !p.is_empty()) {
            self.database.path = path::PathBuf::from(db_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid("worker.concurrency must be at least 1".into()));
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::Invalid("worker.max_attempts must be at least 1".into()));
        }
        if self.database.pool_size == 0 {
            return Err(ConfigError::Invalid("database.pool_size must be at least 1".into()));
        }
        for (plan, rules) in &self.plans.rules {
            if !(1..=MAX_CHECK_INTERVAL_SECS).contains(&rules.check_interval_secs) {
                return Err(ConfigError::Invalid(format!(
                    "plans.rules.{plan}.check_interval_secs must be between 1 and {MAX_CHECK_INTERVAL_SECS}"
                )));
            }
        }
        if !self.plans.rules.contains_key(&self.plans.default_plan) {
            return Err(ConfigError::Invalid(format!(
                "default plan '{}' has no rules",
                self.plans.default_plan
            )));
        }
        Ok(())
    }
}
