//! Configuration Module
//!
//! Provides TOML-based configuration for GatewayMQ with support for:
//! - Logging level
//! - Account servers, access cache and failed-login penalty
//! - Gateway / application authorization switches
//! - Static superusers
//! - Fan-out worker pool sizing
//! - Environment variable overrides (GATEWAYMQ__* prefix)

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::auth::Access;
use crate::topic::TopicPattern;


/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Session registry configuration
    pub sessions: SessionsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Account servers by alias (alias -> base URL)
    pub servers: HashMap<String, String>,
    /// How long a resolved access stays cached
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    /// Delay applied to every denied connect attempt
    #[serde(with = "humantime_serde")]
    pub penalty: Duration,
    /// Timeout for a single account server request
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Look up gateway rights
    pub gateways: bool,
    /// Look up application rights
    pub applications: bool,
    /// Statically configured superusers
    pub superusers: Vec<SuperUserConfig>,
}

fn default_cache_ttl() -> Duration {
    crate::auth::DEFAULT_CACHE_TTL
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            cache_ttl: default_cache_ttl(),
            penalty: Duration::ZERO,
            request_timeout: default_request_timeout(),
            gateways: false,
            applications: false,
            superusers: Vec::new(),
        }
    }
}

/// Predefined access a superuser can start from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessPreset {
    Root,
    Router,
    Handler,
}

/// Superuser configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SuperUserConfig {
    /// Username
    pub username: String,
    /// Password (compared in constant time)
    pub password: String,
    /// Starting access, extended by the fields below
    #[serde(default)]
    pub preset: Option<AccessPreset>,
    /// Grant root access
    #[serde(default)]
    pub root: bool,
    /// Subscription namespace
    #[serde(default)]
    pub read_prefix: String,
    /// Readable topic patterns
    #[serde(default)]
    pub read: Vec<TopicPattern>,
    /// Writable topic patterns
    #[serde(default)]
    pub write: Vec<TopicPattern>,
}

impl SuperUserConfig {
    /// Build the fixed access this superuser receives
    pub fn access(&self) -> Access {
        let mut access = match self.preset {
            Some(AccessPreset::Root) => Access::root(),
            Some(AccessPreset::Router) => Access::router(),
            Some(AccessPreset::Handler) => Access::handler(),
            None => Access::default(),
        };
        access.root |= self.root;
        if !self.read_prefix.is_empty() {
            access.read_prefix = self.read_prefix.clone();
        }
        access.read.extend(self.read.iter().cloned());
        access.write.extend(self.write.iter().cloned());
        access
    }
}

/// Session registry configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionsConfig {
    /// Number of fan-out workers (0 = available parallelism)
    pub workers: usize,
}

impl SessionsConfig {
    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `GATEWAYMQ__` prefix with double underscores for nesting:
    ///    - `GATEWAYMQ__LOG__LEVEL=debug` overrides `log.level`
    ///    - `GATEWAYMQ__AUTH__GATEWAYS=true` overrides `auth.gateways`
    ///    - `GATEWAYMQ__SESSIONS__WORKERS=8` overrides `sessions.workers`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "warn")?
            .set_default("auth.cache_ttl", "1m")?
            .set_default("auth.penalty", "0s")?
            .set_default("auth.request_timeout", "5s")?
            .set_default("auth.gateways", false)?
            .set_default("auth.applications", false)?
            .set_default("sessions.workers", 0)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (GATEWAYMQ__AUTH__PENALTY, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("GATEWAYMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (alias, base) in &self.auth.servers {
            if alias.is_empty() || alias.contains('.') {
                return Err(ConfigError::Validation(format!(
                    "Account server alias '{}' must be non-empty and must not contain '.'",
                    alias
                )));
            }
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "Account server '{}' has invalid base URL '{}'",
                    alias, base
                )));
            }
        }

        if (self.auth.gateways || self.auth.applications) && self.auth.servers.is_empty() {
            return Err(ConfigError::Validation(
                "At least one account server is required when gateway or application auth is enabled"
                    .to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.auth.superusers {
            if user.username.is_empty() {
                return Err(ConfigError::Validation(
                    "Superuser username cannot be empty".to_string(),
                ));
            }
            if user.password.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Superuser '{}' has empty password",
                    user.username
                )));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Superuser '{}' is defined more than once",
                    user.username
                )));
            }
        }

        Ok(())
    }
}
