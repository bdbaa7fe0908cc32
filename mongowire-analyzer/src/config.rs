//! Analyzer configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MONGOWIRE_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the binary)

use mongowire_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Reads from standard input when used as the capture source.
pub const STDIN_SOURCE: &str = "-";

/// Analyzer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture input.
    pub capture: CaptureConfig,
    /// Console output of decoded operations.
    pub output: OutputConfig,
    /// StatsD counter export.
    pub statsd: StatsdConfig,
    /// Prometheus endpoint.
    pub metrics: MetricsConfig,
    /// Message parsing.
    pub parser: ParserConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`Config::load`], with an explicit file taking precedence over
    /// MONGOWIRE_CONFIG.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var("MONGOWIRE_CONFIG") {
                Ok(path) => Self::from_file(path)?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.capture.apply_env_overrides();
        self.output.apply_env_overrides();
        self.statsd.apply_env_overrides();
        self.metrics.apply_env_overrides();
        self.parser.apply_env_overrides();
    }

    /// Checks settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.port == 0 {
            return Err(ConfigError::ValidationError(
                "capture.port must be non-zero".into(),
            ));
        }
        if self.capture.source.is_empty() {
            return Err(ConfigError::ValidationError(
                "capture.source must be a path or '-'".into(),
            ));
        }
        if self.statsd.enabled {
            if self.statsd.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "statsd.host is required when statsd is enabled".into(),
                ));
            }
            if self.statsd.port == 0 {
                return Err(ConfigError::ValidationError(
                    "statsd.port must be non-zero".into(),
                ));
            }
        }
        if self.parser.workers == 0 {
            return Err(ConfigError::ValidationError(
                "parser.workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Capture input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// pcap file to read, or "-" for standard input.
    pub source: String,
    /// Server port; only payloads sent to it are analyzed.
    pub port: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: STDIN_SOURCE.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl CaptureConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(source) = std::env::var("MONGOWIRE_SOURCE") {
            self.source = source;
        }
        if let Some(port) = env_parse("MONGOWIRE_PORT") {
            self.port = port;
        }
    }

    pub fn is_stdin(&self) -> bool {
        self.source == STDIN_SOURCE
    }
}

/// Console output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print every decoded operation as a JSON line.
    pub stdout: bool,
}

impl OutputConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(stdout) = env_flag("MONGOWIRE_STDOUT") {
            self.stdout = stdout;
        }
    }
}

/// StatsD export configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Prepended to every counter name, joined with '.'.
    pub prefix: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 8125,
            prefix: "mongodb.wirestats".to_string(),
        }
    }
}

impl StatsdConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MONGOWIRE_STATSD_HOST") {
            self.enabled = !host.is_empty();
            self.host = host;
        }
        if let Some(port) = env_parse("MONGOWIRE_STATSD_PORT") {
            self.port = port;
        }
        if let Ok(prefix) = std::env::var("MONGOWIRE_STATSD_PREFIX") {
            self.prefix = prefix;
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(enabled) = env_flag("MONGOWIRE_METRICS_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(addr) = env_parse("MONGOWIRE_METRICS_BIND") {
            self.bind_addr = addr;
        }
    }
}

/// Parser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Read the optional trailing document of OP_QUERY.
    pub return_fields_selector: bool,
    /// Parallel parse workers.
    pub workers: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            return_fields_selector: true,
            workers: 1,
        }
    }
}

impl ParserConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(enabled) = env_flag("MONGOWIRE_RETURN_FIELDS_SELECTOR") {
            self.return_fields_selector = enabled;
        }
        if let Some(workers) = env_parse("MONGOWIRE_WORKERS") {
            self.workers = workers;
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
