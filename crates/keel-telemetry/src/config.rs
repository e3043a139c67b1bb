//! Telemetry configuration and management

use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::Level;

/// Default maximum number of pushed context layers per unit of work.
pub const DEFAULT_MAX_CONTEXT_DEPTH: usize = 10;

/// Default maximum recursion depth of the redaction engine.
pub const DEFAULT_MAX_REDACTION_DEPTH: usize = 10;

/// Default marker substituted for sensitive values.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

/// Main telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Global enable/disable toggle
    pub enabled: bool,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Context stack settings
    pub context: ContextConfig,

    /// Privacy and redaction settings
    pub privacy: PrivacyConfig,

    /// Service identity reported by cloud formatters
    pub service: ServiceConfig,
}

/// Logging-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level that reaches the sink
    pub level: LogLevel,

    /// Output schema; auto-detected from the environment when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,

    /// Hand rendered records to a background writer thread
    pub async_emission: bool,

    /// ANSI colors in the console format
    pub colorize: bool,

    /// Strings longer than this many characters are truncated
    pub max_value_length: usize,

    /// Include file/line call-site information
    pub include_location: bool,
}

/// Context stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum number of layers a unit of work may push
    pub max_depth: usize,
}

/// Privacy and redaction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Enable redaction of assembled records
    pub sanitize_enabled: bool,

    /// Extra field names treated as sensitive (case-insensitive substring match)
    pub sensitive_fields: Vec<String>,

    /// Extra regex patterns matched against field names
    pub additional_sensitive_patterns: Vec<String>,

    /// Field names that are never redacted (case-insensitive exact match)
    pub excluded_fields: Vec<String>,

    /// Scan string values for secrets regardless of their field name
    pub sensitive_value_detection: bool,

    /// Regex patterns used when value detection is enabled
    pub value_patterns: Vec<String>,

    /// Maximum recursion depth before a subtree is redacted outright
    pub max_depth: usize,

    /// Replacement for sensitive values
    pub redaction_marker: String,
}

/// Service identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Upper-case name used by the console and JSON formats
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" | "FATAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

/// Log output schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line
    Console,
    /// Generic structured JSON
    Json,
    /// Google Cloud Logging / Error Reporting
    Gcp,
    /// AWS CloudWatch
    Aws,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Console => "console",
            LogFormat::Json => "json",
            LogFormat::Gcp => "gcp",
            LogFormat::Aws => "aws",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "console" | "pretty" | "text" => Some(LogFormat::Console),
            "json" => Some(LogFormat::Json),
            "gcp" | "google" | "stackdriver" => Some(LogFormat::Gcp),
            "aws" | "cloudwatch" => Some(LogFormat::Aws),
            _ => None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: None,
            async_emission: false,
            colorize: false,
            max_value_length: 4096,
            include_location: true,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_CONTEXT_DEPTH,
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            sanitize_enabled: true,
            sensitive_fields: Vec::new(),
            additional_sensitive_patterns: Vec::new(),
            excluded_fields: Vec::new(),
            sensitive_value_detection: false,
            value_patterns: vec![
                // API keys and tokens embedded in free text
                r"(?i)\b(api_?key|token|secret|password)\s*[:=]\s*['\x22]?[a-zA-Z0-9_\-\.]{8,}['\x22]?"
                    .to_string(),
                // Bearer tokens
                r"(?i)\bbearer\s+[a-zA-Z0-9_\-\.=]{8,}".to_string(),
                // Credit card numbers
                r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b".to_string(),
                // Social security numbers
                r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
            ],
            max_depth: DEFAULT_MAX_REDACTION_DEPTH,
            redaction_marker: DEFAULT_REDACTION_MARKER.to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: std::env::var("K_SERVICE").unwrap_or_else(|_| "keel".to_string()),
            version: std::env::var("K_REVISION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            logging: LoggingConfig::default(),
            context: ContextConfig::default(),
            privacy: PrivacyConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from file or create default
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            let content = tokio::fs::read_to_string(&config_file).await?;
            toml::from_str(&content).map_err(|e| Error::Config {
                message: format!("Failed to parse telemetry config: {}", e),
            })?
        } else {
            Self::default()
        };

        config.load_env_overrides();
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: format!("Failed to serialize telemetry config: {}", e),
        })?;

        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("KEEL_TELEMETRY_ENABLED") {
            self.enabled = enabled.parse().unwrap_or(self.enabled);
        }

        if let Ok(level) = std::env::var("KEEL_LOG_LEVEL") {
            self.logging.level = LogLevel::parse(&level).unwrap_or(self.logging.level);
        }

        if let Ok(format) = std::env::var("KEEL_LOG_FORMAT") {
            if let Some(format) = LogFormat::parse(&format) {
                self.logging.format = Some(format);
            }
        }

        if let Ok(enabled) = std::env::var("KEEL_LOG_ASYNC") {
            self.logging.async_emission = enabled.parse().unwrap_or(self.logging.async_emission);
        }

        if let Ok(enabled) = std::env::var("KEEL_SANITIZE_LOGS") {
            self.privacy.sanitize_enabled =
                enabled.parse().unwrap_or(self.privacy.sanitize_enabled);
        }

        if let Ok(fields) = std::env::var("KEEL_SENSITIVE_FIELDS") {
            self.privacy.sensitive_fields.extend(
                fields
                    .split(',')
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .map(str::to_string),
            );
        }

        if let Ok(depth) = std::env::var("KEEL_MAX_CONTEXT_DEPTH") {
            self.context.max_depth = depth.parse().unwrap_or(self.context.max_depth);
        }
    }

    /// Get default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "keel", "keel").ok_or_else(|| Error::Config {
            message: "Could not determine config directory".to_string(),
        })?;

        Ok(project_dirs.config_dir().join("telemetry.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.context.max_depth == 0 {
            return Err(Error::Config {
                message: "context.max_depth must be greater than 0".to_string(),
            });
        }

        if self.privacy.max_depth == 0 {
            return Err(Error::Config {
                message: "privacy.max_depth must be greater than 0".to_string(),
            });
        }

        if self.logging.max_value_length == 0 {
            return Err(Error::Config {
                message: "logging.max_value_length must be greater than 0".to_string(),
            });
        }

        for pattern in self
            .privacy
            .additional_sensitive_patterns
            .iter()
            .chain(&self.privacy.value_patterns)
        {
            regex::Regex::new(pattern).map_err(|e| Error::Config {
                message: format!("Invalid redaction pattern '{}': {}", pattern, e),
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_serialization() {
        let mut config = TelemetryConfig::default();
        config.logging.format = Some(LogFormat::Gcp);
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: TelemetryConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config.enabled, deserialized.enabled);
        assert_eq!(config.logging.level, deserialized.logging.level);
        assert_eq!(deserialized.logging.format, Some(LogFormat::Gcp));
        assert_eq!(config.privacy, deserialized.privacy);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: TelemetryConfig = toml::from_str(
            r#"
            [logging]
            level = "debug"
            format = "aws"

            [privacy]
            sensitive_fields = ["internal_ref"]
            "#,
        )
        .unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, Some(LogFormat::Aws));
        assert_eq!(config.context.max_depth, DEFAULT_MAX_CONTEXT_DEPTH);
        assert_eq!(config.privacy.redaction_marker, "[REDACTED]");
        assert_eq!(config.privacy.sensitive_fields, vec!["internal_ref"]);
    }

    #[tokio::test]
    #[serial]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("telemetry.toml");

        let mut original_config = TelemetryConfig::default();
        original_config.context.max_depth = 4;
        original_config.save(Some(&config_path)).await.unwrap();

        let loaded_config = TelemetryConfig::load(Some(&config_path)).await.unwrap();
        assert_eq!(original_config.enabled, loaded_config.enabled);
        assert_eq!(loaded_config.context.max_depth, 4);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("KEEL_LOG_LEVEL", "warning");
        std::env::set_var("KEEL_LOG_FORMAT", "cloudwatch");
        std::env::set_var("KEEL_SENSITIVE_FIELDS", "tenant_secret, ,routing_key");
        std::env::set_var("KEEL_MAX_CONTEXT_DEPTH", "3");

        let mut config = TelemetryConfig::default();
        config.load_env_overrides();

        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, Some(LogFormat::Aws));
        assert_eq!(
            config.privacy.sensitive_fields,
            vec!["tenant_secret", "routing_key"]
        );
        assert_eq!(config.context.max_depth, 3);

        std::env::remove_var("KEEL_LOG_LEVEL");
        std::env::remove_var("KEEL_LOG_FORMAT");
        std::env::remove_var("KEEL_SENSITIVE_FIELDS");
        std::env::remove_var("KEEL_MAX_CONTEXT_DEPTH");
    }

    #[test]
    fn test_config_validation() {
        let mut config = TelemetryConfig::default();
        assert!(config.validate().is_ok());

        config.context.max_depth = 0;
        assert!(config.validate().is_err());

        config.context.max_depth = 5;
        config.privacy.additional_sensitive_patterns = vec!["[invalid".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Error < LogLevel::Critical);
        assert_eq!(Level::from(LogLevel::Critical), Level::ERROR);
        assert_eq!(LogLevel::from(Level::WARN).as_str(), "WARNING");
    }
}
