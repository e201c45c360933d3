//! Configuration management
//!
//! This module handles loading and parsing configuration for schoolhub.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::services::qr_render::{parse_hex_color, ErrorCorrection};

/// Longest accepted code validity window (one day)
pub const MAX_VALIDITY_MINUTES: i64 = 24 * 60;

/// Longest accepted scan rate limit window (one day)
pub const MAX_RATE_LIMIT_WINDOW_SECONDS: i64 = 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Attendance code configuration
    #[serde(default)]
    pub attendance: AttendanceConfig,
    /// Scan rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (the staff dashboard)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Attendance code configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// How long an issued code verifies, in minutes
    #[serde(default = "default_validity_minutes")]
    pub validity_minutes: i64,
    /// Keep a deny-list so codes can be revoked before they expire
    #[serde(default)]
    pub revocation_enabled: bool,
    /// Maximum revoked tokens remembered at once
    #[serde(default = "default_revocation_capacity")]
    pub revocation_capacity: u64,
    /// QR image settings
    #[serde(default)]
    pub qr: QrConfig,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            validity_minutes: default_validity_minutes(),
            revocation_enabled: false,
            revocation_capacity: default_revocation_capacity(),
            qr: QrConfig::default(),
        }
    }
}

fn default_validity_minutes() -> i64 {
    crate::services::attendance_code::DEFAULT_VALIDITY_MINUTES
}

fn default_revocation_capacity() -> u64 {
    100_000
}

/// QR image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrConfig {
    /// Image width and height in pixels
    #[serde(default = "default_qr_size")]
    pub size: u32,
    /// Error-correction level (l, m, q, h)
    #[serde(default)]
    pub error_correction: ErrorCorrection,
    /// Quiet zone width in modules
    #[serde(default = "default_qr_border")]
    pub border: u32,
    /// Dark module color, `#RRGGBB`
    #[serde(default = "default_dark_color")]
    pub dark_color: String,
    /// Light module color, `#RRGGBB`
    #[serde(default = "default_light_color")]
    pub light_color: String,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            size: default_qr_size(),
            error_correction: ErrorCorrection::default(),
            border: default_qr_border(),
            dark_color: default_dark_color(),
            light_color: default_light_color(),
        }
    }
}

fn default_qr_size() -> u32 {
    256
}

fn default_qr_border() -> u32 {
    1
}

fn default_dark_color() -> String {
    "#000000".to_string()
}

fn default_light_color() -> String {
    "#FFFFFF".to_string()
}

impl QrConfig {
    /// Dark color as RGB
    pub fn dark_rgb(&self) -> Result<[u8; 3], ConfigError> {
        parse_color("attendance.qr.dark_color", &self.dark_color)
    }

    /// Light color as RGB
    pub fn light_rgb(&self) -> Result<[u8; 3], ConfigError> {
        parse_color("attendance.qr.light_color", &self.light_color)
    }
}

fn parse_color(field: &str, value: &str) -> Result<[u8; 3], ConfigError> {
    parse_hex_color(value).ok_or_else(|| {
        ConfigError::ValidationError(format!("{} must be #RRGGBB, got '{}'", field, value))
    })
}

/// Scan rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Failed scans allowed per client inside the window
    #[serde(default = "default_max_failed_scans")]
    pub max_failed_scans: usize,
    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failed_scans: default_max_failed_scans(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_max_failed_scans() -> usize {
    10
}

fn default_window_seconds() -> i64 {
    60
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - SCHOOLHUB_SERVER_HOST
    /// - SCHOOLHUB_SERVER_PORT
    /// - SCHOOLHUB_SERVER_CORS_ORIGIN
    /// - SCHOOLHUB_ATTENDANCE_VALIDITY_MINUTES
    /// - SCHOOLHUB_ATTENDANCE_REVOCATION_ENABLED
    /// - SCHOOLHUB_QR_SIZE
    /// - SCHOOLHUB_QR_ERROR_CORRECTION
    /// - SCHOOLHUB_RATE_LIMIT_MAX_FAILED_SCANS
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attendance.validity_minutes <= 0 {
            return Err(ConfigError::ValidationError(
                "attendance.validity_minutes must be positive".to_string(),
            ));
        }
        if self.attendance.validity_minutes > MAX_VALIDITY_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "attendance.validity_minutes must be at most {}",
                MAX_VALIDITY_MINUTES
            )));
        }
        if self.attendance.revocation_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "attendance.revocation_capacity must be positive".to_string(),
            ));
        }
        if self.attendance.qr.size == 0 {
            return Err(ConfigError::ValidationError(
                "attendance.qr.size must be positive".to_string(),
            ));
        }
        if self.attendance.qr.border == 0 {
            return Err(ConfigError::ValidationError(
                "attendance.qr.border must be at least 1".to_string(),
            ));
        }
        self.attendance.qr.dark_rgb()?;
        self.attendance.qr.light_rgb()?;
        if self.rate_limit.max_failed_scans == 0 || self.rate_limit.window_seconds <= 0 {
            return Err(ConfigError::ValidationError(
                "rate_limit values must be positive".to_string(),
            ));
        }
        if self.rate_limit.window_seconds > MAX_RATE_LIMIT_WINDOW_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "rate_limit.window_seconds must be at most {}",
                MAX_RATE_LIMIT_WINDOW_SECONDS
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("SCHOOLHUB_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("SCHOOLHUB_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("SCHOOLHUB_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Attendance configuration
        if let Ok(minutes) = std::env::var("SCHOOLHUB_ATTENDANCE_VALIDITY_MINUTES") {
            if let Ok(minutes) = minutes.parse::<i64>() {
                self.attendance.validity_minutes = minutes;
            }
        }
        if let Ok(enabled) = std::env::var("SCHOOLHUB_ATTENDANCE_REVOCATION_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.attendance.revocation_enabled = true,
                "false" | "0" | "no" => self.attendance.revocation_enabled = false,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(size) = std::env::var("SCHOOLHUB_QR_SIZE") {
            if let Ok(size) = size.parse::<u32>() {
                self.attendance.qr.size = size;
            }
        }
        if let Ok(level) = std::env::var("SCHOOLHUB_QR_ERROR_CORRECTION") {
            if let Some(level) = ErrorCorrection::parse(&level) {
                self.attendance.qr.error_correction = level;
            }
        }

        // Rate limit configuration
        if let Ok(max) = std::env::var("SCHOOLHUB_RATE_LIMIT_MAX_FAILED_SCANS") {
            if let Ok(max) = max.parse::<usize>() {
                self.rate_limit.max_failed_scans = max;
            }
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
