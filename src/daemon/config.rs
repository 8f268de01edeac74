//! Sniffer configuration
//!
//! Loaded from a TOML, JSON or YAML file chosen by extension, then overridden
//! by environment variables and finally by command-line flags. Every field has
//! a default so partial files are fine.

use crate::observation::SniffType;
use crate::{Result, SniffError, DEFAULT_INTERFACE};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/airsniff/airsniff.toml";
pub const DEFAULT_DB_PATH: &str = "/var/lib/airsniff/airsniff.db";

pub const ENV_DB_PATH: &str = "AIRSNIFF_DB_PATH";
pub const ENV_GPSD_ADDR: &str = "AIRSNIFF_GPSD_ADDR";
pub const ENV_INTERFACE: &str = "AIRSNIFF_INTERFACE";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main sniffer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub general: GeneralConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub gps: GpsConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// Suppress the console echo
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: String,
    /// Fixed channel; `None` leaves channel selection to the driver
    pub channel: Option<u16>,
    /// Record into this existing project instead of creating one
    pub project: Option<i64>,
    pub sniff_type: SniffType,
    pub snaplen: i32,
    pub promiscuous: bool,
    /// pcap read timeout, bounds how long cancellation takes to be noticed
    pub read_timeout_ms: u64,
    /// Pause after switching interface mode
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub gpsd_addr: String,
    /// Expected report period; a position older than this is dropped
    pub poll_interval_ms: u64,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How long shutdown waits for the writer to drain
    pub drain_timeout_secs: u64,
}

/// Configuration validation result
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            quiet: false,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            channel: None,
            project: None,
            sniff_type: SniffType::Internal,
            snaplen: 65535,
            promiscuous: true,
            read_timeout_ms: 500,
            settle_delay_ms: 200,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpsd_addr: crate::gps::DEFAULT_GPSD_ADDR.to_string(),
            poll_interval_ms: 1000,
            retry_interval_ms: 1000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { drain_timeout_secs: 5 }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl GpsConfig {
    pub fn tracker_config(&self) -> crate::gps::GpsTrackerConfig {
        crate::gps::GpsTrackerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

impl IngestConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl SnifferConfig {
    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| SniffError::Config(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| SniffError::Config(format!("Failed to parse JSON config: {}", e))),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| SniffError::Config(format!("Failed to parse TOML config: {}", e))),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| SniffError::Config(format!("Failed to parse YAML config: {}", e))),
            _ => Err(SniffError::Config("Unsupported config file format".to_string())),
        }
    }

    /// Load `path`, falling back to defaults when it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::load_from_file(path)
        } else {
            log::info!("Configuration file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Apply `AIRSNIFF_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|v| !v.is_empty()) {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup(ENV_GPSD_ADDR).filter(|v| !v.is_empty()) {
            self.gps.gpsd_addr = addr;
        }
        if let Some(interface) = lookup(ENV_INTERFACE).filter(|v| !v.is_empty()) {
            self.capture.interface = interface;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        if self.capture.interface.is_empty() {
            result.errors.push("Capture interface cannot be empty".to_string());
        }

        if let Some(channel) = self.capture.channel {
            if let Err(e) = dot11::phy::validate_channel(channel) {
                result.errors.push(e.to_string());
            }
        }

        if self.capture.snaplen <= 0 {
            result.errors.push("Snapshot length must be positive".to_string());
        }

        if self.capture.read_timeout_ms == 0 {
            result.errors.push("Read timeout cannot be 0".to_string());
        } else if self.capture.read_timeout_ms > 5000 {
            result
                .warnings
                .push("Read timeout above 5s delays shutdown".to_string());
        }

        if self.storage.db_path.as_os_str().is_empty() {
            result.errors.push("Database path cannot be empty".to_string());
        }

        if self.gps.enabled {
            if self.gps.gpsd_addr.is_empty() {
                result.errors.push("gpsd address cannot be empty".to_string());
            }
            if self.gps.poll_interval_ms == 0 {
                result.errors.push("GPS poll interval cannot be 0".to_string());
            }
            if self.gps.retry_interval_ms == 0 {
                result.errors.push("GPS retry interval cannot be 0".to_string());
            }
        }

        if self.ingest.drain_timeout_secs == 0 {
            result.errors.push("Drain timeout cannot be 0".to_string());
        }

        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            result.errors.push(format!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        result.valid = result.errors.is_empty();
        result
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SniffError::Config(format!("Failed to serialize config to TOML: {}", e)))
    }
}
