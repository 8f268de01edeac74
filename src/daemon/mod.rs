//! Capture daemon
//!
//! Configuration plus the orchestrator that runs one capture session from
//! project creation to interface restoration.

pub mod config;
pub mod core;

pub use self::config::{SnifferConfig, ValidationResult};
pub use self::core::{CaptureDaemon, RunSummary};

use crate::capture::SourceOpener;
use crate::console::CsvEcho;
use crate::gps::{GpsdSource, PositionSource};
use crate::store::{SqliteBackend, StorageBackend};
use crate::{Result, SniffError};

use dot11::{IwLinkControl, LinkControl};
use std::sync::Arc;

/// Daemon builder for easy configuration.
///
/// Anything not supplied explicitly is built from the configuration: SQLite
/// storage at `storage.db_path`, `ip`/`iw` link control, a gpsd client when
/// GPS is enabled, live pcap capture and a stdout echo unless quiet.
#[derive(Default)]
pub struct DaemonBuilder {
    config: Option<SnifferConfig>,
    storage: Option<Arc<dyn StorageBackend>>,
    link: Option<Arc<dyn LinkControl>>,
    position_source: Option<Box<dyn PositionSource>>,
    source_opener: Option<SourceOpener>,
    echo: Option<CsvEcho>,
}

impl DaemonBuilder {
    /// Create new daemon builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set daemon configuration
    pub fn with_config(mut self, config: SnifferConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_link_control(mut self, link: Arc<dyn LinkControl>) -> Self {
        self.link = Some(link);
        self
    }

    /// Ignored when GPS is disabled in the configuration
    pub fn with_position_source(mut self, source: Box<dyn PositionSource>) -> Self {
        self.position_source = Some(source);
        self
    }

    pub fn with_source_opener(mut self, opener: SourceOpener) -> Self {
        self.source_opener = Some(opener);
        self
    }

    /// Ignored when the configuration is quiet
    pub fn with_echo(mut self, echo: CsvEcho) -> Self {
        self.echo = Some(echo);
        self
    }

    /// Build the daemon
    pub fn build(self) -> Result<CaptureDaemon> {
        let config = self.config.unwrap_or_default();

        let validation = config.validate();
        for warning in &validation.warnings {
            log::warn!("Configuration: {}", warning);
        }
        if !validation.valid {
            return Err(SniffError::Config(format!(
                "Configuration validation failed: {}",
                validation.errors.join(", ")
            )));
        }

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(SqliteBackend::new(config.storage.db_path.clone())));
        let link = self
            .link
            .unwrap_or_else(|| Arc::new(IwLinkControl::new()));

        let position_source = if config.gps.enabled {
            Some(
                self.position_source
                    .unwrap_or_else(|| Box::new(GpsdSource::new(config.gps.gpsd_addr.clone()))),
            )
        } else {
            None
        };

        let source_opener = match self.source_opener {
            Some(opener) => opener,
            None => default_source_opener(&config)?,
        };

        let echo = if config.general.quiet {
            None
        } else {
            Some(self.echo.unwrap_or_else(CsvEcho::stdout))
        };

        Ok(CaptureDaemon::new(
            config,
            storage,
            link,
            position_source,
            source_opener,
            echo,
        ))
    }
}

#[cfg(feature = "pcap-capture")]
fn default_source_opener(config: &SnifferConfig) -> Result<SourceOpener> {
    Ok(crate::capture::PcapSource::opener(CaptureDaemon::source_settings(config)))
}

#[cfg(not(feature = "pcap-capture"))]
fn default_source_opener(_config: &SnifferConfig) -> Result<SourceOpener> {
    Err(SniffError::Config(
        "built without live capture support (feature `pcap-capture`)".to_string(),
    ))
}

/// Daemon utilities
pub struct DaemonUtils;

impl DaemonUtils {
    /// Check if daemon is running as root
    pub fn is_privileged() -> bool {
        #[cfg(unix)]
        {
            unsafe { libc::geteuid() == 0 }
        }

        #[cfg(not(unix))]
        {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SnifferConfig::default();
        config.capture.interface.clear();
        let result = DaemonBuilder::new().with_config(config).build();
        assert!(matches!(result, Err(SniffError::Config(_))));
    }

    #[test]
    fn test_quiet_and_gps_disabled() {
        let mut config = SnifferConfig::default();
        config.general.quiet = true;
        config.gps.enabled = false;

        let opener: SourceOpener = Box::new(|| Err(SniffError::Capture("unused".into())));
        let daemon = DaemonBuilder::new()
            .with_config(config)
            .with_source_opener(opener)
            .build()
            .unwrap();

        let debug = format!("{:?}", daemon);
        assert!(debug.contains("gps: false"));
        assert!(debug.contains("echo: false"));
    }
}
