//! # airsniff - passive 802.11 capture with geotagged, durable observations
//!
//! Puts a wireless interface in monitor mode, classifies every captured frame
//! into an [`Observation`], tags it with the latest GPS fix and persists it
//! under a capture project.
//!
//! ## Architecture
//!
//! - `observation`: the record produced for each captured frame
//! - `classify`: pure frame to observation classification
//! - `gps`: background position tracking with a snapshot read
//! - `ingest`: FIFO queue and the single writer draining it
//! - `store`: storage backend traits and the SQLite implementation
//! - `project`: capture project lifecycle
//! - `console`: delimited echo of observations on stdout
//! - `capture`: frame sources and the capture loop
//! - `daemon`: configuration and the run orchestrator

pub mod capture;
pub mod classify;
pub mod console;
pub mod daemon;
pub mod gps;
pub mod ingest;
pub mod observation;
pub mod project;
pub mod store;
pub mod worker;

pub use crate::{
    classify::{classify, CapturedFrame, ClassifyContext},
    gps::{GpsTracker, Position, PositionReader},
    ingest::{IngestMessage, IngestQueue, WriterStats},
    observation::*,
    project::{Project, ProjectManager, ProjectType},
    store::{StorageBackend, StoreConnection, StoreError},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SniffError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Project error: {0}")]
    Project(String),

    #[error("GPS error: {0}")]
    Gps(String),
}

pub type Result<T> = std::result::Result<T, SniffError>;

/// Stored and printed in place of an absent or empty network name
pub const HIDDEN_NETWORK_NAME: &str = "(hidden)";

pub const DEFAULT_INTERFACE: &str = "wlan1";

/// Timestamp layout used for storage and console output
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_convert() {
        let err: SniffError = StoreError::Fatal("disk full".into()).into();
        assert!(matches!(err, SniffError::Storage(StoreError::Fatal(_))));
        assert_eq!(err.to_string(), "Storage error: fatal storage error: disk full");
    }
}
