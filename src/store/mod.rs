//! Durable storage
//!
//! The capture pipeline only sees storage through [`StorageBackend`] and
//! [`StoreConnection`]. Every failure is either transient (worth a reconnect)
//! or fatal.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::observation::{Observation, ProjectId};
use crate::project::{Project, ProjectType};

mod migrations;
pub mod sqlite;

pub use sqlite::{SqliteBackend, SqliteConnection};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The operation may succeed after reconnecting
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("fatal storage error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classify a SQLite failure
    pub(crate) fn from_sqlite(context: &str, err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let message = format!("{}: {}", context, err);
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::DiskFull
                | ErrorCode::OutOfMemory,
            ) => StoreError::Transient(message),
            _ => StoreError::Fatal(message),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Opens connections to a store
pub trait StorageBackend: Send + Sync {
    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// One open connection, owned by a single thread at a time
pub trait StoreConnection: Send {
    fn insert_observation(&mut self, observation: &Observation) -> StoreResult<()>;

    fn create_project(
        &mut self,
        start_time: NaiveDateTime,
        project_type: ProjectType,
    ) -> StoreResult<ProjectId>;

    /// Set the stop time of a project that is still open
    fn close_project(&mut self, id: ProjectId, stop_time: NaiveDateTime) -> StoreResult<()>;

    fn find_project(&mut self, id: ProjectId) -> StoreResult<Option<Project>>;

    /// Drop the current connection and open a fresh one
    fn reconnect(&mut self) -> StoreResult<()>;
}
