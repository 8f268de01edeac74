//! SQLite storage backend

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::migrations::run_migrations;
use super::{StorageBackend, StoreConnection, StoreError, StoreResult};
use crate::observation::{Observation, ProjectId};
use crate::project::{Project, ProjectType};
use crate::TIME_FORMAT;

const INSERT_OBSERVATION: &str = "INSERT INTO IngestDB
    (projectID, captureTime, srcMac, dstMac, SSID, encType, authMode,
     gpsLat, gpsLong, strength, contentLength, typeExternal, typeInternal,
     srcIP, dstIP, srcPort, dstPort, sniffType)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)";

fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn parse_time(value: &str) -> StoreResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|e| StoreError::Fatal(format!("invalid timestamp '{}': {}", value, e)))
}

/// SQLite database at a filesystem path
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a concrete connection, creating the database if needed
    pub fn open(&self) -> StoreResult<SqliteConnection> {
        Ok(SqliteConnection {
            path: self.path.clone(),
            conn: Some(open_connection(&self.path)?),
        })
    }
}

impl StorageBackend for SqliteBackend {
    fn connect(&self) -> StoreResult<Box<dyn StoreConnection>> {
        Ok(Box::new(self.open()?))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Fatal(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let mut conn = Connection::open(path)
        .map_err(|e| StoreError::from_sqlite("failed to open SQLite database", e))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        log::error!("Failed to enable WAL mode: {}", err);
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| StoreError::from_sqlite("failed to enable foreign keys", e))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(|e| StoreError::from_sqlite("failed to set busy timeout", e))?;

    run_migrations(&mut conn)?;
    Ok(conn)
}

/// An open SQLite connection that can be reopened in place
#[derive(Debug)]
pub struct SqliteConnection {
    path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteConnection {
    fn conn(&mut self) -> StoreResult<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Transient("connection is closed".to_string()))
    }
}

impl StoreConnection for SqliteConnection {
    fn insert_observation(&mut self, observation: &Observation) -> StoreResult<()> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached(INSERT_OBSERVATION)
            .map_err(|e| StoreError::from_sqlite("failed to prepare insert", e))?;

        stmt.execute(params![
            observation.project_id.0,
            format_time(&observation.capture_time),
            observation.src_addr.map(|a| a.to_string()),
            observation.dst_addr.map(|a| a.to_string()),
            observation.network_name_or_hidden(),
            observation.encryption().map(|e| e.as_str()),
            observation.auth_mode().map(|a| a.as_str()),
            observation.gps_lat(),
            observation.gps_lon(),
            observation.signal_dbm,
            observation.content_length as i64,
            observation.frame_class.as_str(),
            observation.frame_subtype,
            observation.src_ip.map(|ip| ip.to_string()),
            observation.dst_ip.map(|ip| ip.to_string()),
            observation.src_port,
            observation.dst_port,
            observation.sniff_type.as_str(),
        ])
        .map_err(|e| StoreError::from_sqlite("failed to insert observation", e))?;
        Ok(())
    }

    fn create_project(
        &mut self,
        start_time: NaiveDateTime,
        project_type: ProjectType,
    ) -> StoreResult<ProjectId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ProjectDB (startTime, projectType) VALUES (?1, ?2)",
            params![format_time(&start_time), project_type.as_str()],
        )
        .map_err(|e| StoreError::from_sqlite("failed to create project", e))?;
        Ok(ProjectId(conn.last_insert_rowid()))
    }

    fn close_project(&mut self, id: ProjectId, stop_time: NaiveDateTime) -> StoreResult<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE ProjectDB SET stopTime = ?1 WHERE ID = ?2 AND stopTime IS NULL",
                params![format_time(&stop_time), id.0],
            )
            .map_err(|e| StoreError::from_sqlite("failed to close project", e))?;

        if updated == 0 {
            return Err(StoreError::Fatal(format!(
                "project {} does not exist or is already closed",
                id
            )));
        }
        Ok(())
    }

    fn find_project(&mut self, id: ProjectId) -> StoreResult<Option<Project>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT ID, startTime, stopTime, projectType FROM ProjectDB WHERE ID = ?1",
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| StoreError::from_sqlite("failed to look up project", e))?;

        let Some((id, start, stop, project_type)) = row else {
            return Ok(None);
        };

        Ok(Some(Project {
            id: ProjectId(id),
            start_time: parse_time(&start)?,
            stop_time: stop.as_deref().map(parse_time).transpose()?,
            project_type: project_type
                .parse::<ProjectType>()
                .map_err(|e| StoreError::Fatal(e.to_string()))?,
        }))
    }

    fn reconnect(&mut self) -> StoreResult<()> {
        // Close the old handle first so a wedged connection is released
        self.conn = None;
        self.conn = Some(open_connection(&self.path)?);
        log::info!("Reconnected to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gps::Position;
    use crate::observation::tests::sample_observation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// A fresh database path under the system temp directory
    pub(crate) fn temp_db_path(tag: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "airsniff-{}-{}-{}.db",
            tag,
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn time(h: u32, m: u32, s: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .unwrap()
    }

    #[test]
    fn test_project_lifecycle() {
        let backend = SqliteBackend::new(temp_db_path("project"));
        let mut conn = backend.open().unwrap();

        let id = conn.create_project(time(9, 0, 0), ProjectType::SniffExternal).unwrap();
        let project = conn.find_project(id).unwrap().unwrap();
        assert_eq!(project.start_time, time(9, 0, 0));
        assert_eq!(project.stop_time, None);
        assert_eq!(project.project_type, ProjectType::SniffExternal);

        conn.close_project(id, time(10, 0, 0)).unwrap();
        assert_eq!(conn.find_project(id).unwrap().unwrap().stop_time, Some(time(10, 0, 0)));

        // stopTime is set exactly once
        assert!(conn.close_project(id, time(11, 0, 0)).is_err());
        assert_eq!(conn.find_project(id).unwrap().unwrap().stop_time, Some(time(10, 0, 0)));

        assert_eq!(conn.find_project(ProjectId(999)).unwrap(), None);
    }

    #[test]
    fn test_insert_observation_row() {
        let backend = SqliteBackend::new(temp_db_path("insert"));
        let mut conn = backend.open().unwrap();
        let id = conn.create_project(time(9, 0, 0), ProjectType::SniffInternal).unwrap();

        let mut obs = sample_observation();
        obs.project_id = id;
        obs.network_name = None;
        obs.position = Some(Position { lat: 40.0, lon: -74.0 });
        conn.insert_observation(&obs).unwrap();

        let (ssid, enc, auth, lat, ext, itn): (String, String, String, f64, String, String) = conn
            .conn()
            .unwrap()
            .query_row(
                "SELECT SSID, encType, authMode, gpsLat, typeExternal, typeInternal FROM IngestDB",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .unwrap();
        assert_eq!(ssid, "(hidden)");
        assert_eq!((enc.as_str(), auth.as_str()), ("WPA2", "PSK"));
        assert_eq!(lat, 40.0);
        assert_eq!((ext.as_str(), itn.as_str()), ("management", "8"));
    }

    #[test]
    fn test_observation_for_unknown_project_is_rejected() {
        let backend = SqliteBackend::new(temp_db_path("fk"));
        let mut conn = backend.connect().unwrap();
        let mut obs = sample_observation();
        obs.project_id = ProjectId(4242);
        assert!(matches!(conn.insert_observation(&obs), Err(StoreError::Fatal(_))));
    }

    #[test]
    fn test_reconnect_keeps_data() {
        let backend = SqliteBackend::new(temp_db_path("reconnect"));
        let mut conn = backend.open().unwrap();
        let id = conn.create_project(time(8, 0, 0), ProjectType::Heatmap).unwrap();

        conn.reconnect().unwrap();
        assert!(conn.find_project(id).unwrap().is_some());
        assert!(backend.describe().starts_with("sqlite:"));
    }
}
