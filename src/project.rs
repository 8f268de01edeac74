//! Capture project lifecycle
//!
//! A project groups the observations of one capture session. It is created
//! when a run starts (or an existing one is reused) and closed exactly once
//! when the run ends.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::observation::{ProjectId, SniffType};
use crate::store::StoreConnection;
use crate::{Result, SniffError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    SniffInternal,
    SniffExternal,
    Heatmap,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::SniffInternal => "sniff_internal",
            ProjectType::SniffExternal => "sniff_external",
            ProjectType::Heatmap => "heatmap",
        }
    }
}

impl From<SniffType> for ProjectType {
    fn from(sniff_type: SniffType) -> Self {
        match sniff_type {
            SniffType::Internal => ProjectType::SniffInternal,
            SniffType::External => ProjectType::SniffExternal,
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = SniffError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sniff_internal" => Ok(ProjectType::SniffInternal),
            "sniff_external" => Ok(ProjectType::SniffExternal),
            "heatmap" => Ok(ProjectType::Heatmap),
            other => Err(SniffError::Project(format!("Unknown project type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub start_time: NaiveDateTime,
    /// `None` while the project is open
    pub stop_time: Option<NaiveDateTime>,
    pub project_type: ProjectType,
}

impl Project {
    pub fn is_open(&self) -> bool {
        self.stop_time.is_none()
    }
}

/// The project a run records into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveProject {
    pub id: ProjectId,
    /// Whether this run is responsible for closing it
    pub close_on_exit: bool,
}

/// Creates, resolves and closes projects over a store connection
pub struct ProjectManager<'a> {
    conn: &'a mut dyn StoreConnection,
}

impl<'a> ProjectManager<'a> {
    pub fn new(conn: &'a mut dyn StoreConnection) -> Self {
        Self { conn }
    }

    /// Create a new project. Failure is fatal for the run.
    pub fn create(&mut self, start_time: NaiveDateTime, project_type: ProjectType) -> Result<ProjectId> {
        let id = self
            .conn
            .create_project(start_time, project_type)
            .map_err(|e| SniffError::Project(format!("failed to create project: {}", e)))?;
        log::info!("Created new {} project with ID {}", project_type, id);
        Ok(id)
    }

    /// Reuse `requested` if given, otherwise create a project of `project_type`.
    ///
    /// A reused project must exist. One that is already closed is recorded
    /// into but left closed.
    pub fn resolve(
        &mut self,
        requested: Option<ProjectId>,
        start_time: NaiveDateTime,
        project_type: ProjectType,
    ) -> Result<ActiveProject> {
        let Some(id) = requested else {
            let id = self.create(start_time, project_type)?;
            return Ok(ActiveProject { id, close_on_exit: true });
        };

        let project = self
            .conn
            .find_project(id)
            .map_err(|e| SniffError::Project(format!("failed to look up project {}: {}", id, e)))?
            .ok_or_else(|| SniffError::Project(format!("project {} does not exist", id)))?;

        if project.is_open() {
            log::info!("Using existing project ID {}", id);
        } else {
            log::warn!("Project {} is already closed; recording into it without reopening", id);
        }
        Ok(ActiveProject {
            id,
            close_on_exit: project.is_open(),
        })
    }

    /// Set the project's stop time. Failure is logged and reported as `false`.
    pub fn close(&mut self, id: ProjectId, stop_time: NaiveDateTime) -> bool {
        match self.conn.close_project(id, stop_time) {
            Ok(()) => {
                log::info!("Updated project {} stop time", id);
                true
            }
            Err(e) => {
                log::error!("Failed to update project {} stop time: {}", id, e);
                false
            }
        }
    }
}
