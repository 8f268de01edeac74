//! Capture daemon core
//!
//! Owns the lifecycle of one capture run: project, storage connections,
//! interface mode, GPS tracker, writer and capture thread. It is the only
//! component that decides when the run ends.

use crate::capture::{run_capture_loop, CaptureStats, FrameHandler, SourceOpener, SourceSettings};
use crate::classify::ClassifyContext;
use crate::console::CsvEcho;
use crate::gps::{GpsTracker, PositionReader, PositionSource};
use crate::ingest::{IngestQueue, Writer, WriterStats};
use crate::observation::ProjectId;
use crate::project::{ProjectManager, ProjectType};
use crate::store::StorageBackend;
use crate::worker::{JoinError, Worker};
use crate::{Result, SniffError};
use super::config::SnifferConfig;

use chrono::Local;
use dot11::{InterfaceController, LinkControl, MonitorModeGuard};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long shutdown waits for the GPS task
const GPS_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Added to the read timeout when waiting for the capture thread to stop
const CAPTURE_STOP_MARGIN: Duration = Duration::from_secs(1);

/// What a finished run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub project_id: ProjectId,
    pub capture: CaptureStats,
    /// `None` when the writer did not drain in time and was abandoned
    pub writer: Option<WriterStats>,
    /// Why capture ended early, if it did
    pub capture_error: Option<String>,
    pub project_closed: bool,
    pub interface_restored: bool,
}

/// One configured capture run
pub struct CaptureDaemon {
    config: SnifferConfig,
    storage: Arc<dyn StorageBackend>,
    link: Arc<dyn LinkControl>,
    position_source: Option<Box<dyn PositionSource>>,
    source_opener: Option<SourceOpener>,
    echo: Option<CsvEcho>,
}

impl std::fmt::Debug for CaptureDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDaemon")
            .field("config", &self.config)
            .field("storage", &self.storage.describe())
            .field("gps", &self.position_source.is_some())
            .field("echo", &self.echo.is_some())
            .finish()
    }
}

impl CaptureDaemon {
    pub(crate) fn new(
        config: SnifferConfig,
        storage: Arc<dyn StorageBackend>,
        link: Arc<dyn LinkControl>,
        position_source: Option<Box<dyn PositionSource>>,
        source_opener: SourceOpener,
        echo: Option<CsvEcho>,
    ) -> Self {
        Self {
            config,
            storage,
            link,
            position_source,
            source_opener: Some(source_opener),
            echo,
        }
    }

    pub fn config(&self) -> &SnifferConfig {
        &self.config
    }

    /// Live capture settings derived from the configuration
    pub fn source_settings(config: &SnifferConfig) -> SourceSettings {
        SourceSettings {
            interface: config.capture.interface.clone(),
            snaplen: config.capture.snaplen,
            promiscuous: config.capture.promiscuous,
            read_timeout: config.capture.read_timeout(),
        }
    }

    /// Run until `shutdown` resolves or the frame source ends.
    ///
    /// Errors are returned only for failures before capture starts; the
    /// interface is never touched in that case. Once monitor mode has been
    /// entered it is restored on every path.
    pub async fn run<S>(mut self, shutdown: S) -> Result<RunSummary>
    where
        S: Future<Output = ()> + Send,
    {
        let opener = self
            .source_opener
            .take()
            .ok_or_else(|| SniffError::Capture("capture daemon already ran".to_string()))?;
        let interface = self.config.capture.interface.clone();
        let sniff_type = self.config.capture.sniff_type;

        // Project bookkeeping and the writer each get their own connection.
        // Both are opened before a project row is created.
        let mut project_conn = self.storage.connect()?;
        let writer_conn = match self.storage.connect() {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Failed to connect to {}: {}", self.storage.describe(), e);
                return Err(SniffError::Storage(e));
            }
        };
        log::info!("Connected to {}", self.storage.describe());

        let requested = self.config.capture.project.map(ProjectId);
        let active = ProjectManager::new(project_conn.as_mut()).resolve(
            requested,
            Local::now().naive_local(),
            ProjectType::from(sniff_type),
        )?;

        // Interface
        let controller = InterfaceController::new(Arc::clone(&self.link))
            .with_settle_delay(self.config.capture.settle_delay());
        let channel = self.config.capture.channel;
        log::info!("Setting {} to monitor mode", interface);
        let guard = {
            let interface = interface.clone();
            tokio::task::spawn_blocking(move || {
                let guard = MonitorModeGuard::acquire(controller, interface);
                match channel {
                    Some(channel) => {
                        log::info!("Setting channel to {}", channel);
                        guard.controller().set_channel(guard.interface(), channel);
                    }
                    None => log::info!("Scanning all channels (no specific channel set)"),
                }
                guard
            })
            .await
            .map_err(|e| SniffError::Capture(format!("monitor mode task failed: {}", e)))?
        };

        // GPS
        let (gps_reader, gps_task) = match self.position_source.take() {
            Some(source) => {
                log::info!("Starting GPS tracker ({})", self.config.gps.gpsd_addr);
                let tracker = GpsTracker::new(self.config.gps.tracker_config());
                let reader = tracker.reader();
                let (stop_tx, stop_rx) = oneshot::channel();
                (reader, Some((stop_tx, tracker.spawn(source, stop_rx))))
            }
            None => {
                log::info!("GPS disabled");
                (PositionReader::disabled(), None)
            }
        };

        // Writer
        let (queue, receiver) = IngestQueue::new();
        let writer = match Writer::new(writer_conn, receiver).spawn() {
            Ok(worker) => Some(worker),
            Err(e) => {
                log::error!("Failed to start writer thread: {}", e);
                None
            }
        };

        // Capture
        let mut echo = self.echo.take();
        if let Some(out) = echo.as_mut() {
            if let Err(e) = out.write_header() {
                log::warn!("Failed to print header: {}", e);
            }
        }

        let running = Arc::new(AtomicBool::new(true));
        let stop = {
            let running = Arc::clone(&running);
            async move {
                shutdown.await;
                log::info!("Stopping capture...");
                running.store(false, Ordering::SeqCst);
            }
        };

        let context = ClassifyContext { project_id: active.id, sniff_type };
        let mut handler = FrameHandler::new(context, gps_reader, queue.clone(), echo);

        log::info!(
            "Starting capture on {} for project {}... (Press Ctrl+C to stop)",
            interface,
            active.id
        );

        // Once shutdown fires the capture thread gets one read timeout plus
        // a margin to notice; after that it is abandoned.
        let capture_grace = self.config.capture.read_timeout() + CAPTURE_STOP_MARGIN;
        let capture_result = if writer.is_some() {
            let capture_running = Arc::clone(&running);
            match Worker::spawn("airsniff-capture", move || {
                let mut source = opener()?;
                run_capture_loop(source.as_mut(), &mut handler, &capture_running)
            }) {
                Ok(worker) => match worker.join_after(stop, capture_grace).await {
                    Ok(result) => result,
                    Err(JoinError::TimedOut { .. }) => Err(SniffError::Capture(format!(
                        "capture thread did not stop within {:?} of shutdown",
                        capture_grace
                    ))),
                    Err(e) => Err(SniffError::Capture(e.to_string())),
                },
                Err(e) => Err(SniffError::Io(e)),
            }
        } else {
            Err(SniffError::Capture("writer unavailable".to_string()))
        };

        // Shutdown sequence
        running.store(false, Ordering::SeqCst);

        let (capture, capture_error) = match capture_result {
            Ok(stats) => (stats, None),
            Err(e) => {
                log::error!("Capture failed: {}", e);
                (CaptureStats::default(), Some(e.to_string()))
            }
        };
        log::info!(
            "Captured {} frames, {} observations, {} skipped",
            capture.frames,
            capture.observations,
            capture.skipped
        );

        queue.shutdown();
        let writer_stats = match writer {
            Some(worker) => {
                log::info!("Waiting for writer to drain {} queued observations", queue.depth());
                worker.join_timeout(self.config.ingest.drain_timeout()).await.ok()
            }
            None => None,
        };

        if let Some((stop_tx, task)) = gps_task {
            let _ = stop_tx.send(());
            if tokio::time::timeout(GPS_STOP_TIMEOUT, task).await.is_err() {
                log::warn!("GPS tracker did not stop in time");
            }
        }

        let project_closed = if active.close_on_exit {
            ProjectManager::new(project_conn.as_mut()).close(active.id, Local::now().naive_local())
        } else {
            false
        };
        drop(project_conn);

        log::info!("Restoring {} to managed mode", interface);
        let interface_restored = tokio::task::spawn_blocking(move || guard.release())
            .await
            .unwrap_or(false);

        log::info!("Done.");

        Ok(RunSummary {
            project_id: active.id,
            capture,
            writer: writer_stats,
            capture_error,
            project_closed,
            interface_restored,
        })
    }
}
