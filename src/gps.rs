//! GPS position tracking
//!
//! A background task follows a [`PositionSource`] and keeps the most recent
//! fix behind a mutex. Readers only ever see a copy of the whole position, so
//! latitude and longitude are always present together or not at all. Any
//! source failure clears the position until a new fix arrives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{Result, SniffError};

/// Default gpsd endpoint
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// Asks gpsd to stream JSON reports
const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

/// Something that produces position reports
#[async_trait]
pub trait PositionSource: Send {
    /// Wait for the next report.
    ///
    /// `Ok(None)` is a report without a usable fix.
    async fn next_fix(&mut self) -> Result<Option<Position>>;
}

#[derive(Debug, Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: Option<u8>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// What a single gpsd JSON line says about the position
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpsdReportKind {
    /// A TPV report, with the fix if there is one
    Tpv(Option<Position>),
    /// Any other report class
    Other,
}

/// Parse one line of gpsd output. Lines that are not JSON objects yield `None`.
pub fn parse_gpsd_line(line: &str) -> Option<GpsdReportKind> {
    let report: GpsdReport = serde_json::from_str(line.trim()).ok()?;
    if report.class != "TPV" {
        return Some(GpsdReportKind::Other);
    }
    // mode 0/1: no fix, 2: 2D, 3: 3D
    if report.mode.map_or(false, |m| m < 2) {
        return Some(GpsdReportKind::Tpv(None));
    }
    let fix = match (report.lat, report.lon) {
        (Some(lat), Some(lon)) => Some(Position { lat, lon }),
        _ => None,
    };
    Some(GpsdReportKind::Tpv(fix))
}

/// [`PositionSource`] reading TPV reports from a gpsd daemon
#[derive(Debug)]
pub struct GpsdSource {
    addr: String,
    reader: Option<BufReader<TcpStream>>,
}

impl GpsdSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            reader: None,
        }
    }

    async fn connect(&mut self) -> Result<&mut BufReader<TcpStream>> {
        if self.reader.is_none() {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| SniffError::Gps(format!("connect to gpsd at {}: {}", self.addr, e)))?;
            stream.write_all(WATCH_COMMAND).await?;
            log::info!("Connected to gpsd at {}", self.addr);
            self.reader = Some(BufReader::new(stream));
        }
        self.reader
            .as_mut()
            .ok_or_else(|| SniffError::Gps("gpsd connection unavailable".to_string()))
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    async fn next_fix(&mut self) -> Result<Option<Position>> {
        let mut line = String::new();
        loop {
            line.clear();
            let reader = self.connect().await?;
            let read = match reader.read_line(&mut line).await {
                Ok(read) => read,
                Err(e) => {
                    self.reader = None;
                    return Err(e.into());
                }
            };
            if read == 0 {
                self.reader = None;
                return Err(SniffError::Gps("gpsd closed the connection".to_string()));
            }
            match parse_gpsd_line(&line) {
                Some(GpsdReportKind::Tpv(fix)) => return Ok(fix),
                Some(GpsdReportKind::Other) | None => continue,
            }
        }
    }
}

/// Timing of the tracker loop
#[derive(Debug, Clone, Copy)]
pub struct GpsTrackerConfig {
    /// Expected interval between reports
    pub poll_interval: Duration,
    /// Pause after a source error before trying again
    pub retry_interval: Duration,
}

impl Default for GpsTrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(1),
        }
    }
}

impl GpsTrackerConfig {
    /// A position with no newer report within one poll interval is dropped
    pub fn staleness(&self) -> Duration {
        self.poll_interval
    }
}

/// Cheap read handle on the tracker's current position
#[derive(Debug, Clone, Default)]
pub struct PositionReader {
    state: Arc<Mutex<Option<Position>>>,
}

impl PositionReader {
    /// A reader that never has a position
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Copy of the latest position
    pub fn snapshot(&self) -> Option<Position> {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Owns the current position and the loop that updates it
#[derive(Debug)]
pub struct GpsTracker {
    state: Arc<Mutex<Option<Position>>>,
    config: GpsTrackerConfig,
}

impl GpsTracker {
    pub fn new(config: GpsTrackerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
            config,
        }
    }

    pub fn reader(&self) -> PositionReader {
        PositionReader {
            state: Arc::clone(&self.state),
        }
    }

    fn set(&self, position: Option<Position>) {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() && position.is_none() {
            log::debug!("GPS position cleared");
        }
        *guard = position;
    }

    /// Run the tracker on the current runtime until `shutdown` fires
    pub fn spawn(
        self,
        source: Box<dyn PositionSource>,
        shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(source, shutdown).await })
    }

    pub async fn run(&self, mut source: Box<dyn PositionSource>, mut shutdown: oneshot::Receiver<()>) {
        log::info!("GPS tracker started");
        let staleness = self.config.staleness();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                report = tokio::time::timeout(staleness, source.next_fix()) => match report {
                    Ok(Ok(fix)) => self.set(fix),
                    Ok(Err(e)) => {
                        log::warn!("GPS source error: {}", e);
                        self.set(None);
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(self.config.retry_interval) => {}
                        }
                    }
                    Err(_) => {
                        log::debug!("No GPS report within {:?}", staleness);
                        self.set(None);
                    }
                },
            }
        }

        self.set(None);
        log::info!("GPS tracker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tokio::net::TcpListener;

    /// Replays scripted reports, then never reports again
    struct ScriptedSource {
        steps: VecDeque<Result<Option<Position>>>,
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn next_fix(&mut self) -> Result<Option<Position>> {
            match self.steps.pop_front() {
                Some(step) => step,
                None => std::future::pending().await,
            }
        }
    }

    fn fast_config() -> GpsTrackerConfig {
        GpsTrackerConfig {
            poll_interval: Duration::from_millis(50),
            retry_interval: Duration::from_millis(10),
        }
    }

    async fn wait_for(reader: &PositionReader, expected: Option<Position>) -> bool {
        for _ in 0..200 {
            if reader.snapshot() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_parse_tpv_reports() {
        let fix = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"lat":45.07,"lon":7.68,"alt":240.1}"#;
        assert_eq!(
            parse_gpsd_line(fix),
            Some(GpsdReportKind::Tpv(Some(Position { lat: 45.07, lon: 7.68 })))
        );

        let no_fix = r#"{"class":"TPV","mode":1}"#;
        assert_eq!(parse_gpsd_line(no_fix), Some(GpsdReportKind::Tpv(None)));

        let half = r#"{"class":"TPV","mode":2,"lat":45.07}"#;
        assert_eq!(parse_gpsd_line(half), Some(GpsdReportKind::Tpv(None)));

        assert_eq!(parse_gpsd_line(r#"{"class":"SKY"}"#), Some(GpsdReportKind::Other));
        assert_eq!(parse_gpsd_line("garbage"), None);
    }

    #[tokio::test]
    async fn test_stale_position_is_cleared() {
        let position = Position { lat: 1.0, lon: 2.0 };
        let tracker = GpsTracker::new(fast_config());
        let reader = tracker.reader();
        let (stop_tx, stop_rx) = oneshot::channel();
        let source = ScriptedSource { steps: VecDeque::from(vec![Ok(Some(position))]) };
        let handle = tracker.spawn(Box::new(source), stop_rx);

        assert!(wait_for(&reader, Some(position)).await);
        // Source goes quiet; the fix expires after one poll interval
        assert!(wait_for(&reader, None).await);

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fix_expires_after_one_poll_interval() {
        let config = GpsTrackerConfig {
            poll_interval: Duration::from_millis(300),
            retry_interval: Duration::from_millis(10),
        };
        assert_eq!(config.staleness(), config.poll_interval);

        let position = Position { lat: 3.0, lon: 4.0 };
        let tracker = GpsTracker::new(config);
        let reader = tracker.reader();
        let (stop_tx, stop_rx) = oneshot::channel();
        let source = ScriptedSource { steps: VecDeque::from(vec![Ok(Some(position))]) };
        let handle = tracker.spawn(Box::new(source), stop_rx);

        assert!(wait_for(&reader, Some(position)).await);
        let held = std::time::Instant::now();
        assert!(wait_for(&reader, None).await);
        // Cleared at 300ms, well before a second interval would have passed
        assert!(held.elapsed() < Duration::from_millis(550));

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_source_error_clears_then_recovers() {
        let first = Position { lat: 10.0, lon: 20.0 };
        let second = Position { lat: 11.0, lon: 21.0 };
        let tracker = GpsTracker::new(GpsTrackerConfig {
            poll_interval: Duration::from_secs(5),
            retry_interval: Duration::from_millis(10),
        });
        let reader = tracker.reader();
        let (stop_tx, stop_rx) = oneshot::channel();
        let source = ScriptedSource {
            steps: VecDeque::from(vec![
                Ok(Some(first)),
                Err(SniffError::Gps("device unplugged".into())),
                Ok(Some(second)),
            ]),
        };
        let handle = tracker.spawn(Box::new(source), stop_rx);

        assert!(wait_for(&reader, Some(second)).await);
        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(reader.snapshot(), None);
    }

    #[tokio::test]
    async fn test_gpsd_source_sends_watch_and_reads_tpv() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut command = String::new();
            stream.read_line(&mut command).await.unwrap();
            stream
                .get_mut()
                .write_all(
                    b"{\"class\":\"VERSION\",\"release\":\"3.22\"}\n{\"class\":\"TPV\",\"mode\":2,\"lat\":-33.9,\"lon\":151.2}\n",
                )
                .await
                .unwrap();
            command
        });

        let mut source = GpsdSource::new(addr.to_string());
        let fix = source.next_fix().await.unwrap();
        assert_eq!(fix, Some(Position { lat: -33.9, lon: 151.2 }));

        let command = server.await.unwrap();
        assert!(command.starts_with("?WATCH="));

        // Server hung up
        assert!(source.next_fix().await.is_err());
    }

    #[test]
    fn test_disabled_reader() {
        assert_eq!(PositionReader::disabled().snapshot(), None);
    }
}
