//! Ingestion queue and writer
//!
//! The capture loop pushes observations onto an unbounded FIFO and never
//! waits on storage. A single writer thread drains the queue into one store
//! connection until it receives [`IngestMessage::Shutdown`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::observation::Observation;
use crate::store::StoreConnection;
use crate::worker::Worker;

/// Writes between periodic progress logs
const PROGRESS_LOG_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum IngestMessage {
    Observation(Box<Observation>),
    /// Everything queued before this is written, then the writer stops
    Shutdown,
}

/// Producer handle on the ingestion queue
#[derive(Debug, Clone)]
pub struct IngestQueue {
    tx: mpsc::UnboundedSender<IngestMessage>,
    depth: Arc<AtomicUsize>,
}

/// Consumer end, owned by the writer
#[derive(Debug)]
pub struct IngestReceiver {
    rx: mpsc::UnboundedReceiver<IngestMessage>,
    depth: Arc<AtomicUsize>,
}

impl IngestQueue {
    pub fn new() -> (IngestQueue, IngestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            IngestQueue { tx, depth: Arc::clone(&depth) },
            IngestReceiver { rx, depth },
        )
    }

    /// Enqueue an observation. Returns `false` if the writer is gone.
    pub fn push(&self, observation: Observation) -> bool {
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self
            .tx
            .send(IngestMessage::Observation(Box::new(observation)))
            .is_err()
        {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Ask the writer to stop after draining everything queued so far
    pub fn shutdown(&self) -> bool {
        self.tx.send(IngestMessage::Shutdown).is_ok()
    }

    /// Observations queued but not yet taken by the writer
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl IngestReceiver {
    /// Block until the next message. `None` once every producer is gone.
    pub fn blocking_recv(&mut self) -> Option<IngestMessage> {
        let message = self.rx.blocking_recv()?;
        if matches!(message, IngestMessage::Observation(_)) {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        Some(message)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Outcome of a writer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
    pub reconnects: u64,
}

/// Drains the queue into a store connection
pub struct Writer {
    conn: Box<dyn StoreConnection>,
    receiver: IngestReceiver,
    stats: WriterStats,
}

impl Writer {
    pub fn new(conn: Box<dyn StoreConnection>, receiver: IngestReceiver) -> Self {
        Self {
            conn,
            receiver,
            stats: WriterStats::default(),
        }
    }

    /// Run on a dedicated named thread
    pub fn spawn(self) -> std::io::Result<Worker<WriterStats>> {
        Worker::spawn("airsniff-writer", move || self.run())
    }

    /// Drain until `Shutdown`. Blocks the calling thread.
    pub fn run(mut self) -> WriterStats {
        log::info!("Database writer started");

        loop {
            match self.receiver.blocking_recv() {
                Some(IngestMessage::Observation(observation)) => self.write(&observation),
                Some(IngestMessage::Shutdown) => {
                    log::debug!("Writer received shutdown");
                    break;
                }
                None => {
                    log::warn!("Ingestion queue closed without shutdown");
                    break;
                }
            }
        }

        let stats = self.stats;
        // Dropping the connection closes it
        drop(self.conn);
        log::info!(
            "Database writer stopped: {} written, {} failed, {} reconnects",
            stats.written,
            stats.failed,
            stats.reconnects
        );
        stats
    }

    /// Write one observation. A failed item is dropped, not retried; only a
    /// transient failure triggers a reconnect.
    fn write(&mut self, observation: &Observation) {
        match self.conn.insert_observation(observation) {
            Ok(()) => {
                self.stats.written += 1;
                if self.stats.written % PROGRESS_LOG_INTERVAL == 0 {
                    log::info!(
                        "{} observations written, queue depth {}",
                        self.stats.written,
                        self.receiver.depth()
                    );
                }
            }
            Err(e) if e.is_transient() => {
                self.stats.failed += 1;
                log::error!("Database error: {}", e);
                match self.conn.reconnect() {
                    Ok(()) => self.stats.reconnects += 1,
                    Err(e) => log::error!("Reconnect failed: {}", e),
                }
            }
            Err(e) => {
                // A rejected row; the connection itself is fine
                self.stats.failed += 1;
                log::error!("Database error, observation dropped: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::tests::sample_observation;
    use crate::observation::ProjectId;
    use crate::project::{Project, ProjectType};
    use crate::store::{StoreError, StoreResult};
    use chrono::NaiveDateTime;
    use std::sync::Mutex;

    /// Records inserted frame subtypes; fails the inserts whose subtype is listed
    #[derive(Default)]
    struct RecordingStore {
        inserted: Arc<Mutex<Vec<String>>>,
        reconnects: Arc<AtomicUsize>,
        fail_subtypes: Vec<&'static str>,
        reject_subtypes: Vec<&'static str>,
    }

    impl StoreConnection for RecordingStore {
        fn insert_observation(&mut self, observation: &Observation) -> StoreResult<()> {
            if self.fail_subtypes.contains(&observation.frame_subtype.as_str()) {
                return Err(StoreError::Transient("connection reset".into()));
            }
            if self.reject_subtypes.contains(&observation.frame_subtype.as_str()) {
                return Err(StoreError::Fatal("CHECK constraint failed".into()));
            }
            self.inserted.lock().unwrap().push(observation.frame_subtype.clone());
            Ok(())
        }

        fn create_project(&mut self, _: NaiveDateTime, _: ProjectType) -> StoreResult<ProjectId> {
            Ok(ProjectId(1))
        }

        fn close_project(&mut self, _: ProjectId, _: NaiveDateTime) -> StoreResult<()> {
            Ok(())
        }

        fn find_project(&mut self, _: ProjectId) -> StoreResult<Option<Project>> {
            Ok(None)
        }

        fn reconnect(&mut self) -> StoreResult<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn observation(subtype: &str) -> Observation {
        let mut obs = sample_observation();
        obs.frame_subtype = subtype.to_string();
        obs
    }

    #[test]
    fn test_depth_tracks_queued_observations() {
        let (queue, mut receiver) = IngestQueue::new();
        assert!(queue.push(observation("1")));
        assert!(queue.push(observation("2")));
        assert!(queue.shutdown());
        assert_eq!(queue.depth(), 2);

        assert!(matches!(receiver.blocking_recv(), Some(IngestMessage::Observation(_))));
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_writer_preserves_order_and_stops_at_shutdown() {
        let (queue, receiver) = IngestQueue::new();
        let store = RecordingStore::default();
        let inserted = Arc::clone(&store.inserted);

        for subtype in ["a", "b", "c"] {
            queue.push(observation(subtype));
        }
        queue.shutdown();
        queue.push(observation("after"));

        let stats = Writer::new(Box::new(store), receiver).run();
        assert_eq!(*inserted.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(stats, WriterStats { written: 3, failed: 0, reconnects: 0 });
    }

    #[test]
    fn test_failed_write_reconnects_and_continues() {
        let (queue, receiver) = IngestQueue::new();
        let store = RecordingStore {
            fail_subtypes: vec!["bad"],
            ..Default::default()
        };
        let inserted = Arc::clone(&store.inserted);
        let reconnects = Arc::clone(&store.reconnects);

        queue.push(observation("bad"));
        queue.push(observation("good"));
        queue.shutdown();

        let stats = Writer::new(Box::new(store), receiver).run();
        assert_eq!(*inserted.lock().unwrap(), vec!["good"]);
        assert_eq!(reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(stats, WriterStats { written: 1, failed: 1, reconnects: 1 });
    }

    #[test]
    fn test_rejected_write_does_not_reconnect() {
        let (queue, receiver) = IngestQueue::new();
        let store = RecordingStore {
            reject_subtypes: vec!["rejected"],
            ..Default::default()
        };
        let inserted = Arc::clone(&store.inserted);
        let reconnects = Arc::clone(&store.reconnects);

        queue.push(observation("rejected"));
        queue.push(observation("fine"));
        queue.shutdown();

        let stats = Writer::new(Box::new(store), receiver).run();
        assert_eq!(*inserted.lock().unwrap(), vec!["fine"]);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(stats, WriterStats { written: 1, failed: 1, reconnects: 0 });
    }

    #[tokio::test]
    async fn test_spawned_writer_drains_before_exit() {
        let (queue, receiver) = IngestQueue::new();
        let store = RecordingStore::default();
        let inserted = Arc::clone(&store.inserted);

        let worker = Writer::new(Box::new(store), receiver).spawn().unwrap();
        for i in 0..50 {
            queue.push(observation(&i.to_string()));
        }
        queue.shutdown();

        let stats = worker
            .join_timeout(std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stats.written, 50);
        assert_eq!(inserted.lock().unwrap().last().map(String::as_str), Some("49"));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_closed_queue_stops_writer() {
        let (queue, receiver) = IngestQueue::new();
        queue.push(observation("x"));
        drop(queue);
        let stats = Writer::new(Box::new(RecordingStore::default()), receiver).run();
        assert_eq!(stats.written, 1);
    }
}
