//! Frame sources and the capture loop
//!
//! The loop pulls frames from a [`FrameSource`] on a dedicated thread and hands
//! each one to a [`FrameHandler`], which classifies, echoes and enqueues it.
//! Nothing on this path waits for storage.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::classify::{classify, CapturedFrame, ClassifyContext};
use crate::console::CsvEcho;
use crate::gps::PositionReader;
use crate::ingest::IngestQueue;
use crate::Result;

/// What a source produced on one poll
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Frame(CapturedFrame),
    /// The read timed out; gives the loop a chance to observe cancellation
    Idle,
    /// The source has no more frames
    Closed,
}

/// A blocking source of captured frames
pub trait FrameSource: Send {
    fn next_event(&mut self) -> Result<CaptureEvent>;
}

/// Deferred construction of a source, run on the capture thread
pub type SourceOpener = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Live capture parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub interface: String,
    pub snaplen: i32,
    pub promiscuous: bool,
    pub read_timeout: Duration,
}

#[cfg(feature = "pcap-capture")]
pub use self::live::PcapSource;

#[cfg(feature = "pcap-capture")]
mod live {
    use super::*;
    use crate::SniffError;
    use pcap::{Active, Capture};

    /// Live capture from a network device through libpcap
    pub struct PcapSource {
        capture: Capture<Active>,
        link_type: i32,
    }

    impl PcapSource {
        pub fn open(settings: &SourceSettings) -> Result<Self> {
            let timeout_ms = i32::try_from(settings.read_timeout.as_millis()).unwrap_or(i32::MAX);
            let capture = Capture::from_device(settings.interface.as_str())
                .map_err(|e| capture_error(&settings.interface, e))?
                .promisc(settings.promiscuous)
                .snaplen(settings.snaplen)
                .timeout(timeout_ms)
                .open()
                .map_err(|e| capture_error(&settings.interface, e))?;

            let link_type = capture.get_datalink().0;
            if link_type != dot11::LINKTYPE_IEEE802_11_RADIOTAP && link_type != dot11::LINKTYPE_IEEE802_11 {
                log::warn!(
                    "{} delivers link type {}; frames will be skipped until it is in monitor mode",
                    settings.interface,
                    link_type
                );
            }
            log::info!("Capturing on {} (link type {})", settings.interface, link_type);

            Ok(Self { capture, link_type })
        }

        /// Opener for the capture thread
        pub fn opener(settings: SourceSettings) -> SourceOpener {
            Box::new(move || {
                let source: Box<dyn FrameSource> = Box::new(PcapSource::open(&settings)?);
                Ok(source)
            })
        }
    }

    fn capture_error(interface: &str, err: pcap::Error) -> SniffError {
        SniffError::Capture(format!("{}: {}", interface, err))
    }

    impl FrameSource for PcapSource {
        fn next_event(&mut self) -> Result<CaptureEvent> {
            match self.capture.next_packet() {
                Ok(packet) => Ok(CaptureEvent::Frame(CapturedFrame::new(
                    bytes::Bytes::copy_from_slice(packet.data),
                    self.link_type,
                ))),
                Err(pcap::Error::TimeoutExpired) => Ok(CaptureEvent::Idle),
                Err(pcap::Error::NoMorePackets) => Ok(CaptureEvent::Closed),
                Err(e) => Err(SniffError::Capture(e.to_string())),
            }
        }
    }
}

/// Counters for one capture run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Frames delivered by the source
    pub frames: u64,
    /// Frames turned into observations
    pub observations: u64,
    /// Frames without a usable 802.11 header
    pub skipped: u64,
}

/// Local wall-clock time that never goes backwards within a run
#[derive(Debug, Default)]
pub struct CaptureClock {
    last: Option<NaiveDateTime>,
}

impl CaptureClock {
    pub fn now(&mut self) -> NaiveDateTime {
        self.observe(Local::now().naive_local())
    }

    fn observe(&mut self, time: NaiveDateTime) -> NaiveDateTime {
        let time = match self.last {
            Some(last) if last > time => last,
            _ => time,
        };
        self.last = Some(time);
        time
    }
}

/// Per-frame work of the capture loop
pub struct FrameHandler {
    context: ClassifyContext,
    position: PositionReader,
    queue: IngestQueue,
    echo: Option<CsvEcho>,
    clock: CaptureClock,
    stats: CaptureStats,
}

impl FrameHandler {
    pub fn new(
        context: ClassifyContext,
        position: PositionReader,
        queue: IngestQueue,
        echo: Option<CsvEcho>,
    ) -> Self {
        Self {
            context,
            position,
            queue,
            echo,
            clock: CaptureClock::default(),
            stats: CaptureStats::default(),
        }
    }

    /// Classify, echo and enqueue one frame
    pub fn handle(&mut self, frame: &CapturedFrame) {
        self.stats.frames += 1;

        let capture_time = self.clock.now();
        let Some(observation) = classify(frame, &self.context, capture_time, self.position.snapshot()) else {
            self.stats.skipped += 1;
            return;
        };
        self.stats.observations += 1;

        if let Some(echo) = self.echo.as_mut() {
            if let Err(e) = echo.echo(&observation) {
                log::warn!("Console output failed, disabling echo: {}", e);
                self.echo = None;
            }
        }

        if !self.queue.push(observation) {
            log::warn!("Writer is gone; observation dropped");
        }
        log::debug!("Queue depth {}", self.queue.depth());
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }
}

/// Pull frames until `running` is cleared or the source closes
pub fn run_capture_loop(
    source: &mut dyn FrameSource,
    handler: &mut FrameHandler,
    running: &AtomicBool,
) -> Result<CaptureStats> {
    while running.load(Ordering::SeqCst) {
        match source.next_event()? {
            CaptureEvent::Frame(frame) => handler.handle(&frame),
            CaptureEvent::Idle => {}
            CaptureEvent::Closed => {
                log::info!("Frame source closed");
                break;
            }
        }
    }
    Ok(handler.stats())
}
