//! Camera frame sources and the scoped camera session.
//!
//! Sources write into a single-slot `watch` channel: a newer frame replaces
//! an unread older one, so a slow consumer only ever sees the freshest frame.

pub mod mjpeg;
pub mod polling;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tempo_common::config::CameraConfig;
use tempo_common::frame::Frame;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use mjpeg::MjpegSource;
pub use polling::PollingSource;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("camera returned HTTP status {0}")]
    HttpStatus(u16),
    #[error("camera stream error: {0}")]
    Stream(reqwest::Error),
    #[error("unknown camera mode '{0}', expected 'mjpeg' or 'polling'")]
    UnknownMode(String),
    #[error("camera fps {0} gives no usable polling interval")]
    InvalidRate(f64),
}

/// Monotonic millisecond clock shared by every session of one pipeline.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CameraEventKind {
    Streaming,
    Unavailable(String),
}

/// Connectivity report from a capture task, tagged with its session so
/// late reports from a closed session can be ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEvent {
    pub session: u64,
    pub kind: CameraEventKind,
}

/// Write side handed to a [`FrameSource`]: stamps frames and publishes them
/// into the latest-frame slot.
pub struct FrameSink {
    session: u64,
    frames: watch::Sender<Option<Frame>>,
    events: mpsc::UnboundedSender<CameraEvent>,
    clock: Clock,
    next_seq: u64,
    streaming: bool,
}

impl FrameSink {
    /// Report that the camera is delivering frames. Only the first call
    /// after a failure is forwarded.
    pub fn connected(&mut self) {
        if !self.streaming {
            self.streaming = true;
            self.report(CameraEventKind::Streaming);
        }
    }

    /// Publish a frame, replacing any frame the consumer has not picked up.
    pub fn push(&mut self, jpeg: Bytes) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Frame::new(jpeg, self.clock.now_ms(), seq);
        debug!(seq, bytes = frame.payload_size(), "frame captured");
        self.frames.send_replace(Some(frame));
        seq
    }

    fn lost(&mut self, reason: String) {
        self.streaming = false;
        self.report(CameraEventKind::Unavailable(reason));
    }

    fn report(&self, kind: CameraEventKind) {
        // The coordinator may already be gone during shutdown.
        let _ = self.events.send(CameraEvent {
            session: self.session,
            kind,
        });
    }
}

/// Anything that can stream camera frames into a [`FrameSink`].
///
/// `stream` returns when the connection ends; `Ok` means a clean end of
/// stream, `Err` means the camera could not be reached or was lost.
pub trait FrameSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn stream<'a>(&'a self, sink: &'a mut FrameSink) -> BoxFuture<'a, Result<(), SourceError>>;
}

/// Build the source selected by `[camera] mode`.
pub fn build_source(config: &CameraConfig) -> Result<Arc<dyn FrameSource>, SourceError> {
    match config.mode.as_str() {
        "mjpeg" => Ok(Arc::new(MjpegSource::new(&config.url))),
        "polling" => {
            let interval = Duration::try_from_secs_f64(1.0 / config.fps)
                .map_err(|_| SourceError::InvalidRate(config.fps))?;
            Ok(Arc::new(PollingSource::new(
                &config.url,
                interval.max(Duration::from_millis(1)),
            )))
        }
        other => Err(SourceError::UnknownMode(other.to_string())),
    }
}

/// An open camera. The capture task lives exactly as long as this value:
/// dropping the session aborts the task, which closes the connection and
/// releases the camera.
pub struct CameraSession {
    id: u64,
    task: JoinHandle<()>,
    frames: watch::Receiver<Option<Frame>>,
}

impl CameraSession {
    pub fn open(
        id: u64,
        source: Arc<dyn FrameSource>,
        clock: Clock,
        events: mpsc::UnboundedSender<CameraEvent>,
    ) -> Self {
        let (frames_tx, frames_rx) = watch::channel(None);
        let mut sink = FrameSink {
            session: id,
            frames: frames_tx,
            events,
            clock,
            next_seq: 0,
            streaming: false,
        };

        info!(session = id, source = source.name(), "opening camera session");
        let task = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match source.stream(&mut sink).await {
                    Ok(()) => {
                        info!(session = id, "camera stream ended cleanly, reconnecting");
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(e) => {
                        warn!(error = %e, session = id, "camera error, retrying in {:?}", backoff);
                        sink.lost(e.to_string());
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });

        Self {
            id,
            task,
            frames: frames_rx,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frames(&mut self) -> &mut watch::Receiver<Option<Frame>> {
        &mut self.frames
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.task.abort();
        info!(session = self.id, "camera released");
    }
}
