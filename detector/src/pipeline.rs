//! The coordinating task: camera session, extraction, classification,
//! debouncing and command dispatch.
//!
//! Exactly one task owns every piece of mutable state. Other tasks talk to
//! it through [`PipelineHandle`] and observe it through the status channel.

use serde::Serialize;
use std::sync::Arc;
use tempo_common::config::{Config, PipelineConfig};
use tempo_common::frame::Frame;
use tempo_common::gesture::{GestureLabel, StableGestureEvent};
use tempo_common::landmark::LandmarkSet;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::classifier::GestureClassifier;
use crate::debounce::Debouncer;
use crate::extractor::{ExtractError, HandExtractor};
use crate::mapper::{CommandMapper, PlaybackCommand, PlayerState};
use crate::player::{PlayerController, PlayerError};
use crate::source::{CameraEvent, CameraEventKind, CameraSession, Clock, FrameSource};
use crate::tempo::{TempoStatus, TempoTracker};

const CONTROL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    SetDetection(bool),
    /// State reported by the real player.
    PlayerReport(PlayerState),
    Shutdown,
}

/// Non-fatal conditions surfaced to observers. The pipeline keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    CameraUnavailable,
    ClassifierDegraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub detecting: bool,
    pub condition: Option<Condition>,
    /// Per-frame label of the most recent processed frame.
    pub raw_label: GestureLabel,
    pub last_gesture: Option<StableGestureEvent>,
    pub last_command: Option<PlaybackCommand>,
    pub player: PlayerState,
    pub tempo: TempoStatus,
    pub frames_processed: u64,
    pub updated_at: String,
}

impl PipelineStatus {
    fn initial(player: PlayerState) -> Self {
        Self {
            detecting: false,
            condition: None,
            raw_label: GestureLabel::None,
            last_gesture: None,
            last_command: None,
            player,
            tempo: TempoStatus::default(),
            frames_processed: 0,
            updated_at: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, thiserror::Error)]
#[error("pipeline has stopped")]
pub struct PipelineStopped;

/// Cloneable control and observation handle for a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    control: mpsc::Sender<Control>,
    status: watch::Receiver<PipelineStatus>,
}

impl PipelineHandle {
    pub async fn send(&self, control: Control) -> Result<(), PipelineStopped> {
        self.control.send(control).await.map_err(|_| PipelineStopped)
    }

    /// Non-blocking send for callers that cannot await, such as destructors.
    pub fn try_send(&self, control: Control) -> Result<(), mpsc::error::TrySendError<Control>> {
        self.control.try_send(control)
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }
}

enum Step {
    Control(Option<Control>),
    Camera(CameraEvent),
    Frame,
    FramesClosed,
}

enum Extraction {
    Done(Result<Vec<LandmarkSet>, ExtractError>),
    Interrupted(Option<Control>),
}

pub struct Pipeline<E, P> {
    config: PipelineConfig,
    source: Arc<dyn FrameSource>,
    extractor: E,
    classifier: GestureClassifier,
    debouncer: Debouncer,
    mapper: CommandMapper,
    tempo: TempoTracker,
    player: P,
    clock: Clock,
    session: Option<CameraSession>,
    next_session: u64,
    camera_tx: mpsc::UnboundedSender<CameraEvent>,
    camera_rx: mpsc::UnboundedReceiver<CameraEvent>,
    control: mpsc::Receiver<Control>,
    status_tx: watch::Sender<PipelineStatus>,
    status: PipelineStatus,
    camera_unavailable: bool,
    degraded: bool,
    consecutive_errors: u32,
}

impl<E: HandExtractor, P: PlayerController> Pipeline<E, P> {
    pub fn new(
        config: &Config,
        source: Arc<dyn FrameSource>,
        extractor: E,
        player: P,
    ) -> (Self, PipelineHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (camera_tx, camera_rx) = mpsc::unbounded_channel();
        let status = PipelineStatus::initial(player.state());
        let (status_tx, status_rx) = watch::channel(status.clone());

        let pipeline = Self {
            config: config.pipeline.clone(),
            source,
            extractor,
            classifier: GestureClassifier::new(config.classifier.clone()),
            debouncer: Debouncer::new(config.debounce.window_ms),
            mapper: CommandMapper::new(config.playback.clone()),
            tempo: TempoTracker::new(config.tempo.clone()),
            player,
            clock: Clock::start(),
            session: None,
            next_session: 0,
            camera_tx,
            camera_rx,
            control: control_rx,
            status_tx,
            status,
            camera_unavailable: false,
            degraded: false,
            consecutive_errors: 0,
        };
        let handle = PipelineHandle {
            control: control_tx,
            status: status_rx,
        };
        (pipeline, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(source = self.source.name(), "pipeline started");
        loop {
            let step = match self.session.as_mut() {
                Some(session) => tokio::select! {
                    msg = self.control.recv() => Step::Control(msg),
                    Some(event) = self.camera_rx.recv() => Step::Camera(event),
                    changed = session.frames().changed() => match changed {
                        Ok(()) => Step::Frame,
                        Err(_) => Step::FramesClosed,
                    },
                },
                None => tokio::select! {
                    msg = self.control.recv() => Step::Control(msg),
                    Some(event) = self.camera_rx.recv() => Step::Camera(event),
                },
            };

            match step {
                Step::Control(msg) => {
                    if !self.handle_control(msg) {
                        break;
                    }
                }
                Step::Camera(event) => self.handle_camera_event(event),
                Step::Frame => {
                    let frame = self
                        .session
                        .as_mut()
                        .and_then(|s| s.frames().borrow_and_update().clone());
                    if let Some(frame) = frame {
                        if !self.process_frame(frame).await {
                            break;
                        }
                    }
                }
                Step::FramesClosed => {
                    error!("capture task ended unexpectedly, reopening camera");
                    self.session = None;
                    self.open_session();
                }
            }
        }
        self.session = None;
        info!("pipeline stopped");
    }

    /// Returns false when the pipeline should stop.
    fn handle_control(&mut self, msg: Option<Control>) -> bool {
        match msg {
            Some(Control::SetDetection(true)) => {
                if self.session.is_none() {
                    self.open_session();
                    self.status.detecting = true;
                    self.publish();
                }
                true
            }
            Some(Control::SetDetection(false)) => {
                if self.session.is_some() {
                    self.close_session();
                    self.publish();
                }
                true
            }
            Some(Control::PlayerReport(state)) => {
                debug!(is_playing = state.is_playing, rate = state.rate, "player report");
                self.player.observe(state);
                self.publish();
                true
            }
            Some(Control::Shutdown) | None => false,
        }
    }

    fn open_session(&mut self) {
        self.next_session += 1;
        self.session = Some(CameraSession::open(
            self.next_session,
            Arc::clone(&self.source),
            self.clock,
            self.camera_tx.clone(),
        ));
        info!(session = self.next_session, "detection enabled");
    }

    fn close_session(&mut self) {
        self.session = None;
        self.debouncer.reset();
        self.tempo.reset();
        self.camera_unavailable = false;
        self.degraded = false;
        self.consecutive_errors = 0;
        self.status.detecting = false;
        self.status.raw_label = GestureLabel::None;
        self.status.tempo = TempoStatus::default();
        info!("detection disabled");
    }

    fn handle_camera_event(&mut self, event: CameraEvent) {
        let current = self.session.as_ref().map(CameraSession::id);
        if current != Some(event.session) {
            debug!(session = event.session, "ignoring event from closed camera session");
            return;
        }
        match event.kind {
            CameraEventKind::Streaming => {
                if self.camera_unavailable {
                    info!(session = event.session, "camera available again");
                }
                self.camera_unavailable = false;
            }
            CameraEventKind::Unavailable(reason) => {
                if !self.camera_unavailable {
                    warn!(session = event.session, reason = %reason, "camera unavailable");
                }
                self.camera_unavailable = true;
            }
        }
        self.publish();
    }

    /// Run one frame through the chain. Returns false when a control
    /// message received mid-extraction asks the pipeline to stop.
    async fn process_frame(&mut self, frame: Frame) -> bool {
        let outcome = {
            let mut extraction = self.extractor.extract(&frame);
            loop {
                tokio::select! {
                    result = &mut extraction => break Extraction::Done(result),
                    msg = self.control.recv() => match msg {
                        // `extraction` borrows the extractor, so publish field by field.
                        Some(Control::PlayerReport(state)) => {
                            self.player.observe(state);
                            self.status.player = self.player.state();
                            send_status(&self.status_tx, &mut self.status);
                        }
                        Some(Control::SetDetection(true)) => {}
                        other => break Extraction::Interrupted(other),
                    },
                }
            }
        };

        let result = match outcome {
            Extraction::Done(result) => result,
            Extraction::Interrupted(msg) => {
                debug!(seq = frame.seq, "extraction cancelled");
                return self.handle_control(msg);
            }
        };

        let ts = frame.timestamp_ms;
        self.status.frames_processed += 1;
        match result {
            Ok(hands) => {
                self.consecutive_errors = 0;
                if self.degraded {
                    info!("classifier recovered");
                    self.degraded = false;
                }
                let verdict = self.classifier.classify_frame(&hands, ts);
                let sample = verdict.sample;
                debug!(
                    seq = frame.seq,
                    hands = hands.len(),
                    label = %sample.label,
                    confidence = sample.confidence,
                    "frame classified"
                );
                let wrist = verdict.hand.map(|h| (h.wrist().x, h.wrist().y));
                self.status.tempo = self.tempo.observe(sample.label, wrist, ts);
                self.status.raw_label = sample.label;
                if let Some(event) = self.debouncer.push(sample) {
                    self.on_stable(event);
                }
            }
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors == 1 {
                    warn!(error = %e, seq = frame.seq, "extraction failed, skipping frame");
                } else {
                    debug!(error = %e, seq = frame.seq, failures = self.consecutive_errors, "extraction failed");
                }
                if self.consecutive_errors == self.config.degraded_after {
                    error!(
                        failures = self.consecutive_errors,
                        "classifier degraded after repeated extraction failures"
                    );
                    self.degraded = true;
                }
            }
        }
        self.publish();
        true
    }

    fn on_stable(&mut self, event: StableGestureEvent) {
        info!(label = %event.label, onset_ms = event.onset_ms, "stable gesture");
        self.status.last_gesture = Some(event);

        let state = self.player.state();
        let Some(command) = self.mapper.map(&event, &state) else {
            return;
        };
        match self.player.apply(command) {
            Ok(()) => {
                info!(?command, rate = self.player.state().rate, "command applied");
                self.status.last_command = Some(command);
            }
            Err(PlayerError::NotReady) => {
                warn!(?command, "player not ready, command dropped");
            }
            Err(e) => {
                warn!(error = %e, ?command, "command failed");
            }
        }
    }

    fn publish(&mut self) {
        self.status.condition = if self.camera_unavailable {
            Some(Condition::CameraUnavailable)
        } else if self.degraded {
            Some(Condition::ClassifierDegraded)
        } else {
            None
        };
        self.status.player = self.player.state();
        send_status(&self.status_tx, &mut self.status);
    }
}

fn send_status(tx: &watch::Sender<PipelineStatus>, status: &mut PipelineStatus) {
    status.updated_at = now_rfc3339();
    tx.send_replace(status.clone());
}
