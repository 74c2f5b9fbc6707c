//! Conductor tempo feedback from the wrist trajectory.
//!
//! Advisory only: readings end up in the status readout and never turn
//! into playback commands.

use serde::Serialize;
use std::collections::VecDeque;
use tempo_common::config::TempoConfig;
use tempo_common::gesture::GestureLabel;
use tracing::{debug, info};

/// How long the "not quite my tempo" cue stays raised.
const CUE_DURATION_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TempoFeedback {
    Faster,
    EvenFaster,
    OnTempo,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TempoStatus {
    pub feedback: Option<TempoFeedback>,
    /// Displacement across the trajectory, in normalised image units.
    pub speed: f32,
    /// True while the "not quite my tempo" cue is showing.
    pub not_my_tempo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Conducting,
    Sweep,
    OpenPalm,
    Fist,
    Other,
}

pub struct TempoTracker {
    config: TempoConfig,
    trajectory: VecDeque<(f32, f32)>,
    speed: f32,
    last_direction: Option<i8>,
    feedback: Option<TempoFeedback>,
    last_motion: Option<Motion>,
    cue_until_ms: Option<u64>,
}

impl TempoTracker {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            trajectory: VecDeque::with_capacity(config.trajectory_len),
            config,
            speed: 0.0,
            last_direction: None,
            feedback: None,
            last_motion: None,
            cue_until_ms: None,
        }
    }

    /// Feed one frame: the per-frame label and the wrist of the hand it came
    /// from, or `None` when no hand was visible.
    pub fn observe(&mut self, label: GestureLabel, wrist: Option<(f32, f32)>, ts: u64) -> TempoStatus {
        if let Some(until) = self.cue_until_ms {
            if ts >= until {
                self.cue_until_ms = None;
            }
        }
        let Some(wrist) = wrist else {
            return self.status();
        };

        if self.trajectory.len() == self.config.trajectory_len {
            self.trajectory.pop_front();
        }
        self.trajectory.push_back(wrist);

        let motion = match label {
            GestureLabel::TwoFingerConduct => {
                self.measure_beat();
                Motion::Conducting
            }
            GestureLabel::PalmUp | GestureLabel::PalmDown => {
                self.feedback = None;
                if self.is_sweep() {
                    Motion::Sweep
                } else {
                    Motion::OpenPalm
                }
            }
            GestureLabel::Fist => {
                self.feedback = None;
                self.trajectory.clear();
                if self.last_motion == Some(Motion::Sweep) {
                    info!("not quite my tempo");
                    self.cue_until_ms = Some(ts + CUE_DURATION_MS);
                }
                Motion::Fist
            }
            GestureLabel::None => {
                self.feedback = None;
                Motion::Other
            }
        };
        self.last_motion = Some(motion);
        self.status()
    }

    pub fn status(&self) -> TempoStatus {
        TempoStatus {
            feedback: self.feedback,
            speed: self.speed,
            not_my_tempo: self.cue_until_ms.is_some(),
        }
    }

    pub fn reset(&mut self) {
        self.trajectory.clear();
        self.speed = 0.0;
        self.last_direction = None;
        self.feedback = None;
        self.last_motion = None;
        self.cue_until_ms = None;
    }

    fn endpoints(&self) -> Option<((f32, f32), (f32, f32))> {
        if self.trajectory.len() < self.config.trajectory_len {
            return None;
        }
        Some((*self.trajectory.front()?, *self.trajectory.back()?))
    }

    fn measure_beat(&mut self) {
        let Some((first, last)) = self.endpoints() else {
            return;
        };
        let dx = last.0 - first.0;
        let dy = last.1 - first.1;
        let displacement = (dx * dx + dy * dy).sqrt();
        let direction = if dx > 0.0 {
            1
        } else if dx < 0.0 {
            -1
        } else {
            0
        };

        // At a turnaround the displacement collapses; hold the faster reading.
        self.speed = match self.last_direction {
            Some(prev) if prev != direction => self.speed.max(displacement),
            _ => displacement,
        };
        self.last_direction = Some(direction);

        let feedback = if self.speed < self.config.speed_threshold {
            TempoFeedback::Faster
        } else if self.speed < self.config.speedy_threshold {
            TempoFeedback::EvenFaster
        } else {
            TempoFeedback::OnTempo
        };
        if self.feedback != Some(feedback) {
            debug!(?feedback, speed = self.speed, "tempo feedback changed");
        }
        self.feedback = Some(feedback);
    }

    fn is_sweep(&self) -> bool {
        let Some((first, last)) = self.endpoints() else {
            return false;
        };
        let mid = self.trajectory[self.trajectory.len() / 2];
        let displacement = ((last.0 - first.0).powi(2) + (last.1 - first.1).powi(2)).sqrt();
        let expected = ((first.0 + last.0) / 2.0, (first.1 + last.1) / 2.0);
        let curvature = ((mid.0 - expected.0).powi(2) + (mid.1 - expected.1).powi(2)).sqrt();
        displacement > self.config.movement_threshold && curvature > self.config.curvature_threshold
    }
}
