//! Offline replay of recorded landmark traces through the gesture chain.

use serde::Deserialize;
use std::fmt;
use tempo_common::config::Config;
use tempo_common::gesture::{GestureLabel, StableGestureEvent};
use tempo_common::landmark::LandmarkSet;

use crate::classifier::GestureClassifier;
use crate::debounce::Debouncer;
use crate::mapper::{CommandMapper, PlaybackCommand, PlayerState};
use crate::player::{LocalPlayer, PlayerController};

/// One line of a trace file.
#[derive(Debug, Clone, Deserialize)]
pub struct TraceRecord {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub hands: Vec<LandmarkSet>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

pub fn parse_line(line_no: usize, line: &str) -> Result<Option<TraceRecord>, ReplayError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| ReplayError::Parse {
            line: line_no,
            source,
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    LabelChanged {
        timestamp_ms: u64,
        label: GestureLabel,
        confidence: f32,
    },
    Stable(StableGestureEvent),
    Command {
        command: PlaybackCommand,
        state: PlayerState,
    },
}

impl fmt::Display for ReplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LabelChanged {
                timestamp_ms,
                label,
                confidence,
            } => write!(f, "{timestamp_ms:>8} ms  raw     {label} ({confidence:.2})"),
            Self::Stable(event) => {
                write!(f, "{:>8} ms  stable  {}", event.onset_ms, event.label)
            }
            Self::Command { command, state } => write!(
                f,
                "             command {command:?} -> playing={} rate={:.2}",
                state.is_playing, state.rate
            ),
        }
    }
}

pub struct Replayer {
    classifier: GestureClassifier,
    debouncer: Debouncer,
    mapper: CommandMapper,
    player: LocalPlayer,
    last_label: Option<GestureLabel>,
}

impl Replayer {
    pub fn new(config: &Config) -> Self {
        Self {
            classifier: GestureClassifier::new(config.classifier.clone()),
            debouncer: Debouncer::new(config.debounce.window_ms),
            mapper: CommandMapper::new(config.playback.clone()),
            player: LocalPlayer::new(config.playback.clone()),
            last_label: None,
        }
    }

    pub fn player_state(&self) -> PlayerState {
        self.player.state()
    }

    pub fn step(&mut self, record: &TraceRecord) -> Vec<ReplayEvent> {
        let mut events = Vec::new();
        let sample = self
            .classifier
            .classify_frame(&record.hands, record.timestamp_ms)
            .sample;
        if self.last_label != Some(sample.label) {
            self.last_label = Some(sample.label);
            events.push(ReplayEvent::LabelChanged {
                timestamp_ms: sample.timestamp_ms,
                label: sample.label,
                confidence: sample.confidence,
            });
        }

        let Some(stable) = self.debouncer.push(sample) else {
            return events;
        };
        events.push(ReplayEvent::Stable(stable));

        if let Some(command) = self.mapper.map(&stable, &self.player.state()) {
            // The local player never rejects.
            if self.player.apply(command).is_ok() {
                events.push(ReplayEvent::Command {
                    command,
                    state: self.player.state(),
                });
            }
        }
        events
    }
}
