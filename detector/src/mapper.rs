//! Stable gestures to playback commands.

use serde::{Deserialize, Serialize};
use tempo_common::config::PlaybackConfig;
use tempo_common::gesture::{GestureLabel, StableGestureEvent};

/// Last known state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub is_playing: bool,
    pub rate: f64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            is_playing: false,
            rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "delta", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play,
    Pause,
    SpeedUp(f64),
    SpeedDown(f64),
}

impl PlaybackCommand {
    /// State after the command takes effect. The rate stays within
    /// `[min_rate, max_rate]` and is rounded to 1/1000.
    pub fn apply_to(&self, state: PlayerState, config: &PlaybackConfig) -> PlayerState {
        match *self {
            Self::Play => PlayerState {
                is_playing: true,
                ..state
            },
            Self::Pause => PlayerState {
                is_playing: false,
                ..state
            },
            Self::SpeedUp(delta) => PlayerState {
                rate: clamp_rate(state.rate + delta, config),
                ..state
            },
            Self::SpeedDown(delta) => PlayerState {
                rate: clamp_rate(state.rate - delta, config),
                ..state
            },
        }
    }
}

pub(crate) fn clamp_rate(rate: f64, config: &PlaybackConfig) -> f64 {
    let rounded = (rate * 1000.0).round() / 1000.0;
    rounded.clamp(config.min_rate, config.max_rate)
}

#[derive(Debug, Clone)]
pub struct CommandMapper {
    config: PlaybackConfig,
}

impl CommandMapper {
    pub fn new(config: PlaybackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn map(&self, event: &StableGestureEvent, state: &PlayerState) -> Option<PlaybackCommand> {
        let c = &self.config;
        match event.label {
            GestureLabel::Fist if state.is_playing => Some(PlaybackCommand::Pause),
            GestureLabel::TwoFingerConduct if !state.is_playing => Some(PlaybackCommand::Play),
            GestureLabel::PalmUp if state.rate < c.max_rate => {
                Some(PlaybackCommand::SpeedUp(c.rate_step.min(c.max_rate - state.rate)))
            }
            GestureLabel::PalmDown if state.rate > c.min_rate => {
                Some(PlaybackCommand::SpeedDown(c.rate_step.min(state.rate - c.min_rate)))
            }
            _ => None,
        }
    }
}
