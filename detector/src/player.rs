//! Player controllers: the sink for playback commands.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::mapper::{clamp_rate, PlaybackCommand, PlayerState};
use tempo_common::config::PlaybackConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PlayerError {
    #[error("player is not ready")]
    NotReady,
    #[error("player connection closed")]
    Closed,
}

/// Something that can be told to play, pause and change rate.
pub trait PlayerController: Send + 'static {
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    fn set_rate(&mut self, rate: f64) -> Result<(), PlayerError>;
    fn state(&self) -> PlayerState;

    /// Record the state reported by the actual player.
    fn observe(&mut self, _state: PlayerState) {}

    /// Apply a mapped command through the primitive operations.
    fn apply(&mut self, command: PlaybackCommand) -> Result<(), PlayerError> {
        match command {
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => self.pause(),
            PlaybackCommand::SpeedUp(delta) => {
                let rate = self.state().rate + delta;
                self.set_rate(rate)
            }
            PlaybackCommand::SpeedDown(delta) => {
                let rate = self.state().rate - delta;
                self.set_rate(rate)
            }
        }
    }
}

/// What a subscribed page receives: the command plus the state it should
/// end up in, so a page that missed a message can resynchronise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelayedCommand {
    pub command: PlaybackCommand,
    pub state: PlayerState,
}

/// Relays commands to browser pages subscribed over SSE.
///
/// Not ready until a page has reported its state; while no page is
/// subscribed every command is rejected.
pub struct RemotePlayer {
    commands: broadcast::Sender<RelayedCommand>,
    config: PlaybackConfig,
    state: PlayerState,
    ready: bool,
}

impl RemotePlayer {
    pub fn new(config: PlaybackConfig) -> Self {
        let (commands, _) = broadcast::channel(16);
        Self {
            commands,
            config,
            state: PlayerState::default(),
            ready: false,
        }
    }

    /// Handle for the HTTP layer to hand out command subscriptions.
    pub fn command_sender(&self) -> broadcast::Sender<RelayedCommand> {
        self.commands.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayedCommand> {
        self.commands.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.ready && self.commands.receiver_count() > 0
    }

    fn send(&mut self, command: PlaybackCommand, next: PlayerState) -> Result<(), PlayerError> {
        if !self.is_ready() {
            return Err(PlayerError::NotReady);
        }
        self.commands
            .send(RelayedCommand {
                command,
                state: next,
            })
            .map_err(|_| PlayerError::Closed)?;
        debug!(?command, "command relayed");
        self.state = next;
        Ok(())
    }
}

impl PlayerController for RemotePlayer {
    fn play(&mut self) -> Result<(), PlayerError> {
        let next = PlaybackCommand::Play.apply_to(self.state, &self.config);
        self.send(PlaybackCommand::Play, next)
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        let next = PlaybackCommand::Pause.apply_to(self.state, &self.config);
        self.send(PlaybackCommand::Pause, next)
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        let rate = clamp_rate(rate, &self.config);
        let delta = rate - self.state.rate;
        let command = if delta >= 0.0 {
            PlaybackCommand::SpeedUp(delta)
        } else {
            PlaybackCommand::SpeedDown(-delta)
        };
        let next = PlayerState { rate, ..self.state };
        self.send(command, next)
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn observe(&mut self, state: PlayerState) {
        if !self.ready {
            info!(is_playing = state.is_playing, rate = state.rate, "player ready");
        }
        self.ready = true;
        self.state = PlayerState {
            rate: clamp_rate(state.rate, &self.config),
            ..state
        };
    }
}

/// In-memory player that only tracks state.
#[derive(Debug, Clone)]
pub struct LocalPlayer {
    config: PlaybackConfig,
    state: PlayerState,
}

impl LocalPlayer {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            state: PlayerState::default(),
        }
    }
}

impl PlayerController for LocalPlayer {
    fn play(&mut self) -> Result<(), PlayerError> {
        self.state.is_playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        self.state.is_playing = false;
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<(), PlayerError> {
        self.state.rate = clamp_rate(rate, &self.config);
        Ok(())
    }

    fn state(&self) -> PlayerState {
        self.state
    }

    fn observe(&mut self, state: PlayerState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejects_until_a_page_reports() {
        let mut player = RemotePlayer::new(PlaybackConfig::default());
        assert_eq!(player.play(), Err(PlayerError::NotReady));

        // Subscribed but never reported.
        let _rx = player.subscribe();
        assert_eq!(player.play(), Err(PlayerError::NotReady));
        assert!(!player.state().is_playing);
    }

    #[test]
    fn remote_rejects_without_subscribers() {
        let mut player = RemotePlayer::new(PlaybackConfig::default());
        player.observe(PlayerState::default());
        assert_eq!(player.pause(), Err(PlayerError::NotReady));
    }

    #[tokio::test]
    async fn remote_relays_commands_and_tracks_state() {
        let mut player = RemotePlayer::new(PlaybackConfig::default());
        let mut rx = player.subscribe();
        player.observe(PlayerState {
            is_playing: false,
            rate: 1.0,
        });

        player.apply(PlaybackCommand::Play).unwrap();
        player.apply(PlaybackCommand::SpeedUp(0.25)).unwrap();

        assert_eq!(rx.recv().await.unwrap().command, PlaybackCommand::Play);
        let relayed = rx.recv().await.unwrap();
        assert_eq!(relayed.command, PlaybackCommand::SpeedUp(0.25));
        assert_eq!(relayed.state.rate, 1.25);
        assert_eq!(
            player.state(),
            PlayerState {
                is_playing: true,
                rate: 1.25
            }
        );
    }

    #[test]
    fn observed_state_overrides_local_guess() {
        let mut player = RemotePlayer::new(PlaybackConfig::default());
        let _rx = player.subscribe();
        player.observe(PlayerState::default());
        player.play().unwrap();
        player.observe(PlayerState {
            is_playing: false,
            rate: 0.5,
        });
        assert_eq!(
            player.state(),
            PlayerState {
                is_playing: false,
                rate: 0.5
            }
        );
    }

    #[test]
    fn local_player_clamps_rate() {
        let mut player = LocalPlayer::new(PlaybackConfig::default());
        player.set_rate(5.0).unwrap();
        assert_eq!(player.state().rate, 2.0);
        player.apply(PlaybackCommand::SpeedDown(10.0)).unwrap();
        assert_eq!(player.state().rate, 0.25);
    }
}
