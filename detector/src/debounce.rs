//! Temporal debouncing of raw per-frame gesture labels.

use tempo_common::gesture::{GestureLabel, RawGestureSample, StableGestureEvent};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DebounceState {
    Idle {
        stable: GestureLabel,
    },
    Pending {
        stable: GestureLabel,
        candidate: GestureLabel,
        since_ms: u64,
    },
}

/// Emits a [`StableGestureEvent`] once a label has been observed unbroken
/// for at least `window_ms`. Each onset is reported exactly once.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    state: DebounceState,
    last_ts: Option<u64>,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            state: DebounceState::Idle {
                stable: GestureLabel::None,
            },
            last_ts: None,
        }
    }

    /// The label most recently stabilised.
    pub fn stable(&self) -> GestureLabel {
        match self.state {
            DebounceState::Idle { stable } | DebounceState::Pending { stable, .. } => stable,
        }
    }

    /// The label currently waiting out the window, if any.
    pub fn candidate(&self) -> Option<GestureLabel> {
        match self.state {
            DebounceState::Pending { candidate, .. } => Some(candidate),
            DebounceState::Idle { .. } => None,
        }
    }

    pub fn push(&mut self, sample: RawGestureSample) -> Option<StableGestureEvent> {
        let ts = sample.timestamp_ms;
        if let Some(last) = self.last_ts {
            if ts < last {
                debug!(ts, last, "dropping out-of-order sample");
                return None;
            }
        }
        self.last_ts = Some(ts);

        let label = sample.label;
        match self.state {
            DebounceState::Idle { stable } => {
                if label == stable {
                    None
                } else {
                    self.enter_pending(stable, label, ts)
                }
            }
            DebounceState::Pending {
                stable,
                candidate,
                since_ms,
            } => {
                if label == candidate {
                    if ts - since_ms >= self.window_ms {
                        self.stabilise(candidate, since_ms)
                    } else {
                        None
                    }
                } else if label == stable {
                    self.state = DebounceState::Idle { stable };
                    None
                } else {
                    self.enter_pending(stable, label, ts)
                }
            }
        }
    }

    /// Forget all history, as if no sample had ever been seen.
    pub fn reset(&mut self) {
        self.state = DebounceState::Idle {
            stable: GestureLabel::None,
        };
        self.last_ts = None;
    }

    fn enter_pending(
        &mut self,
        stable: GestureLabel,
        candidate: GestureLabel,
        ts: u64,
    ) -> Option<StableGestureEvent> {
        if self.window_ms == 0 {
            return self.stabilise(candidate, ts);
        }
        self.state = DebounceState::Pending {
            stable,
            candidate,
            since_ms: ts,
        };
        None
    }

    fn stabilise(&mut self, label: GestureLabel, onset_ms: u64) -> Option<StableGestureEvent> {
        self.state = DebounceState::Idle { stable: label };
        debug!(%label, onset_ms, "gesture stabilised");
        Some(StableGestureEvent { label, onset_ms })
    }
}
