use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete gesture vocabulary recognised by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GestureLabel {
    /// Conductor's fist: all four fingers curled.
    Fist,
    /// Index and middle extended, ring and pinky curled.
    TwoFingerConduct,
    /// Open palm, fingers pointing up.
    PalmUp,
    /// Open palm, fingers pointing down.
    PalmDown,
    #[default]
    None,
}

impl GestureLabel {
    /// Labels that carry an action, in classifier tie-break order.
    pub const ACTIONS: [GestureLabel; 4] = [
        GestureLabel::Fist,
        GestureLabel::TwoFingerConduct,
        GestureLabel::PalmUp,
        GestureLabel::PalmDown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fist => "fist",
            Self::TwoFingerConduct => "two-finger-conduct",
            Self::PalmUp => "palm-up",
            Self::PalmDown => "palm-down",
            Self::None => "none",
        }
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-frame classifier output. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawGestureSample {
    pub label: GestureLabel,
    pub confidence: f32,
    pub timestamp_ms: u64,
}

impl RawGestureSample {
    pub fn new(label: GestureLabel, confidence: f32, timestamp_ms: u64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp_ms,
        }
    }

    pub fn none(timestamp_ms: u64) -> Self {
        Self::new(GestureLabel::None, 0.0, timestamp_ms)
    }
}

/// A debounced gesture: `label` held unbroken since `onset_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StableGestureEvent {
    pub label: GestureLabel,
    pub onset_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_display() {
        for label in GestureLabel::ACTIONS.iter().chain([GestureLabel::None].iter()) {
            let json = toml::Value::try_from(label).unwrap();
            assert_eq!(json.as_str(), Some(label.as_str()));
        }
    }

    #[test]
    fn sample_confidence_clamped() {
        assert_eq!(RawGestureSample::new(GestureLabel::Fist, 1.7, 0).confidence, 1.0);
        assert_eq!(RawGestureSample::new(GestureLabel::Fist, -0.2, 0).confidence, 0.0);
        assert_eq!(RawGestureSample::none(5).label, GestureLabel::None);
    }
}
