//! Rule-based gesture classification over hand geometry.

pub mod features;

use tempo_common::config::ClassifierConfig;
use tempo_common::gesture::{GestureLabel, RawGestureSample};
use tempo_common::landmark::{Finger, LandmarkSet};
use tracing::trace;

use features::HandFeatures;

/// Per-label scores for one hand, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureScores {
    pub fist: f32,
    pub two_finger: f32,
    pub palm_up: f32,
    pub palm_down: f32,
}

impl GestureScores {
    fn get(&self, label: GestureLabel) -> f32 {
        match label {
            GestureLabel::Fist => self.fist,
            GestureLabel::TwoFingerConduct => self.two_finger,
            GestureLabel::PalmUp => self.palm_up,
            GestureLabel::PalmDown => self.palm_down,
            GestureLabel::None => 0.0,
        }
    }

    /// Highest scoring label; exact ties resolve in [`GestureLabel::ACTIONS`] order.
    pub fn best(&self) -> (GestureLabel, f32) {
        let mut best = (GestureLabel::None, 0.0);
        for label in GestureLabel::ACTIONS {
            let score = self.get(label);
            if score > best.1 {
                best = (label, score);
            }
        }
        best
    }
}

/// Result of classifying every hand in one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameVerdict<'a> {
    pub sample: RawGestureSample,
    /// The hand the sample was taken from, if any hand was present.
    pub hand: Option<&'a LandmarkSet>,
}

#[derive(Debug, Clone)]
pub struct GestureClassifier {
    config: ClassifierConfig,
    orientation_cos: f32,
}

impl GestureClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let orientation_cos = config.orientation_tolerance_deg.to_radians().cos();
        Self {
            config,
            orientation_cos,
        }
    }

    pub fn features(&self, hand: &LandmarkSet) -> HandFeatures {
        HandFeatures::compute(
            hand,
            self.config.curled_angle_deg,
            self.config.extended_angle_deg,
        )
    }

    pub fn scores(&self, hand: &LandmarkSet) -> GestureScores {
        let f = self.features(hand);
        let e = |finger| f.extension_of(finger);

        let fist = Finger::ALL.iter().map(|&x| 1.0 - e(x)).sum::<f32>() / 4.0;
        let two_finger = (e(Finger::Index)
            + e(Finger::Middle)
            + (1.0 - e(Finger::Ring))
            + (1.0 - e(Finger::Pinky)))
            / 4.0;
        let open = Finger::ALL.iter().map(|&x| e(x)).sum::<f32>() / 4.0;

        let (palm_up, palm_down) = if f.up >= self.orientation_cos {
            (open, 0.0)
        } else if f.up <= -self.orientation_cos {
            (0.0, open)
        } else {
            (0.0, 0.0)
        };

        GestureScores {
            fist,
            two_finger,
            palm_up,
            palm_down,
        }
    }

    /// Classify a single hand.
    pub fn classify(&self, hand: &LandmarkSet, timestamp_ms: u64) -> RawGestureSample {
        let scores = self.scores(hand);
        let (label, score) = scores.best();
        let confidence = (score * hand.confidence).clamp(0.0, 1.0);
        let label = if confidence < self.config.min_confidence {
            GestureLabel::None
        } else {
            label
        };
        trace!(?scores, %label, confidence, "hand classified");
        RawGestureSample::new(label, confidence, timestamp_ms)
    }

    /// Classify every hand and keep the most confident one. Equal confidences
    /// go to the leftmost hand in the image.
    pub fn classify_frame<'a>(&self, hands: &'a [LandmarkSet], timestamp_ms: u64) -> FrameVerdict<'a> {
        let mut best: Option<(RawGestureSample, &'a LandmarkSet)> = None;
        for hand in hands {
            let sample = self.classify(hand, timestamp_ms);
            let replace = match &best {
                None => true,
                Some((current, current_hand)) => {
                    sample.confidence > current.confidence
                        || (sample.confidence == current.confidence
                            && hand.wrist().x < current_hand.wrist().x)
                }
            };
            if replace {
                best = Some((sample, hand));
            }
        }

        match best {
            Some((sample, hand)) => FrameVerdict {
                sample,
                hand: Some(hand),
            },
            None => FrameVerdict {
                sample: RawGestureSample::none(timestamp_ms),
                hand: None,
            },
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn classifier() -> GestureClassifier {
        GestureClassifier::new(ClassifierConfig::default())
    }

    #[test]
    fn recognises_each_gesture() {
        let c = classifier();
        for (hand, expected) in [
            (fist(), GestureLabel::Fist),
            (two_finger(), GestureLabel::TwoFingerConduct),
            (palm_up(), GestureLabel::PalmUp),
            (palm_down(), GestureLabel::PalmDown),
        ] {
            let sample = c.classify(&hand, 10);
            assert_eq!(sample.label, expected);
            assert!((sample.confidence - 0.9).abs() < 1e-4, "{expected}: {}", sample.confidence);
            assert_eq!(sample.timestamp_ms, 10);
        }
    }

    #[test]
    fn sideways_palm_is_none() {
        let hand = synthetic_hand([true; 4], (1.0, 0.0), (0.2, 0.5), 0.9);
        let sample = classifier().classify(&hand, 0);
        assert_eq!(sample.label, GestureLabel::None);
        // The confidence is kept even when the label is suppressed.
        assert!(sample.confidence > 0.0);
    }

    #[test]
    fn low_hand_confidence_is_none() {
        let hand = synthetic_hand([false; 4], UP, (0.5, 0.7), 0.4);
        let sample = classifier().classify(&hand, 0);
        assert_eq!(sample.label, GestureLabel::None);
        assert!((sample.confidence - 0.4).abs() < 1e-4);
    }

    #[test]
    fn no_hands_is_none_with_zero_confidence() {
        let verdict = classifier().classify_frame(&[], 42);
        assert_eq!(verdict.sample, RawGestureSample::none(42));
        assert!(verdict.hand.is_none());
    }

    #[test]
    fn most_confident_hand_wins() {
        let weak = synthetic_hand([false; 4], UP, (0.2, 0.7), 0.7);
        let strong = synthetic_hand([true; 4], UP, (0.8, 0.7), 0.95);
        let hands = [weak, strong];
        let verdict = classifier().classify_frame(&hands, 0);
        assert_eq!(verdict.sample.label, GestureLabel::PalmUp);
        assert_eq!(verdict.hand.map(|h| h.wrist().x), Some(0.8));
    }

    #[test]
    fn equal_confidence_goes_to_leftmost_hand() {
        let right = synthetic_hand([false; 4], UP, (0.7, 0.7), 0.9);
        let left = synthetic_hand([true, true, false, false], UP, (0.3, 0.7), 0.9);
        let hands = [right, left];
        let verdict = classifier().classify_frame(&hands, 0);
        assert_eq!(verdict.sample.label, GestureLabel::TwoFingerConduct);
        assert_eq!(verdict.hand.map(|h| h.wrist().x), Some(0.3));
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let hand = two_finger();
        let first = c.classify(&hand, 5);
        for _ in 0..20 {
            assert_eq!(c.classify(&hand, 5), first);
        }
    }

    #[test]
    fn exact_ties_follow_action_order() {
        let scores = GestureScores {
            fist: 0.5,
            two_finger: 0.5,
            palm_up: 0.2,
            palm_down: 0.0,
        };
        assert_eq!(scores.best(), (GestureLabel::Fist, 0.5));
    }
}
