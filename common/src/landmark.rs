use serde::{Deserialize, Serialize};

/// Number of keypoints tracked per hand.
pub const LANDMARK_COUNT: usize = 21;

/// Landmark indices in the MediaPipe hand model order.
pub mod idx {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    pub const INDEX_MCP: usize = 5;
    pub const INDEX_PIP: usize = 6;
    pub const INDEX_DIP: usize = 7;
    pub const INDEX_TIP: usize = 8;
    pub const MIDDLE_MCP: usize = 9;
    pub const MIDDLE_PIP: usize = 10;
    pub const MIDDLE_DIP: usize = 11;
    pub const MIDDLE_TIP: usize = 12;
    pub const RING_MCP: usize = 13;
    pub const RING_PIP: usize = 14;
    pub const RING_DIP: usize = 15;
    pub const RING_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// The four non-thumb fingers, outermost last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 4] = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Pinky];

    /// (mcp, pip, tip) landmark indices.
    pub fn joints(self) -> (usize, usize, usize) {
        match self {
            Self::Index => (idx::INDEX_MCP, idx::INDEX_PIP, idx::INDEX_TIP),
            Self::Middle => (idx::MIDDLE_MCP, idx::MIDDLE_PIP, idx::MIDDLE_TIP),
            Self::Ring => (idx::RING_MCP, idx::RING_PIP, idx::RING_TIP),
            Self::Pinky => (idx::PINKY_MCP, idx::PINKY_PIP, idx::PINKY_TIP),
        }
    }
}

/// A single keypoint. `x`/`y` are normalised to the image (0..1, y down),
/// `z` is depth relative to the wrist.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    #[serde(default = "full_confidence", alias = "visibility")]
    pub confidence: f32,
}

impl Default for Landmark {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            confidence: 1.0,
        }
    }
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }
}

fn full_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// One detected hand: 21 keypoints plus the detector's overall score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: [Landmark; LANDMARK_COUNT],
    pub handedness: Handedness,
    pub confidence: f32,
}

impl LandmarkSet {
    /// Build a set from a detector reply, rejecting anything that is not
    /// exactly [`LANDMARK_COUNT`] points.
    pub fn from_points(
        points: &[Landmark],
        handedness: Handedness,
        confidence: f32,
    ) -> Result<Self, LandmarkError> {
        let points: [Landmark; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| LandmarkError::WrongCount(points.len()))?;
        Ok(Self {
            points,
            handedness,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    pub fn point(&self, index: usize) -> &Landmark {
        &self.points[index]
    }

    pub fn wrist(&self) -> &Landmark {
        &self.points[idx::WRIST]
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmarks, got {0}")]
    WrongCount(usize),
}
