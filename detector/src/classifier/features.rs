//! Geometric hand features: finger curl and hand orientation.

use tempo_common::landmark::{idx, Finger, Landmark, LandmarkSet};

const EPSILON: f32 = 1e-6;

/// Features the rule set works from, one entry per non-thumb finger.
#[derive(Debug, Clone, PartialEq)]
pub struct HandFeatures {
    /// PIP joint angle in degrees (180 = straight), `None` for degenerate joints.
    pub pip_angles_deg: [Option<f32>; 4],
    /// Extension certainty per finger, 0 = fully curled, 1 = fully extended.
    pub extension: [f32; 4],
    /// Upward component of the wrist → middle MCP direction, in [-1, 1].
    pub up: f32,
}

impl HandFeatures {
    pub fn compute(set: &LandmarkSet, curled_angle_deg: f32, extended_angle_deg: f32) -> Self {
        let mut pip_angles_deg = [None; 4];
        let mut extension = [0.0; 4];
        for (i, finger) in Finger::ALL.iter().enumerate() {
            let (mcp, pip, tip) = finger.joints();
            let angle = joint_angle_deg(set.point(mcp), set.point(pip), set.point(tip));
            pip_angles_deg[i] = angle;
            extension[i] = match angle {
                Some(a) => extension_certainty(a, curled_angle_deg, extended_angle_deg),
                // Coincident joints say nothing either way
                None => 0.5,
            };
        }
        Self {
            pip_angles_deg,
            extension,
            up: upward_component(set),
        }
    }

    pub fn extension_of(&self, finger: Finger) -> f32 {
        self.extension[finger as usize]
    }
}

/// Angle at `joint` between the segments towards `a` and `b`, in degrees.
pub fn joint_angle_deg(a: &Landmark, joint: &Landmark, b: &Landmark) -> Option<f32> {
    let u = [a.x - joint.x, a.y - joint.y, a.z - joint.z];
    let v = [b.x - joint.x, b.y - joint.y, b.z - joint.z];
    let nu = norm(u);
    let nv = norm(v);
    if nu < EPSILON || nv < EPSILON {
        return None;
    }
    let cos = (u[0] * v[0] + u[1] * v[1] + u[2] * v[2]) / (nu * nv);
    Some(cos.clamp(-1.0, 1.0).acos().to_degrees())
}

/// Linear ramp from `curled` (0.0) to `extended` (1.0).
pub fn extension_certainty(angle_deg: f32, curled: f32, extended: f32) -> f32 {
    ((angle_deg - curled) / (extended - curled)).clamp(0.0, 1.0)
}

/// How much the hand points up in the image (image y grows downward).
pub fn upward_component(set: &LandmarkSet) -> f32 {
    let wrist = set.point(idx::WRIST);
    let mcp = set.point(idx::MIDDLE_MCP);
    let dx = mcp.x - wrist.x;
    let dy = mcp.y - wrist.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len < EPSILON {
        return 0.0;
    }
    -dy / len
}

fn norm(v: [f32; 3]) -> f32 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
