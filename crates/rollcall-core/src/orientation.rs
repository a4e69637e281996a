//! Coarse head-pose classification from landmark geometry.

use crate::types::Landmarks;
use serde::{Deserialize, Serialize};

/// Horizontal nose offset (pixels) from the eye midpoint beyond which the
/// head counts as turned.
pub const NOSE_OFFSET_PX: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Front,
    Left,
    Right,
    /// No face was found.
    None,
}

impl Orientation {
    /// Classify from the nose position relative to the midpoint between the eyes.
    pub fn from_landmarks(landmarks: &Landmarks) -> Self {
        let eye_diff = landmarks.right_eye.x - landmarks.left_eye.x;
        let nose_offset = landmarks.nose.x - (landmarks.left_eye.x + eye_diff / 2.0);

        if nose_offset > NOSE_OFFSET_PX {
            Orientation::Left
        } else if nose_offset < -NOSE_OFFSET_PX {
            Orientation::Right
        } else {
            Orientation::Front
        }
    }
}
