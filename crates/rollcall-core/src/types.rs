use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pixel coordinate in the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Five-point facial landmarks, in the order SCRFD emits them.
///
/// "Left" and "right" are image-space: `left_eye` has the smaller x coordinate
/// for an upright, front-facing subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose: Point,
    pub mouth_left: Point,
    pub mouth_right: Point,
}

impl Landmarks {
    pub fn from_array(points: [(f32, f32); 5]) -> Self {
        let [le, re, n, ml, mr] = points.map(|(x, y)| Point::new(x, y));
        Self {
            left_eye: le,
            right_eye: re,
            nose: n,
            mouth_left: ml,
            mouth_right: mr,
        }
    }

    pub fn to_array(&self) -> [Point; 5] {
        [
            self.left_eye,
            self.right_eye,
            self.nose,
            self.mouth_left,
            self.mouth_right,
        ]
    }
}

/// A detected face: bounding box, detector confidence, optional landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

/// Face descriptor: a fixed-length vector produced by the recognition model.
///
/// Serializes as a bare JSON array of numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance, `sqrt(sum((a_i - b_i)^2))`.
    ///
    /// Returns `None` when the lengths differ: such descriptors come from
    /// different models and are never compared.
    pub fn distance(&self, other: &Descriptor) -> Option<f32> {
        if self.0.len() != other.0.len() {
            return None;
        }
        let sum = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Who a subject is. Persisted alongside the descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub student_id: String,
    pub first_name: String,
    #[serde(default)]
    pub middle_initial: String,
    pub surname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl Identity {
    /// Human-readable name, e.g. "Ana M. Cruz" or "Ana Cruz".
    pub fn display_name(&self) -> String {
        let initial = self.middle_initial.trim().trim_end_matches('.');
        if initial.is_empty() {
            format!("{} {}", self.first_name, self.surname)
        } else {
            format!("{} {}. {}", self.first_name, initial, self.surname)
        }
    }
}

/// A subject's identity plus every descriptor collected at enrollment.
///
/// On disk: `{ studentId, firstName, middleInitial, surname, descriptors: [[..], ..] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    #[serde(flatten)]
    pub identity: Identity,
    pub descriptors: Vec<Descriptor>,
}

/// One stored descriptor tagged with its owner, as scanned by a [`Matcher`](crate::Matcher).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub owner: Arc<Identity>,
    pub descriptor: Descriptor,
}

/// Accepted nearest match: the owner and its distance to the probe.
#[derive(Debug, Clone)]
pub struct Match {
    pub owner: Arc<Identity>,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(middle: &str) -> Identity {
        Identity {
            student_id: "2024-0001".into(),
            first_name: "Ana".into(),
            middle_initial: middle.into(),
            surname: "Cruz".into(),
            subject_code: None,
            section: None,
        }
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let a = Descriptor::new(vec![0.25, -1.0, 3.5]);
        assert_eq!(a.distance(&a.clone()), Some(0.0));
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Descriptor::new(vec![1.0, 2.0, 3.0]);
        let b = Descriptor::new(vec![4.0, 6.0, 3.0]);
        assert_eq!(a.distance(&b), b.distance(&a));
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_nonzero_when_different() {
        let a = Descriptor::new(vec![0.0; 128]);
        let mut values = vec![0.0; 128];
        values[127] = 1e-3;
        let b = Descriptor::new(values);
        assert!(a.distance(&b).unwrap() > 0.0);
    }

    #[test]
    fn test_distance_length_mismatch() {
        let a = Descriptor::new(vec![0.0; 128]);
        let b = Descriptor::new(vec![0.0; 512]);
        assert_eq!(a.distance(&b), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(identity("M").display_name(), "Ana M. Cruz");
        assert_eq!(identity("M.").display_name(), "Ana M. Cruz");
        assert_eq!(identity("").display_name(), "Ana Cruz");
    }

    #[test]
    fn test_record_json_shape() {
        let record = SubjectRecord {
            identity: identity("M"),
            descriptors: vec![Descriptor::new(vec![0.5, 1.0])],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "studentId": "2024-0001",
                "firstName": "Ana",
                "middleInitial": "M",
                "surname": "Cruz",
                "descriptors": [[0.5, 1.0]],
            })
        );
    }

    #[test]
    fn test_record_missing_field_rejected() {
        let raw = r#"{"studentId":"x","firstName":"Ana","descriptors":[[0.0]]}"#;
        assert!(serde_json::from_str::<SubjectRecord>(raw).is_err());
    }

    #[test]
    fn test_landmarks_array_order() {
        let lm = Landmarks::from_array([(1.0, 2.0), (3.0, 4.0), (5.0, 6.0), (7.0, 8.0), (9.0, 10.0)]);
        assert_eq!(lm.nose, Point::new(5.0, 6.0));
        assert_eq!(lm.to_array()[4], Point::new(9.0, 10.0));
    }
}
