//! rollcall-core: face descriptors, matching, and the recognition pipeline.
//!
//! Descriptors are compared by Euclidean distance against a flat gallery.
//! Detection (SCRFD) and descriptor extraction (ArcFace) run via ONNX Runtime
//! on CPU; both are treated as opaque pretrained models.

pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod orientation;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use matcher::{EuclideanMatcher, Matcher};
pub use orientation::Orientation;
pub use recognizer::FaceRecognizer;
pub use types::{Candidate, Descriptor, FaceBox, Identity, Landmarks, Match, Point, SubjectRecord};
