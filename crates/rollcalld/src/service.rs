//! Enrollment and recognition on top of the face pipeline and the stores.

use crate::decode::{decode_image, encode_png};
use crate::engine::{EngineError, FacePipeline};
use image::DynamicImage;
use rollcall_core::{Descriptor, EuclideanMatcher, Identity, Match, Matcher, Orientation, SubjectRecord};
use rollcall_store::{validate_subject_id, DescriptorStore, ImageStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Most captures accepted per enrollment.
pub const MAX_CAPTURES: usize = 3;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),
    /// No usable face in the submitted image(s).
    #[error("no face detected")]
    NoFaceDetected,
    /// A submitted face is already enrolled, possibly under another identity.
    #[error("{} is already registered", .owner.display_name())]
    DuplicateFace { owner: Arc<Identity>, distance: f32 },
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("face engine: {0}")]
    Engine(#[from] EngineError),
    #[error("image encoding: {0}")]
    Encode(#[from] image::ImageError),
}

impl ServiceError {
    /// Failures the client could not have avoided.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Engine(_) | Self::Encode(_))
    }
}

/// Identity fields and captures as submitted by a client.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentRequest {
    pub student_id: Option<String>,
    pub first_name: String,
    pub middle_initial: String,
    pub surname: String,
    pub subject_code: Option<String>,
    pub section: Option<String>,
    /// `(slot, base64 payload)`, slots numbered from 1.
    pub images: Vec<(u8, String)>,
}

impl EnrollmentRequest {
    /// Validate the identity fields, generating a student id when none is given.
    fn identity(&self, now_millis: i64) -> Result<Identity, ServiceError> {
        let first_name = self.first_name.trim();
        let surname = self.surname.trim();
        if first_name.is_empty() || surname.is_empty() {
            return Err(ServiceError::Validation(
                "firstName and surname are required".into(),
            ));
        }

        let student_id = match self.student_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generated_student_id(first_name, surname, now_millis),
        };
        validate_subject_id(&student_id)
            .map_err(|_| ServiceError::Validation(format!("invalid studentId {student_id:?}")))?;

        let optional = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Identity {
            student_id,
            first_name: first_name.to_string(),
            middle_initial: self.middle_initial.trim().to_string(),
            surname: surname.to_string(),
            subject_code: optional(&self.subject_code),
            section: optional(&self.section),
        })
    }
}

/// `<firstName>_<surname>_<millis>`, with characters unsafe in file names replaced.
fn generated_student_id(first_name: &str, surname: &str, now_millis: i64) -> String {
    format!("{first_name}_{surname}_{now_millis}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A persisted enrollment.
#[derive(Debug, Clone)]
pub struct Enrolled {
    pub identity: Identity,
    pub captures: usize,
}

/// Registers new subjects: extract, reject duplicates, persist.
pub struct EnrollmentService {
    pipeline: Arc<dyn FacePipeline>,
    store: Arc<dyn DescriptorStore>,
    images: Option<Arc<dyn ImageStore>>,
    descriptor_dim: usize,
    duplicate_threshold: f32,
    /// Serializes duplicate-check + write so two requests cannot both pass the check.
    write_lock: Mutex<()>,
}

impl EnrollmentService {
    pub fn new(
        pipeline: Arc<dyn FacePipeline>,
        store: Arc<dyn DescriptorStore>,
        images: Option<Arc<dyn ImageStore>>,
        descriptor_dim: usize,
        duplicate_threshold: f32,
    ) -> Self {
        Self {
            pipeline,
            store,
            images,
            descriptor_dim,
            duplicate_threshold,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn enroll(&self, request: EnrollmentRequest) -> Result<Enrolled, ServiceError> {
        let identity = request.identity(chrono::Utc::now().timestamp_millis())?;
        if request.images.is_empty() {
            return Err(ServiceError::Validation("at least one image is required".into()));
        }
        if request.images.len() > MAX_CAPTURES {
            return Err(ServiceError::Validation(format!(
                "at most {MAX_CAPTURES} images are accepted"
            )));
        }

        let mut accepted: Vec<(u8, Descriptor, DynamicImage)> = Vec::new();
        for (slot, payload) in &request.images {
            let image = match decode_image(payload) {
                Ok(image) => image,
                Err(e) => {
                    tracing::warn!(student_id = %identity.student_id, slot, error = %e, "skipping undecodable image");
                    continue;
                }
            };
            let Some(descriptor) = self.pipeline.describe(image.to_rgb8()).await? else {
                tracing::info!(student_id = %identity.student_id, slot, "no face in capture; skipping");
                continue;
            };
            if descriptor.len() != self.descriptor_dim {
                return Err(ServiceError::Validation(format!(
                    "descriptor has {} dimensions, expected {}",
                    descriptor.len(),
                    self.descriptor_dim
                )));
            }
            accepted.push((*slot, descriptor, image));
        }

        if accepted.is_empty() {
            tracing::info!(student_id = %identity.student_id, "enrollment rejected: no usable face");
            return Err(ServiceError::NoFaceDetected);
        }

        let pngs = if self.images.is_some() {
            accepted
                .iter()
                .map(|(slot, _, image)| encode_png(image).map(|png| (*slot, png)))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        let _guard = self.write_lock.lock().await;

        let gallery = self.store.all_descriptors().await?;
        for (slot, descriptor, _) in &accepted {
            if let Some(m) = EuclideanMatcher.best_match(descriptor, &gallery, self.duplicate_threshold) {
                tracing::warn!(
                    student_id = %identity.student_id,
                    slot,
                    existing = %m.owner.student_id,
                    distance = m.distance,
                    "enrollment rejected: face already registered"
                );
                return Err(ServiceError::DuplicateFace {
                    owner: m.owner,
                    distance: m.distance,
                });
            }
        }

        let captures = accepted.len();
        let record = SubjectRecord {
            identity,
            descriptors: accepted.into_iter().map(|(_, d, _)| d).collect(),
        };
        self.store.put(&record).await?;

        if let Some(images) = &self.images {
            for (slot, png) in &pngs {
                images.put(&record.identity.student_id, *slot, png).await?;
            }
            // Slots not re-sent would otherwise keep a previous enrollment's capture.
            for slot in 1..=MAX_CAPTURES as u8 {
                if !pngs.iter().any(|(s, _)| *s == slot) {
                    images.remove(&record.identity.student_id, slot).await?;
                }
            }
        }

        tracing::info!(
            student_id = %record.identity.student_id,
            captures,
            "subject enrolled"
        );

        Ok(Enrolled {
            identity: record.identity,
            captures,
        })
    }
}

/// Outcome of a login attempt with a detected face.
#[derive(Debug, Clone)]
pub enum Recognition {
    Known(Match),
    Stranger,
}

/// Identifies a probe face against every enrolled subject.
pub struct RecognitionService {
    pipeline: Arc<dyn FacePipeline>,
    store: Arc<dyn DescriptorStore>,
    descriptor_dim: usize,
    recognition_threshold: f32,
}

impl RecognitionService {
    pub fn new(
        pipeline: Arc<dyn FacePipeline>,
        store: Arc<dyn DescriptorStore>,
        descriptor_dim: usize,
        recognition_threshold: f32,
    ) -> Self {
        Self {
            pipeline,
            store,
            descriptor_dim,
            recognition_threshold,
        }
    }

    pub async fn recognize(&self, payload: &str) -> Result<Recognition, ServiceError> {
        let image = decode_image(payload)
            .map_err(|e| ServiceError::Validation(format!("invalid image: {e}")))?;

        let Some(probe) = self.pipeline.describe(image.to_rgb8()).await? else {
            return Err(ServiceError::NoFaceDetected);
        };
        if probe.len() != self.descriptor_dim {
            tracing::warn!(
                dim = probe.len(),
                expected = self.descriptor_dim,
                "probe descriptor has unexpected dimensionality; it cannot match"
            );
        }

        let gallery = self.store.all_descriptors().await?;
        match EuclideanMatcher.best_match(&probe, &gallery, self.recognition_threshold) {
            Some(m) => {
                tracing::info!(student_id = %m.owner.student_id, distance = m.distance, "recognized");
                Ok(Recognition::Known(m))
            }
            None => {
                tracing::info!(candidates = gallery.len(), "stranger");
                Ok(Recognition::Stranger)
            }
        }
    }
}

/// Head orientation of the most confident face, or [`Orientation::None`].
pub async fn check_orientation(
    pipeline: &dyn FacePipeline,
    payload: &str,
) -> Result<Orientation, ServiceError> {
    let image = decode_image(payload)
        .map_err(|e| ServiceError::Validation(format!("invalid image: {e}")))?;

    let face = pipeline.locate(image.to_luma8()).await?;
    let orientation = match face.and_then(|f| f.landmarks) {
        Some(landmarks) => Orientation::from_landmarks(&landmarks),
        None => Orientation::None,
    };
    Ok(orientation)
}
