use async_trait::async_trait;
use image::imageops;
use image::{GrayImage, RgbImage};
use rollcall_core::detector::DetectorError;
use rollcall_core::recognizer::RecognizerError;
use rollcall_core::{Descriptor, FaceBox, FaceDetector, FaceRecognizer};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// The service's view of the face model: locate a face, or describe one.
///
/// `None` means no usable face was found; it is not an error.
#[async_trait]
pub trait FacePipeline: Send + Sync {
    /// Best (highest confidence) face in the image.
    async fn locate(&self, image: GrayImage) -> Result<Option<FaceBox>, EngineError>;

    /// Descriptor for the best face in the image.
    ///
    /// Takes the colour frame: detection runs on its luma, the descriptor on RGB.
    async fn describe(&self, image: RgbImage) -> Result<Option<Descriptor>, EngineError>;
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Locate {
        image: GrayImage,
        reply: oneshot::Sender<Result<Option<FaceBox>, EngineError>>,
    },
    Describe {
        image: RgbImage,
        reply: oneshot::Sender<Result<Option<Descriptor>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

#[async_trait]
impl FacePipeline for EngineHandle {
    async fn locate(&self, image: GrayImage) -> Result<Option<FaceBox>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Locate { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn describe(&self, image: RgbImage) -> Result<Option<Descriptor>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Describe { image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Both ONNX sessions are loaded before returning, so a missing model fails
/// startup rather than the first request. Requests are served one at a time.
pub fn spawn_engine(scrfd_path: &str, arcface_path: &str) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Locate { image, reply } => {
                        let _ = reply.send(run_locate(&mut detector, &image));
                    }
                    EngineRequest::Describe { image, reply } => {
                        let _ = reply.send(run_describe(&mut detector, &mut recognizer, &image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_locate(detector: &mut FaceDetector, image: &GrayImage) -> Result<Option<FaceBox>, EngineError> {
    let faces = detector.detect(image)?;
    tracing::debug!(faces = faces.len(), "locate: detection done");
    Ok(faces.into_iter().next())
}

/// Detect, then extract a descriptor from the most confident face.
fn run_describe(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    image: &RgbImage,
) -> Result<Option<Descriptor>, EngineError> {
    let gray = imageops::grayscale(image);
    let Some(face) = run_locate(detector, &gray)? else {
        return Ok(None);
    };

    match recognizer.extract(image, &face) {
        Ok(descriptor) => {
            tracing::debug!(
                confidence = face.confidence,
                dim = descriptor.len(),
                "describe: descriptor extracted"
            );
            Ok(Some(descriptor))
        }
        Err(RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks) => {
            tracing::debug!(confidence = face.confidence, "describe: face not alignable");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_fails_fast_without_models() {
        let err = spawn_engine("/nonexistent/det_10g.onnx", "/nonexistent/w600k_r50.onnx")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EngineError::Detector(DetectorError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = EngineHandle { tx };
        let err = handle.describe(RgbImage::new(4, 4)).await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }
}
