//! HTTP surface: `/check-face`, `/register`, `/login-recognize`, `/status`,
//! and stored captures under `/faces`.

use crate::config::Config;
use crate::engine::FacePipeline;
use crate::service::{
    check_orientation, EnrollmentRequest, EnrollmentService, Recognition, RecognitionService,
    ServiceError, MAX_CAPTURES,
};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::Orientation;
use rollcall_store::{DescriptorStore, ImageStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState {
    pub enrollment: EnrollmentService,
    pub recognition: RecognitionService,
    pub pipeline: Arc<dyn FacePipeline>,
    pub store: Arc<dyn DescriptorStore>,
    pub images: Option<Arc<dyn ImageStore>>,
    pub descriptor_dim: usize,
    pub duplicate_threshold: f32,
    pub recognition_threshold: f32,
}

impl AppState {
    pub fn new(
        pipeline: Arc<dyn FacePipeline>,
        store: Arc<dyn DescriptorStore>,
        images: Option<Arc<dyn ImageStore>>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            enrollment: EnrollmentService::new(
                pipeline.clone(),
                store.clone(),
                images.clone(),
                config.descriptor_dim,
                config.duplicate_threshold,
            ),
            recognition: RecognitionService::new(
                pipeline.clone(),
                store.clone(),
                config.descriptor_dim,
                config.recognition_threshold,
            ),
            pipeline,
            store,
            images,
            descriptor_dim: config.descriptor_dim,
            duplicate_threshold: config.duplicate_threshold,
            recognition_threshold: config.recognition_threshold,
        })
    }
}

/// Build the router.
pub fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/check-face", post(check_face))
        .route("/register", post(register))
        .route("/login-recognize", post(login_recognize))
        .route("/status", get(status))
        .route("/faces/{student_id}/{slot}", get(face_image))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Registration form. Every field may be missing or `null`; the service
/// decides what is required.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterBody {
    pub student_id: Option<String>,
    pub first_name: Option<String>,
    pub middle_initial: Option<String>,
    pub surname: Option<String>,
    pub subject_code: Option<String>,
    pub section: Option<String>,
    pub images: Option<RegisterImages>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterImages {
    pub pic1: Option<String>,
    pub pic2: Option<String>,
    pub pic3: Option<String>,
}

impl From<RegisterBody> for EnrollmentRequest {
    fn from(body: RegisterBody) -> Self {
        let images = body.images.unwrap_or_default();
        let images = [images.pic1, images.pic2, images.pic3]
            .into_iter()
            .zip(1u8..)
            .filter_map(|(payload, slot)| payload.filter(|p| !p.trim().is_empty()).map(|p| (slot, p)))
            .collect();

        EnrollmentRequest {
            student_id: body.student_id,
            first_name: body.first_name.unwrap_or_default(),
            middle_initial: body.middle_initial.unwrap_or_default(),
            surname: body.surname.unwrap_or_default(),
            subject_code: body.subject_code,
            section: body.section,
            images,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageBody {
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl MessageResponse {
    fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            student_id: None,
            distance: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckFaceResponse {
    pub orientation: Orientation,
}

/// Handler failure: a malformed body or a service error.
pub enum ApiError {
    Body(JsonRejection),
    Service(ServiceError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            // Any body that fails to extract is a client input error.
            ApiError::Body(rejection) => {
                tracing::debug!(status = %rejection.status(), error = %rejection.body_text(), "rejected body");
                (StatusCode::BAD_REQUEST, format!("❌ {}", rejection.body_text()))
            }
            ApiError::Service(err) => match err {
                ServiceError::NoFaceDetected => (StatusCode::OK, "❌ No face detected".to_string()),
                ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, format!("❌ {msg}")),
                ServiceError::DuplicateFace { .. } => (StatusCode::BAD_REQUEST, format!("❌ {err}")),
                err => {
                    tracing::error!(error = %err, internal = err.is_internal(), "request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}"))
                }
            },
        };
        (status, Json(MessageResponse::text(message))).into_response()
    }
}

async fn check_face(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ImageBody>, JsonRejection>,
) -> Result<Json<CheckFaceResponse>, ApiError> {
    let Json(body) = body?;
    let orientation = check_orientation(state.pipeline.as_ref(), body.image.as_deref().unwrap_or("")).await?;
    tracing::debug!(?orientation, "check-face");
    Ok(Json(CheckFaceResponse { orientation }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(body) = body?;
    let enrolled = state.enrollment.enroll(body.into()).await?;

    let noun = if enrolled.captures == 1 { "capture" } else { "captures" };
    Ok(Json(MessageResponse {
        message: format!(
            "✔ Registered {} with {} face {noun}",
            enrolled.identity.display_name(),
            enrolled.captures
        ),
        student_id: Some(enrolled.identity.student_id),
        distance: None,
    }))
}

async fn login_recognize(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ImageBody>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(body) = body?;
    let response = match state.recognition.recognize(body.image.as_deref().unwrap_or("")).await? {
        Recognition::Known(m) => MessageResponse {
            message: format!("✅ Welcome back, {}!", m.owner.display_name()),
            student_id: Some(m.owner.student_id.clone()),
            distance: Some(m.distance),
        },
        Recognition::Stranger => MessageResponse::text("❌ Stranger detected"),
    };
    Ok(Json(response))
}

async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let subjects = state.store.subject_count().await.map_err(ServiceError::from)?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "subjects": subjects,
        "descriptorDim": state.descriptor_dim,
        "duplicateThreshold": state.duplicate_threshold,
        "recognitionThreshold": state.recognition_threshold,
    })))
}

/// A stored capture as `image/png`; 404 when absent or when images are not kept.
async fn face_image(
    State(state): State<Arc<AppState>>,
    Path((student_id, slot)): Path<(String, u8)>,
) -> Result<Response, ApiError> {
    let Some(images) = &state.images else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if slot == 0 || usize::from(slot) > MAX_CAPTURES {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    match images.get(&student_id, slot).await {
        Ok(Some(png)) => Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response()),
        Ok(None) => Ok(StatusCode::NOT_FOUND.into_response()),
        Err(StoreError::InvalidSubjectId(id)) => {
            Err(ServiceError::Validation(format!("invalid studentId {id:?}")).into())
        }
        Err(e) => Err(ServiceError::from(e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::testing::{face_png, StubPipeline};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use rollcall_store::{FsImageStore, MemoryDescriptorStore};
    use tower::ServiceExt;

    const DIM: usize = 128;

    fn test_config() -> Config {
        let env = |key: &str| match key {
            "ROLLCALL_DESCRIPTOR_DIM" => Some(DIM.to_string()),
            "ROLLCALL_DATA_DIR" => Some("/tmp/rollcall-test".to_string()),
            _ => None,
        };
        Config::resolve(FileConfig::default(), env).unwrap()
    }

    fn build_app(images: Option<Arc<dyn ImageStore>>, limit: usize) -> Router {
        let config = test_config();
        let state = AppState::new(
            Arc::new(StubPipeline::new(DIM)),
            Arc::new(MemoryDescriptorStore::new()),
            images,
            &config,
        );
        router(state, limit)
    }

    fn app_with_limit(limit: usize) -> Router {
        build_app(None, limit)
    }

    fn app() -> Router {
        app_with_limit(10 * 1024 * 1024)
    }

    async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn register_body(id: &str, levels: [u8; 3]) -> String {
        json!({
            "studentId": id,
            "firstName": "Ana",
            "middleInitial": "M",
            "surname": "Cruz",
            "images": {
                "pic1": format!("data:image/png;base64,{}", face_png(levels[0])),
                "pic2": face_png(levels[1]),
                "pic3": face_png(levels[2]),
            }
        })
        .to_string()
    }

    fn image_body(level: u8) -> String {
        json!({ "image": face_png(level) }).to_string()
    }

    #[tokio::test]
    async fn test_register_then_duplicate() {
        let app = app();

        let (status, body) = post(&app, "/register", register_body("2024-0001", [10, 11, 12])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "✔ Registered Ana M. Cruz with 3 face captures");
        assert_eq!(body["studentId"], "2024-0001");

        let (status, body) = post(&app, "/register", register_body("2024-0001", [10, 11, 12])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "❌ Ana M. Cruz is already registered");
    }

    #[tokio::test]
    async fn test_register_partial_images() {
        let app = app();
        let body = json!({
            "studentId": "s2",
            "firstName": "Jo",
            "surname": "Reyes",
            "images": { "pic2": face_png(40) }
        })
        .to_string();

        let (status, body) = post(&app, "/register", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "✔ Registered Jo Reyes with 1 face capture");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let app = app();

        let no_name = json!({ "studentId": "s1", "images": { "pic1": face_png(10) } }).to_string();
        let (status, body) = post(&app, "/register", no_name).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("firstName"));

        let no_images = json!({ "firstName": "A", "surname": "B" }).to_string();
        let (status, _) = post(&app, "/register", no_images).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(&app, "/register", "{ nope".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_register_tolerates_null_fields() {
        let app = app();
        let body = json!({
            "studentId": null,
            "firstName": "Jo",
            "middleInitial": null,
            "surname": "Reyes",
            "section": null,
            "images": { "pic1": face_png(40), "pic2": null, "pic3": "" }
        })
        .to_string();

        let (status, body) = post(&app, "/register", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "✔ Registered Jo Reyes with 1 face capture");

        let no_images = json!({ "firstName": "A", "surname": "B", "images": null }).to_string();
        let (status, _) = post(&app, "/register", no_images).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_bad_request() {
        let app = app();

        let wrong_type = json!({
            "studentId": 42,
            "firstName": "A",
            "surname": "B",
            "images": { "pic1": face_png(10) }
        })
        .to_string();
        let (status, body) = post(&app, "/register", wrong_type).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("❌"));

        let (status, _) = post(&app, "/login-recognize", json!({ "image": [1, 2] }).to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(&app, "/check-face", "[]".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/register")
                    .body(Body::from(register_body("s1", [10, 11, 12])))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_face_images_served() {
        let dir = tempfile::tempdir().unwrap();
        let images: Arc<dyn ImageStore> = Arc::new(FsImageStore::open(dir.path()).await.unwrap());
        let app = build_app(Some(images), 10 * 1024 * 1024);
        post(&app, "/register", register_body("s1", [10, 0, 12])).await;

        let get = |uri: &'static str| {
            let app = app.clone();
            async move {
                app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                    .await
                    .unwrap()
            }
        };

        let response = get("/faces/s1/1").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.starts_with(b"\x89PNG"));

        assert_eq!(get("/faces/s1/2").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get("/faces/s1/4").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get("/faces/nobody/1").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get("/faces/.hidden/1").await.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_faces_without_image_store() {
        let response = app()
            .oneshot(Request::builder().uri("/faces/s1/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_without_face() {
        let app = app();
        let (status, body) = post(&app, "/register", register_body("s1", [0, 0, 0])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "❌ No face detected");

        let (_, status_body) = get_status(&app).await;
        assert_eq!(status_body["subjects"], 0);
    }

    #[tokio::test]
    async fn test_login_recognize() {
        let app = app();

        let (_, body) = post(&app, "/login-recognize", image_body(10)).await;
        assert_eq!(body["message"], "❌ Stranger detected");

        post(&app, "/register", register_body("2024-0001", [10, 11, 12])).await;

        let (status, body) = post(&app, "/login-recognize", image_body(10)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "✅ Welcome back, Ana M. Cruz!");
        assert_eq!(body["studentId"], "2024-0001");
        assert_eq!(body["distance"], 0.0);

        let (status, body) = post(&app, "/login-recognize", image_body(50)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "❌ Stranger detected");
        assert!(body.get("studentId").is_none());

        let (status, body) = post(&app, "/login-recognize", image_body(0)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "❌ No face detected");
    }

    #[tokio::test]
    async fn test_login_missing_image() {
        let (status, _) = post(&app(), "/login-recognize", "{}".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_check_face() {
        let app = app();
        for (level, expected) in [(100, "front"), (125, "left"), (70, "right"), (0, "none")] {
            let (status, body) = post(&app, "/check-face", image_body(level)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["orientation"], expected, "level {level}");
        }
    }

    async fn get_status(app: &Router) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status() {
        let app = app();
        post(&app, "/register", register_body("s1", [10, 11, 12])).await;

        let (status, body) = get_status(&app).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subjects"], 1);
        assert_eq!(body["descriptorDim"], DIM);
        assert!((body["recognitionThreshold"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let app = app_with_limit(1024);
        let big = json!({ "image": "A".repeat(4096) }).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/login-recognize")
                    .header(header::CONTENT_TYPE, "application/json")
                    .header(header::CONTENT_LENGTH, big.len())
                    .body(Body::from(big))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_cors_preflight() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/register")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
