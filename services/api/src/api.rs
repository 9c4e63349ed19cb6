use crate::config::ApiConfig;
use crate::error::{ApiError, AppError};
use crate::inference::{InferenceClient, MeshReference};
use crate::mesh_fetcher::MeshFetcher;
use crate::qr_code::QrEncoder;
use crate::s3_store::{ObjectAcl, ObjectStore, GLB_CONTENT_TYPE};
use crate::staging::{SketchUpload, StagedSketch};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Lifetime of the demo model's signed URL
pub const DEMO_URL_TTL_SECS: u64 = 3600;

/// Multipart field carrying the sketch
pub const SKETCH_FIELD: &str = "sketchImage";

const DEMO_FAILURE_MESSAGE: &str = "An unexpected error occurred while generating the demo QR code.";
const GENERATE_FAILURE_MESSAGE: &str = "An unexpected error occurred while processing the sketch.";

/// Request-independent settings used by the handlers
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub service_name: String,
    pub bucket: String,
    pub demo_model_key: String,
    pub model_endpoint: String,
    /// Mesh format requested from the model
    pub output_format: String,
    pub max_upload_bytes: usize,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub inference: Arc<dyn InferenceClient>,
    pub meshes: Arc<dyn MeshFetcher>,
    pub qr: QrEncoder,
    pub settings: Arc<HandlerSettings>,
}

/// Demo model response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoResponse {
    pub model_key: String,
    pub presigned_url: String,
    pub qr_code_base64: String,
    pub expires_in_seconds: u64,
}

/// Generated model response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub public_url: String,
    pub qr_code_base64: String,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    // Credentials rule out `*`, so the request's origin, method and headers
    // are echoed back instead.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let body_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/demo", get(demo_model_qr))
        .route("/api/generate", post(generate))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": state.settings.service_name,
    }))
}

/// Run a handler body and record its outcome. Errors are mapped to a
/// response here and nowhere else.
async fn finish<T, F>(endpoint: &'static str, fallback: &str, body: F) -> Result<Json<T>, ApiError>
where
    F: Future<Output = Result<T, AppError>>,
{
    let start = Instant::now();
    let result = body.await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.code(),
    };
    metrics::counter!("sketchforge_requests_total", "endpoint" => endpoint, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("sketchforge_request_duration_seconds", "endpoint" => endpoint)
        .record(start.elapsed().as_secs_f64());

    result.map(Json).map_err(|e| e.into_api_error(fallback))
}

/// Signed URL and QR code for the demo model
#[instrument(skip(state))]
async fn demo_model_qr(State(state): State<AppState>) -> Result<Json<DemoResponse>, ApiError> {
    finish("demo", DEMO_FAILURE_MESSAGE, demo_model(&state)).await
}

async fn demo_model(state: &AppState) -> Result<DemoResponse, AppError> {
    let key = &state.settings.demo_model_key;

    let exists = state
        .store
        .object_exists(key)
        .await
        .map_err(AppError::ModelLookup)?;

    if !exists {
        return Err(AppError::ModelNotFound {
            key: key.clone(),
            bucket: state.settings.bucket.clone(),
        });
    }

    let presigned_url = state
        .store
        .presigned_get_url(key, Duration::from_secs(DEMO_URL_TTL_SECS))
        .await?;

    let qr_code_base64 = state.qr.encode_data_uri(&presigned_url)?;

    Ok(DemoResponse {
        model_key: key.clone(),
        presigned_url,
        qr_code_base64,
        expires_in_seconds: DEMO_URL_TTL_SECS,
    })
}

/// Generate a 3D model from an uploaded sketch
#[instrument(skip_all)]
async fn generate(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    finish("generate", GENERATE_FAILURE_MESSAGE, async {
        let multipart = multipart.map_err(|e| AppError::InvalidUpload(e.body_text()))?;
        let upload = read_sketch(multipart).await?;
        generate_model(&state, upload).await
    })
    .await
}

/// Read the `sketchImage` field fully
async fn read_sketch(mut multipart: Multipart) -> Result<SketchUpload, AppError> {
    let field_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::InvalidUpload(e.body_text())
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(field_error)? {
        if field.name() != Some(SKETCH_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(field_error)?;

        if data.is_empty() {
            return Err(AppError::EmptyUpload);
        }

        return Ok(SketchUpload { file_name, data });
    }

    Err(AppError::InvalidUpload(format!(
        "Missing `{}` file field.",
        SKETCH_FIELD
    )))
}

/// Inference, storage and QR steps for one upload
pub async fn generate_model(
    state: &AppState,
    upload: SketchUpload,
) -> Result<GenerateResponse, AppError> {
    let settings = &state.settings;

    let result = {
        let staged = StagedSketch::write(&upload).await?;

        let image_url = state.inference.upload_asset(staged.path()).await?;

        state
            .inference
            .run(
                &settings.model_endpoint,
                json!({
                    "image_url": image_url,
                    "output_format": settings.output_format,
                }),
            )
            .await?
        // staged file removed here
    };

    let mesh = MeshReference::from_result(&result, &settings.output_format).ok_or_else(|| {
        warn!(response = %result, "Unexpected response format");
        AppError::BadUpstreamResponse("result has no model_mesh.url".to_string())
    })?;

    let mesh_bytes = state.meshes.fetch(&mesh.url).await?;

    let key = format!("{}.{}", Uuid::new_v4(), settings.output_format);
    state
        .store
        .put_object(&key, mesh_bytes, GLB_CONTENT_TYPE, ObjectAcl::PublicRead)
        .await?;

    let public_url = state.store.public_url(&key);
    let qr_code_base64 = state.qr.encode_data_uri(&public_url)?;

    info!(key = %key, public_url = %public_url, "Model generated");

    Ok(GenerateResponse {
        public_url,
        qr_code_base64,
    })
}

/// Start the API server and serve until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
