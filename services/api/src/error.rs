//! Request errors and their HTTP mapping.
//!
//! Handlers return [`AppError`] from their inner logic. The outer handler
//! converts it exactly once into an [`ApiError`] with [`AppError::into_api_error`],
//! which picks the status code, decides what the client may see, and logs
//! server-side detail.

use crate::inference::InferenceError;
use crate::mesh_fetcher::MeshFetchError;
use crate::qr_code::QrCodeError;
use crate::s3_store::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Uploaded file is empty.")]
    EmptyUpload,

    #[error("{0}")]
    InvalidUpload(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("Model file '{key}' not found in bucket '{bucket}'.")]
    ModelNotFound { key: String, bucket: String },

    #[error("Model lookup failed: {0}")]
    ModelLookup(#[source] StorageError),

    #[error("Unexpected inference response: {0}")]
    BadUpstreamResponse(String),

    #[error("Failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    MeshDownload(#[from] MeshFetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    QrCode(#[from] QrCodeError),
}

impl AppError {
    /// Status code for each error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::EmptyUpload | AppError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadUpstreamResponse(_) => StatusCode::BAD_GATEWAY,
            AppError::ModelLookup(_)
            | AppError::Staging(_)
            | AppError::Inference(_)
            | AppError::MeshDownload(_)
            | AppError::Storage(_)
            | AppError::QrCode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::EmptyUpload => "EMPTY_UPLOAD",
            AppError::InvalidUpload(_) => "INVALID_UPLOAD",
            AppError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            AppError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            AppError::ModelLookup(_) => "STORAGE_UNAVAILABLE",
            AppError::BadUpstreamResponse(_) => "BAD_UPSTREAM_RESPONSE",
            AppError::Staging(_)
            | AppError::Inference(_)
            | AppError::MeshDownload(_)
            | AppError::Storage(_)
            | AppError::QrCode(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the client. `fallback` is used for errors whose
    /// detail stays in the server logs.
    fn public_message(&self, fallback: &str) -> String {
        match self {
            AppError::EmptyUpload
            | AppError::InvalidUpload(_)
            | AppError::PayloadTooLarge(_)
            | AppError::ModelNotFound { .. } => self.to_string(),
            AppError::ModelLookup(_) => {
                "Unable to access model in S3. Check server logs for details.".to_string()
            }
            AppError::BadUpstreamResponse(_) => "Failed to generate 3D model from sketch.".to_string(),
            _ => fallback.to_string(),
        }
    }

    /// Log the error and convert it into the response sent to the client.
    pub fn into_api_error(self, fallback: &str) -> ApiError {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, detail = ?self, code = self.code(), "Request failed");
        } else {
            warn!(error = %self, code = self.code(), "Request rejected");
        }

        ApiError {
            status,
            body: ErrorResponse {
                detail: self.public_message(fallback),
                code: self.code().to_string(),
            },
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
    pub code: String,
}

/// Error ready to be sent to the client
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: &str = "An unexpected error occurred while processing the sketch.";

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::EmptyUpload.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::ModelNotFound {
                key: "model.glb".into(),
                bucket: "b".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::BadUpstreamResponse("no mesh".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::MeshDownload(MeshFetchError::Status(403)).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_names_key_and_bucket() {
        let err = AppError::ModelNotFound {
            key: "model.glb".into(),
            bucket: "sketch-models".into(),
        }
        .into_api_error(FALLBACK);

        assert_eq!(
            err.body.detail,
            "Model file 'model.glb' not found in bucket 'sketch-models'."
        );
    }

    #[test]
    fn test_internal_detail_hidden() {
        let err = AppError::Storage(StorageError::Upload {
            key: "abc.glb".into(),
            message: "AccessDenied: secret bucket policy".into(),
        })
        .into_api_error(FALLBACK);

        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.detail, FALLBACK);
        assert!(!err.body.detail.contains("AccessDenied"));
    }

    #[test]
    fn test_model_lookup_message() {
        let err = AppError::ModelLookup(StorageError::Lookup {
            key: "model.glb".into(),
            message: "timeout".into(),
        })
        .into_api_error(FALLBACK);

        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.code, "STORAGE_UNAVAILABLE");
        assert!(err.body.detail.starts_with("Unable to access model in S3"));
    }
}
