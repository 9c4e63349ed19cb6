//! Sketchforge API
//!
//! Turns 2D sketches into downloadable 3D models. A sketch uploaded to
//! `/api/generate` is sent to the fal.ai TripoSR model, the resulting GLB mesh
//! is stored publicly in S3, and the caller receives the download URL along
//! with a QR code for opening it on a phone. `/api/demo` serves a pre-uploaded
//! model through a one-hour signed URL.
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/generate
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Staged       │──▶│ fal.ai       │──▶│ Mesh         │
//! │ Sketch       │   │ Queue        │   │ Download     │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!                                              │
//!  GET /api/demo                               ▼
//!        │                              ┌──────────────┐
//!        └─────────────────────────────▶│ S3 Store     │
//!                                       └──────────────┘
//!                                              │
//!                                              ▼
//!                                       ┌──────────────┐
//!                                       │ QR Encoder   │
//!                                       └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod inference;
pub mod mesh_fetcher;
pub mod qr_code;
pub mod s3_store;
pub mod staging;

pub use api::{create_router, AppState, DemoResponse, GenerateResponse, HandlerSettings};
pub use config::{Config, ConfigError};
pub use error::{ApiError, AppError, ErrorResponse};
pub use inference::{FalClient, InferenceClient, InferenceError, MeshReference};
pub use mesh_fetcher::{HttpMeshFetcher, MeshFetchError, MeshFetcher};
pub use qr_code::{QrCodeError, QrEncoder};
pub use s3_store::{ObjectAcl, ObjectStore, S3Store, StorageError};
pub use staging::{SketchUpload, StagedSketch};
