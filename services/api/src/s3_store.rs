use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Content type for binary glTF models
pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

/// Errors returned by the object store adapter
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to check existence of {key}: {message}")]
    Lookup { key: String, message: String },

    #[error("Failed to presign URL for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Failed to upload {key}: {message}")]
    Upload { key: String, message: String },
}

/// Canned access policy applied to uploaded objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    Private,
    PublicRead,
}

/// Object store operations used by the HTTP handlers.
///
/// One implementation talks to S3; tests substitute fakes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Returns `Ok(false)` only when the object is absent. Any other failure
    /// is an error.
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Time-limited GET URL for `key`. Signing is local, no request is made.
    async fn presigned_get_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        acl: ObjectAcl,
    ) -> Result<(), StorageError>;

    /// Public URL an object is reachable at once uploaded with public-read.
    fn public_url(&self, key: &str) -> String;
}

/// Public URL for an object in a virtual-hosted AWS bucket
pub fn public_object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)
}

/// S3-backed object store
pub struct S3Store {
    client: S3Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
}

impl S3Store {
    /// Create a new store from static credentials in the service config
    pub async fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "sketchforge-config",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Self::from_client(client, config)
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn object_exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);

                if not_found {
                    debug!(key = %key, "Object not found");
                    Ok(false)
                } else {
                    Err(StorageError::Lookup {
                        key: key.to_string(),
                        message: format!("{e:?}"),
                    })
                }
            }
        }
    }

    async fn presigned_get_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presign_err = |message: String| StorageError::Presign {
            key: key.to_string(),
            message,
        };

        let presigning_config =
            PresigningConfig::expires_in(ttl).map_err(|e| presign_err(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| presign_err(format!("{e:?}")))?;

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
        acl: ObjectAcl,
    ) -> Result<(), StorageError> {
        let size = body.len();
        let start = Instant::now();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type);

        if acl == ObjectAcl::PublicRead {
            request = request.acl(ObjectCannedAcl::PublicRead);
        }

        request.send().await.map_err(|e| {
            error!(
                error = ?e,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::Upload {
                key: key.to_string(),
                message: format!("{e:?}"),
            }
        })?;

        info!(
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object uploaded"
        );

        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match self.endpoint_url {
            // S3-compatible providers: path-style {endpoint}/{bucket}/{key}
            Some(ref endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                key
            ),
            None => public_object_url(&self.bucket, &self.region, key),
        }
    }
}
