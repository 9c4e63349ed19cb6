use async_trait::async_trait;
use bytes::Bytes;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug)]
pub enum MeshFetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Mesh download timed out after {0:?}")]
    Timeout(Duration),

    #[error("Mesh download returned status {0}")]
    Status(u16),

    #[error("Mesh download failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Downloads generated meshes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MeshFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, MeshFetchError>;
}

/// Single-attempt HTTP download with a fixed timeout
pub struct HttpMeshFetcher {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpMeshFetcher {
    pub fn new(timeout: Duration) -> Result<Self, MeshFetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MeshFetchError::Client)?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    fn classify(&self, e: reqwest::Error) -> MeshFetchError {
        if e.is_timeout() {
            MeshFetchError::Timeout(self.timeout)
        } else {
            MeshFetchError::Request(e)
        }
    }
}

#[async_trait]
impl MeshFetcher for HttpMeshFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Bytes, MeshFetchError> {
        let start = Instant::now();

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeshFetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        info!(
            size_bytes = body.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Mesh downloaded"
        );

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    /// Serve a small router on an ephemeral local port
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_router() -> Router {
        Router::new()
            .route("/mesh.glb", get(|| async { b"glTF\x02\x00\x00\x00".to_vec() }))
            .route("/missing.glb", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/slow.glb",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    b"late".to_vec()
                }),
            )
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = serve(test_router()).await;
        let fetcher = HttpMeshFetcher::new(Duration::from_secs(5)).unwrap();

        let body = fetcher.fetch(&format!("{base}/mesh.glb")).await.unwrap();
        assert_eq!(&body[..4], b"glTF");
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let base = serve(test_router()).await;
        let fetcher = HttpMeshFetcher::new(Duration::from_secs(5)).unwrap();

        let err = fetcher.fetch(&format!("{base}/missing.glb")).await.unwrap_err();
        assert!(matches!(err, MeshFetchError::Status(404)));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let base = serve(test_router()).await;
        let fetcher = HttpMeshFetcher::new(Duration::from_millis(200)).unwrap();

        let err = fetcher.fetch(&format!("{base}/slow.glb")).await.unwrap_err();
        assert!(matches!(err, MeshFetchError::Timeout(_)));
    }
}
