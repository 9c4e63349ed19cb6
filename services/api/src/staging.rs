use bytes::Bytes;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const DEFAULT_SUFFIX: &str = ".png";

/// Uploaded sketch as received from the client
#[derive(Debug, Clone)]
pub struct SketchUpload {
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl SketchUpload {
    /// Temp file suffix taken from the uploaded file name, e.g. ".jpg"
    fn suffix(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
    }
}

/// A sketch written to a temporary file.
///
/// The file is removed when the guard is dropped, whichever way the request
/// ends.
#[derive(Debug)]
pub struct StagedSketch {
    file: Option<NamedTempFile>,
}

impl StagedSketch {
    /// Write the upload to a fresh temporary file
    pub async fn write(upload: &SketchUpload) -> std::io::Result<Self> {
        let suffix = upload.suffix();
        let data = upload.data.clone();

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix("sketch-")
                .suffix(&suffix)
                .tempfile()?;
            file.write_all(&data)?;
            file.flush()?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!(path = %file.path().display(), size_bytes = upload.data.len(), "Sketch staged");

        Ok(Self { file: Some(file) })
    }

    pub fn path(&self) -> &Path {
        // Only `None` after `drop`
        self.file
            .as_ref()
            .map(|f| f.path())
            .unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for StagedSketch {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove staged sketch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: Option<&str>, data: &'static [u8]) -> SketchUpload {
        SketchUpload {
            file_name: name.map(str::to_string),
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_suffix_from_file_name() {
        assert_eq!(upload(Some("drawing.JPG"), b"x").suffix(), ".jpg");
        assert_eq!(upload(Some("sketch.png"), b"x").suffix(), ".png");
        assert_eq!(upload(Some("sketch"), b"x").suffix(), ".png");
        assert_eq!(upload(None, b"x").suffix(), ".png");
        assert_eq!(upload(Some("evil.p/ng"), b"x").suffix(), ".png");
    }

    #[tokio::test]
    async fn test_staged_file_contents_and_cleanup() {
        let staged = StagedSketch::write(&upload(Some("s.png"), b"\x89PNG data"))
            .await
            .unwrap();
        let path = staged.path().to_path_buf();

        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG data");
        assert!(path.to_string_lossy().ends_with(".png"));

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_on_early_return() {
        async fn failing_step(upload: &SketchUpload) -> Result<(), std::path::PathBuf> {
            let staged = StagedSketch::write(upload).await.unwrap();
            Err(staged.path().to_path_buf())
        }

        let path = failing_step(&upload(None, b"data")).await.unwrap_err();
        assert!(!path.exists());
    }
}
