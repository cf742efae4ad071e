use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};

use crate::error::UploadError;

pub const UPLOAD_PATH: &str = "/server/files/upload";

/// Moves a sliced file onto a printer. Blocking from the caller's point of view: it returns
/// once the printer has accepted or refused the file.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, base_url: &str, path: &Path) -> Result<(), UploadError>;
}

/// Multipart upload to the printer's HTTP file endpoint.
pub struct HttpUploader {
    client: Client,
}

impl HttpUploader {
    pub fn new() -> Result<Self, UploadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, base_url: &str, path: &Path) -> Result<(), UploadError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{base_url}{UPLOAD_PATH}"))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(file = %file_name, %base_url, "Upload accepted");
        Ok(())
    }
}
