use std::time::Duration;

use async_trait::async_trait;
use flipbook_core::config::UploadConfig;
use flipbook_core::{ImageUploader, UploadError, UploadFile};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::RemoteError;

/// Unsigned uploads to an image host that answers with a `secure_url`.
#[derive(Debug, Clone)]
pub struct HostedUploader {
    client: Client,
    endpoint: Url,
    upload_preset: String,
}

#[derive(Debug, Deserialize)]
struct HostResponse {
    secure_url: Option<String>,
    error: Option<HostError>,
}

#[derive(Debug, Deserialize)]
struct HostError {
    message: String,
}

impl HostedUploader {
    pub fn new(
        endpoint: &str,
        upload_preset: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|err| RemoteError::InvalidUrl {
            url: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            upload_preset: upload_preset.into(),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, RemoteError> {
        Self::new(&config.endpoint(), config.upload_preset.clone(), config.timeout)
    }
}

#[async_trait]
impl ImageUploader for HostedUploader {
    #[instrument(skip(self, file), fields(file = %file.file_name, bytes = file.bytes.len()))]
    async fn upload(&self, file: &UploadFile) -> Result<String, UploadError> {
        let format = image::guess_format(&file.bytes)
            .map_err(|_| UploadError::NotAnImage(file.file_name.clone()))?;

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(format.to_mime_type())
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone());

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|err| UploadError::Transport(err.to_string()))?;
        let status = response.status();
        debug!(%status, "image host response");

        let body: HostResponse = match response.json().await {
            Ok(body) => body,
            Err(_) => return Err(UploadError::Rejected(format!("image host answered {}", status))),
        };
        match (body.secure_url, body.error) {
            (Some(url), _) if status.is_success() => Ok(url),
            (_, Some(error)) => Err(UploadError::Rejected(error.message)),
            _ => Err(UploadError::Rejected(format!(
                "image host answered {} without a url",
                status
            ))),
        }
    }
}
