//! HTTP backends for the flipbook editor: the page-record and project API, and
//! the unsigned image-host uploader.

use flipbook_core::StoreError;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

pub mod api;
pub mod upload;

pub use api::ApiClient;
pub use upload::HostedUploader;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid service url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parses `base` and makes sure it ends in `/` so relative joins keep its path.
pub(crate) fn parse_base(base: &str) -> Result<Url, RemoteError> {
    let trimmed = base.trim();
    let invalid = |reason: String| RemoteError::InvalidUrl {
        url: base.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("empty".to_string()));
    }
    let mut url = Url::parse(trimmed).map_err(|err| invalid(err.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid("cannot be a base".to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub(crate) fn transport(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else if let Some(status) = err.status() {
        StoreError::Status {
            status: status.as_u16(),
        }
    } else {
        StoreError::Transport(err.to_string())
    }
}

pub(crate) fn status_error(status: StatusCode) -> StoreError {
    StoreError::Status {
        status: status.as_u16(),
    }
}
