use thiserror::Error;

/// Failures reported by a [`RecordStore`](crate::RecordStore) or
/// [`ProjectStore`](crate::ProjectStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The endpoint itself does not exist on this backend (HTTP 404 on a route).
    #[error("endpoint not available: {0}")]
    EndpointMissing(String),
    #[error("resource not found")]
    NotFound,
    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) => true,
            StoreError::Status { status } => matches!(status, 408 | 429) || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("file is not a supported image: {0}")]
    NotAnImage(String),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("upload transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum FlipbookError {
    #[error("page {index} is out of range (book has {len} pages)")]
    PageOutOfRange { index: usize, len: usize },
    #[error("overlay {overlay} does not exist on page {index}")]
    OverlayOutOfRange { index: usize, overlay: usize },
    #[error("another upload is still in flight")]
    Busy,
    #[error("{0} is disabled for this editor")]
    CapabilityDisabled(&'static str),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ViewerError {
    #[error("Flipbook not found. The link may be expired or invalid.")]
    NotFound,
    #[error("Failed to load flipbook. Please try again later.")]
    Unavailable(String),
    #[error("No flipbook content found. Please create some pages first.")]
    NoContent,
    #[error("Incorrect password. Please try again.")]
    IncorrectPassword,
    #[error("This flipbook requires a password to view.")]
    Locked,
}
