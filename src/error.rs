use thiserror::Error;

/// Failures while acquiring the camera. Recoverable: the caller falls back to a
/// still image or the placeholder background and may retry explicitly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
}

/// A sprite or background image could not be fetched or decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("failed to fetch {source_url}: {reason}")]
    Fetch { source_url: String, reason: String },

    #[error("failed to decode {source_url}: {reason}")]
    Decode { source_url: String, reason: String },

    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
}

/// Model artifacts could not be prepared. Face anchoring stays disabled for the
/// rest of the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PerceptionError {
    #[error("face models unavailable: {0}")]
    ModelsUnavailable(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("nothing has been rendered yet")]
    NotRendered,

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
