//! Error types for the render-and-compare pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering, comparing or cleaning up
#[derive(Error, Debug)]
pub enum Error {
    /// The rendering engine could not be started
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Markup could not be loaded into the page
    #[error("Failed to load content: {0}")]
    LoadError(String),

    /// Capturing or writing the rendered pixels failed
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Rendering did not finish in time
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// An image could not be read or decoded
    #[error("Image decode failed: {0}")]
    DecodeError(String),

    /// Rendered and reference images have different sizes
    #[error("Image sizes do not match: expected {}x{}, got {}x{}", .expected.0, .expected.1, .actual.0, .actual.1)]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// A zero-area image cannot be scored
    #[error("Image has no pixels")]
    EmptyImage,

    /// No reference image is provisioned for the challenge
    #[error("Reference image not found: {}", .0.display())]
    ReferenceNotFound(PathBuf),

    /// Challenge identifier contains characters outside `[A-Za-z0-9_-]`
    #[error("Invalid challenge identifier: {0:?}")]
    InvalidChallenge(String),

    /// Removing an ephemeral render failed
    #[error("Cleanup of {} failed: {}", .path.display(), .reason)]
    CleanupError { path: PathBuf, reason: String },

    /// Visitor counter storage failed
    #[error("Counter storage failed: {0}")]
    StorageError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Engine could not start, crashed or timed out
    pub fn is_render_failure(&self) -> bool {
        match self {
            Error::InitializationError(_)
            | Error::LoadError(_)
            | Error::RenderError(_)
            | Error::Timeout(_) => true,
            #[cfg(feature = "cdp")]
            Error::CdpError(_) => true,
            _ => false,
        }
    }

    /// Decode error, size mismatch or missing reference
    pub fn is_comparison_failure(&self) -> bool {
        matches!(
            self,
            Error::DecodeError(_)
                | Error::DimensionMismatch { .. }
                | Error::EmptyImage
                | Error::ReferenceNotFound(_)
                | Error::InvalidChallenge(_)
        )
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::CdpError(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::DecodeError(err.to_string())
    }
}
