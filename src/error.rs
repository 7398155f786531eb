use std::path::PathBuf;

/// Reasons a test image could not be registered onto its reference.
#[derive(Debug, thiserror::Error)]
pub enum AlignmentError {
    /// Keypoint detection found nothing usable in one of the images.
    #[error("no usable keypoints in {image} image (found {found})")]
    InsufficientKeypoints { image: &'static str, found: usize },

    /// Too few cross-checked correspondences survived retention.
    #[error("only {found} feature matches, at least {required} required")]
    InsufficientMatches { found: usize, required: usize },

    /// RANSAC found no consensus, or the estimate is singular.
    #[error("homography estimation is degenerate")]
    DegenerateHomography,
}

/// Everything that can fail while inspecting one image pair.
#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    /// Two images that must share a frame have different sizes.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("invalid inspection configuration: {0}")]
    InvalidConfig(String),

    #[error("no reference image found for {}", .0.display())]
    MissingReference(PathBuf),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, InspectionError>;
