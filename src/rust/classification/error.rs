/// Represents the different types of errors that can occur while binning peaks
/// or averaging diffraction patterns.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassificationError {
    /// Parameters that can never produce a valid result, such as bin widths that
    /// do not divide the detector evenly or non-positive dimensions
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A peak coordinate fell outside the declared detector bounds
    #[error(
        "Peak {peak} at scan position ({rx}, {ry}) has coordinate ({qx}, {qy}) outside the detector bounds [0, {}) x [0, {})",
        .bounds.0, .bounds.1
    )]
    IndexOutOfRange {
        rx: usize,
        ry: usize,
        peak: usize,
        qx: f64,
        qy: f64,
        bounds: (usize, usize),
    },
    /// Mask, image stack or label dimensions disagree with each other
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A cluster label in [0, n_clusters) has no scan positions assigned to it
    #[error("Cluster {label} has no members")]
    EmptyCluster { label: usize },
}

impl From<rayon::ThreadPoolBuildError> for ClassificationError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ClassificationError::InvalidConfiguration(format!("Failed to build thread pool: {}", err))
    }
}
