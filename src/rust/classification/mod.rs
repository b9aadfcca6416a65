use serde::{Deserialize, Serialize};

mod error;
mod peaks;
pub mod binner;
pub mod averager;
mod utils;

pub use error::ClassificationError;
pub use peaks::{BraggPeak, PeakSource, PointListArray};
pub use binner::{bin_peaks, BinCollision, PeakBinner, PeakBinnerBuilder, PeakHistogram, Progress};
pub use averager::{class_images, ClassAverager, ClassImages, DiffractionStack, EmptyClusterPolicy};

/// Information about the configuration of a peak binner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinnerInfo {
    /// Diffraction pattern dimensions `(Qx, Qy)` in pixels
    pub detector_shape: (usize, usize),
    /// Bin widths `(bin_x, bin_y)` in pixels
    pub bin_size: (usize, usize),
    /// Number of bins along x and y
    pub bins_per_axis: (usize, usize),
    /// Length of each per-position histogram
    pub n_bins: usize,
    /// Whether a detector mask restricts which peaks are binned
    pub masked: bool,
    /// How colliding peaks are combined
    pub collision: BinCollision,
}
