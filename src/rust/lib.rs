//! Helpers for cluster classification of 4D-STEM diffraction data.
//!
//! Two independent reductions over a real-space scan grid:
//! - [`PeakBinner`] turns per-position Bragg peak lists into a dense intensity
//!   histogram, one feature vector per scan position
//! - [`ClassAverager`] averages the raw diffraction patterns of every cluster
//!   an external clustering step assigned
//!
//! # Basic Usage
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use ndarray::Array4;
//! use stemclass::{BraggPeak, ClassAverager, PeakBinner, PointListArray};
//!
//! let mut peaks = PointListArray::new(2, 1);
//! peaks.add_peak(0, 0, BraggPeak::new(1.0, 1.0, 10.0))?;
//! peaks.add_peak(1, 0, BraggPeak::new(6.0, 6.0, 20.0))?;
//!
//! let binner = PeakBinner::builder()
//!     .with_detector_shape(8, 8)?
//!     .with_bin_size(4, 4)?
//!     .build()?;
//! let histogram = binner.bin(&peaks)?;
//! assert_eq!(histogram.feature_matrix().dim(), (2, 4));
//!
//! let stack = Array4::<f32>::ones((2, 1, 8, 8));
//! let classes = ClassAverager::new().average(&stack, &[0, 1])?;
//! assert_eq!(classes.counts(), &[1, 1]);
//! # Ok(())
//! # }
//! ```
//!
//! # Parallelism
//!
//! Both operations run serially by default. A [`RuntimeConfig`] spreads scan
//! positions over a rayon pool; results are identical either way.
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use stemclass::{PeakBinner, PointListArray, RuntimeConfig};
//!
//! let binner = PeakBinner::builder()
//!     .with_detector_shape(64, 64)?
//!     .with_bin_size(8, 8)?
//!     .with_runtime_config(RuntimeConfig::with_threads(4))
//!     .build()?;
//! let histogram = binner.bin(&PointListArray::new(16, 16))?;
//! assert_eq!(histogram.data().sum(), 0.0);
//! # Ok(())
//! # }
//! ```

pub mod classification;
mod runtime;

pub use classification::{
    bin_peaks, class_images, BinCollision, BinnerInfo, BraggPeak, ClassAverager, ClassImages,
    ClassificationError, DiffractionStack, EmptyClusterPolicy, PeakBinner, PeakBinnerBuilder,
    PeakHistogram, PeakSource, PointListArray, Progress,
};
pub use runtime::{create_thread_pool, RuntimeConfig};

pub fn init_logger() {
    env_logger::init();
}
