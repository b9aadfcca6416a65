use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{debug, info};
use ndarray::{Array2, Array3, ArrayView1, ArrayView3, ArrayViewMut2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::ClassificationError;
use super::peaks::{BraggPeak, PeakSource};
use super::utils::normalize_rows;
use super::BinnerInfo;
use crate::runtime::{create_thread_pool, RuntimeConfig};

/// What happens when two peaks of the same scan position land in the same bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BinCollision {
    /// The later peak replaces the earlier one
    #[default]
    Overwrite,
    /// Intensities of all peaks in the bin are summed
    Accumulate,
}

/// Reported to a progress callback after each scan position is binned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Number of scan positions finished so far
    pub completed: usize,
    /// Total number of scan positions
    pub total: usize,
}

/// Dense per-position peak intensity histogram of shape `[Rx, Ry, n_bins]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakHistogram {
    data: Array3<f64>,
}

impl PeakHistogram {
    pub fn data(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.data
    }

    pub fn scan_shape(&self) -> (usize, usize) {
        let (rx, ry, _) = self.data.dim();
        (rx, ry)
    }

    pub fn n_bins(&self) -> usize {
        self.data.dim().2
    }

    /// Returns the histogram of a single scan position
    pub fn bins(&self, rx: usize, ry: usize) -> Option<ArrayView1<'_, f64>> {
        let (nx, ny) = self.scan_shape();
        if rx >= nx || ry >= ny {
            return None;
        }
        Some(self.data.slice(ndarray::s![rx, ry, ..]))
    }

    /// Flattens the scan grid into a `[Rx * Ry, n_bins]` feature matrix.
    ///
    /// Rows are ordered row-major over the scan grid (`rx * Ry + ry`), the same
    /// order [`ClassAverager`](super::ClassAverager) expects its labels in.
    pub fn feature_matrix(&self) -> Array2<f64> {
        let (nx, ny, n_bins) = self.data.dim();
        Array2::from_shape_fn((nx * ny, n_bins), |(i, b)| self.data[[i / ny, i % ny, b]])
    }

    /// Same as [`feature_matrix`](Self::feature_matrix) with every row scaled to unit L2 norm
    pub fn normalized_feature_matrix(&self) -> Array2<f64> {
        normalize_rows(&self.feature_matrix())
    }
}

/// A builder for constructing a [`PeakBinner`] with a fluent interface.
#[derive(Debug, Default)]
pub struct PeakBinnerBuilder {
    detector_shape: Option<(usize, usize)>,
    bin_size: Option<(usize, usize)>,
    mask: Option<Array2<bool>>,
    collision: BinCollision,
    runtime_config: RuntimeConfig,
}

impl PeakBinnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the diffraction pattern dimensions `Qx` and `Qy` in pixels
    ///
    /// # Errors
    /// * `InvalidConfiguration` if either dimension is zero
    pub fn with_detector_shape(
        mut self,
        qx: usize,
        qy: usize,
    ) -> Result<Self, ClassificationError> {
        if qx == 0 || qy == 0 {
            return Err(ClassificationError::InvalidConfiguration(format!(
                "Detector dimensions must be positive, got {}x{}",
                qx, qy
            )));
        }
        self.detector_shape = Some((qx, qy));
        Ok(self)
    }

    /// Sets the bin widths along x and y in pixels
    ///
    /// # Errors
    /// * `InvalidConfiguration` if either width is zero
    pub fn with_bin_size(
        mut self,
        bin_x: usize,
        bin_y: usize,
    ) -> Result<Self, ClassificationError> {
        if bin_x == 0 || bin_y == 0 {
            return Err(ClassificationError::InvalidConfiguration(format!(
                "Bin widths must be positive, got {}x{}",
                bin_x, bin_y
            )));
        }
        self.bin_size = Some((bin_x, bin_y));
        Ok(self)
    }

    /// Restricts binning to peaks whose rounded pixel is `true` in `mask`.
    ///
    /// Useful to drop false positives around a beamstop. The mask is indexed
    /// `[qx, qy]` and must match the detector shape.
    pub fn with_mask(mut self, mask: Array2<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_collision(mut self, collision: BinCollision) -> Self {
        self.collision = collision;
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Builds and returns the final PeakBinner instance
    ///
    /// # Errors
    /// * `InvalidConfiguration` if the detector shape or bin size is missing,
    ///   or a bin width does not divide its detector dimension
    /// * `ShapeMismatch` if the mask shape differs from the detector shape
    pub fn build(self) -> Result<PeakBinner, ClassificationError> {
        let (qx, qy) = self.detector_shape.ok_or_else(|| {
            ClassificationError::InvalidConfiguration("Detector shape must be set".to_string())
        })?;
        let (bin_x, bin_y) = self.bin_size.ok_or_else(|| {
            ClassificationError::InvalidConfiguration("Bin size must be set".to_string())
        })?;

        if qx % bin_x != 0 || qy % bin_y != 0 {
            return Err(ClassificationError::InvalidConfiguration(format!(
                "Bin size {}x{} does not evenly divide detector {}x{}",
                bin_x, bin_y, qx, qy
            )));
        }

        if let Some(mask) = &self.mask {
            if mask.dim() != (qx, qy) {
                return Err(ClassificationError::ShapeMismatch(format!(
                    "Mask shape {:?} does not match detector shape {:?}",
                    mask.dim(),
                    (qx, qy)
                )));
            }
        }

        Ok(PeakBinner {
            detector_shape: (qx, qy),
            bin_size: (bin_x, bin_y),
            bins_per_axis: (qx / bin_x, qy / bin_y),
            mask: self.mask,
            collision: self.collision,
            runtime_config: self.runtime_config,
        })
    }
}

/// Converts sparse per-position Bragg peak lists into a dense spatial
/// intensity histogram, suitable as a feature vector for clustering.
///
/// ```
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use stemclass::{BraggPeak, PeakBinner, PointListArray};
///
/// let mut peaks = PointListArray::new(1, 1);
/// peaks.add_peak(0, 0, BraggPeak::new(3.0, 1.0, 5.0))?;
///
/// let binner = PeakBinner::builder()
///     .with_detector_shape(4, 4)?
///     .with_bin_size(2, 2)?
///     .build()?;
///
/// let histogram = binner.bin(&peaks)?;
/// assert_eq!(histogram.n_bins(), 4);
/// assert_eq!(histogram.data()[[0, 0, 1]], 5.0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PeakBinner {
    detector_shape: (usize, usize),
    bin_size: (usize, usize),
    bins_per_axis: (usize, usize),
    mask: Option<Array2<bool>>,
    collision: BinCollision,
    runtime_config: RuntimeConfig,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<PeakBinner>();
    }
};

impl PeakBinner {
    /// Creates a new PeakBinnerBuilder for fluent construction
    pub fn builder() -> PeakBinnerBuilder {
        PeakBinnerBuilder::new()
    }

    /// Returns a summary of the binner's configuration
    pub fn info(&self) -> BinnerInfo {
        BinnerInfo {
            detector_shape: self.detector_shape,
            bin_size: self.bin_size,
            bins_per_axis: self.bins_per_axis,
            n_bins: self.n_bins(),
            masked: self.mask.is_some(),
            collision: self.collision,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.bins_per_axis.0 * self.bins_per_axis.1
    }

    /// Bins the peaks of every scan position provided by `source`.
    ///
    /// # Errors
    /// * `IndexOutOfRange` if any peak lies outside `[0, Qx) x [0, Qy)`; no
    ///   histogram is produced in that case
    pub fn bin<S>(&self, source: &S) -> Result<PeakHistogram, ClassificationError>
    where
        S: PeakSource + Sync + ?Sized,
    {
        self.run(source, None)
    }

    /// Like [`bin`](Self::bin), reporting to `progress` after each scan position.
    ///
    /// In parallel mode positions finish in no particular order, but
    /// `completed` always counts up by one per call.
    pub fn bin_with_progress<S>(
        &self,
        source: &S,
        progress: &(dyn Fn(Progress) + Sync),
    ) -> Result<PeakHistogram, ClassificationError>
    where
        S: PeakSource + Sync + ?Sized,
    {
        self.run(source, Some(progress))
    }

    fn run<S>(
        &self,
        source: &S,
        progress: Option<&(dyn Fn(Progress) + Sync)>,
    ) -> Result<PeakHistogram, ClassificationError>
    where
        S: PeakSource + Sync + ?Sized,
    {
        let start = Instant::now();
        let (nx, ny) = source.scan_shape();
        self.validate_peaks(source)?;

        let mut data = Array3::<f64>::zeros((nx, ny, self.n_bins()));
        let counter = ProgressCounter {
            completed: AtomicUsize::new(0),
            total: nx * ny,
            callback: progress,
        };

        if self.runtime_config.is_serial() {
            for (rx, row) in data.axis_iter_mut(Axis(0)).enumerate() {
                self.fill_row(source, rx, row, &counter);
            }
        } else {
            let pool = create_thread_pool(&self.runtime_config)?;
            let mut fill = || {
                data.axis_iter_mut(Axis(0))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(rx, row)| self.fill_row(source, rx, row, &counter))
            };
            match pool {
                Some(pool) => pool.install(fill),
                None => fill(),
            }
        }

        info!(
            "Binned {}x{} scan positions into {} bins (took {:.2?})",
            nx,
            ny,
            self.n_bins(),
            start.elapsed()
        );
        Ok(PeakHistogram { data })
    }

    fn validate_peaks<S>(&self, source: &S) -> Result<(), ClassificationError>
    where
        S: PeakSource + ?Sized,
    {
        let (nx, ny) = source.scan_shape();
        let (qx_max, qy_max) = (self.detector_shape.0 as f64, self.detector_shape.1 as f64);
        for rx in 0..nx {
            for ry in 0..ny {
                for (i, peak) in source.point_list(rx, ry).iter().enumerate() {
                    // NaN fails both range checks
                    if !(0.0..qx_max).contains(&peak.qx) || !(0.0..qy_max).contains(&peak.qy) {
                        return Err(ClassificationError::IndexOutOfRange {
                            rx,
                            ry,
                            peak: i,
                            qx: peak.qx,
                            qy: peak.qy,
                            bounds: self.detector_shape,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn fill_row<S>(
        &self,
        source: &S,
        rx: usize,
        mut row: ArrayViewMut2<'_, f64>,
        counter: &ProgressCounter<'_>,
    ) where
        S: PeakSource + ?Sized,
    {
        for (ry, mut bins) in row.axis_iter_mut(Axis(0)).enumerate() {
            let peaks = source.point_list(rx, ry);
            let mut skipped = 0usize;
            for peak in peaks {
                if !self.is_eligible(peak) {
                    skipped += 1;
                    continue;
                }
                let bin = self.flat_bin(peak);
                match self.collision {
                    BinCollision::Overwrite => bins[bin] = peak.intensity,
                    BinCollision::Accumulate => bins[bin] += peak.intensity,
                }
            }
            if skipped > 0 {
                debug!("Masked {} of {} peaks at ({}, {})", skipped, peaks.len(), rx, ry);
            }
            counter.tick();
        }
    }

    fn is_eligible(&self, peak: &BraggPeak) -> bool {
        match &self.mask {
            None => true,
            Some(mask) => {
                // Ties go to the even pixel; a coordinate just below Q rounds to Q
                let (qx, qy) = self.detector_shape;
                let ix = (peak.qx.round_ties_even() as usize).min(qx - 1);
                let iy = (peak.qy.round_ties_even() as usize).min(qy - 1);
                mask[[ix, iy]]
            }
        }
    }

    fn flat_bin(&self, peak: &BraggPeak) -> usize {
        let bx = (peak.qx / self.bin_size.0 as f64).floor() as usize;
        let by = (peak.qy / self.bin_size.1 as f64).floor() as usize;
        by * self.bins_per_axis.0 + bx
    }
}

struct ProgressCounter<'a> {
    completed: AtomicUsize,
    total: usize,
    callback: Option<&'a (dyn Fn(Progress) + Sync)>,
}

impl ProgressCounter<'_> {
    fn tick(&self) {
        if let Some(callback) = self.callback {
            let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
            callback(Progress {
                completed,
                total: self.total,
            });
        }
    }
}

/// Bins `source` with the given detector shape, bin widths and optional mask,
/// overwriting on bin collisions.
pub fn bin_peaks<S>(
    source: &S,
    qx: usize,
    qy: usize,
    bin_x: usize,
    bin_y: usize,
    mask: Option<Array2<bool>>,
) -> Result<PeakHistogram, ClassificationError>
where
    S: PeakSource + Sync + ?Sized,
{
    let mut builder = PeakBinner::builder()
        .with_detector_shape(qx, qy)?
        .with_bin_size(bin_x, bin_y)?;
    if let Some(mask) = mask {
        builder = builder.with_mask(mask);
    }
    builder.build()?.bin(source)
}
