use serde::{Deserialize, Serialize};

use super::error::ClassificationError;

/// A single detected Bragg peak in detector pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BraggPeak {
    pub qx: f64,
    pub qy: f64,
    pub intensity: f64,
}

impl BraggPeak {
    pub fn new(qx: f64, qy: f64, intensity: f64) -> Self {
        Self { qx, qy, intensity }
    }
}

/// Provides the detected peaks for every position of a scan grid.
///
/// Implementors are read-only data providers: the binner only ever borrows
/// the peak lists and never holds on to them past a single call.
pub trait PeakSource {
    /// Returns the scan grid dimensions as `(Rx, Ry)`
    fn scan_shape(&self) -> (usize, usize);

    /// Returns the peaks detected at scan position `(rx, ry)`, possibly empty.
    ///
    /// Callers stay within `scan_shape()`; implementors may panic otherwise.
    fn point_list(&self, rx: usize, ry: usize) -> &[BraggPeak];
}

/// In-memory grid of peak lists, one per scan position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointListArray {
    shape: (usize, usize),
    lists: Vec<Vec<BraggPeak>>,
}

impl PointListArray {
    /// Creates an `rx` by `ry` grid with every peak list empty
    pub fn new(rx: usize, ry: usize) -> Self {
        Self {
            shape: (rx, ry),
            lists: vec![Vec::new(); rx * ry],
        }
    }

    /// Appends a peak to the list at `(rx, ry)`
    pub fn add_peak(
        &mut self,
        rx: usize,
        ry: usize,
        peak: BraggPeak,
    ) -> Result<(), ClassificationError> {
        let index = self.index(rx, ry)?;
        self.lists[index].push(peak);
        Ok(())
    }

    /// Replaces the whole peak list at `(rx, ry)`
    pub fn set_point_list(
        &mut self,
        rx: usize,
        ry: usize,
        peaks: Vec<BraggPeak>,
    ) -> Result<(), ClassificationError> {
        let index = self.index(rx, ry)?;
        self.lists[index] = peaks;
        Ok(())
    }

    /// Total number of peaks over all scan positions
    pub fn num_peaks(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    fn index(&self, rx: usize, ry: usize) -> Result<usize, ClassificationError> {
        let (nx, ny) = self.shape;
        if rx >= nx || ry >= ny {
            return Err(ClassificationError::ShapeMismatch(format!(
                "Scan position ({}, {}) outside scan grid {}x{}",
                rx, ry, nx, ny
            )));
        }
        Ok(rx * ny + ry)
    }
}

impl PeakSource for PointListArray {
    fn scan_shape(&self) -> (usize, usize) {
        self.shape
    }

    fn point_list(&self, rx: usize, ry: usize) -> &[BraggPeak] {
        &self.lists[rx * self.shape.1 + ry]
    }
}
