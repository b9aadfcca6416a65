use std::time::Instant;

use log::{info, warn};
use ndarray::{s, Array3, ArrayBase, ArrayView2, ArrayView3, ArrayViewMut2, Axis, Data, Ix4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::ClassificationError;
use super::utils::{first_missing_label, group_labels};
use crate::runtime::{create_thread_pool, RuntimeConfig};

/// Provides one diffraction pattern per scan position of a 4D data cube.
pub trait DiffractionStack {
    /// Returns the scan grid dimensions as `(Rx, Ry)`
    fn scan_shape(&self) -> (usize, usize);

    /// Returns the diffraction pattern dimensions as `(Qx, Qy)`
    fn detector_shape(&self) -> (usize, usize);

    /// Returns the `[Qx, Qy]` pattern recorded at `(rx, ry)`
    fn pattern(&self, rx: usize, ry: usize) -> ArrayView2<'_, f32>;
}

impl<S> DiffractionStack for ArrayBase<S, Ix4>
where
    S: Data<Elem = f32>,
{
    fn scan_shape(&self) -> (usize, usize) {
        let (rx, ry, _, _) = self.dim();
        (rx, ry)
    }

    fn detector_shape(&self) -> (usize, usize) {
        let (_, _, qx, qy) = self.dim();
        (qx, qy)
    }

    fn pattern(&self, rx: usize, ry: usize) -> ArrayView2<'_, f32> {
        self.slice(s![rx, ry, .., ..])
    }
}

/// How to treat a label below `max(labels)` that no scan position carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyClusterPolicy {
    /// Fail with [`ClassificationError::EmptyCluster`]
    #[default]
    Error,
    /// Leave the class image as zeros and log a warning
    Zero,
}

/// Mean diffraction pattern of every cluster plus its member count.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassImages {
    images: Array3<f32>,
    counts: Vec<usize>,
}

impl ClassImages {
    /// All class images, shaped `[Qx, Qy, n_clusters]`
    pub fn images(&self) -> ArrayView3<'_, f32> {
        self.images.view()
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn n_clusters(&self) -> usize {
        self.counts.len()
    }

    /// Mean pattern of cluster `n`
    pub fn image(&self, n: usize) -> Option<ArrayView2<'_, f32>> {
        (n < self.n_clusters()).then(|| self.images.index_axis(Axis(2), n))
    }

    pub fn into_parts(self) -> (Array3<f32>, Vec<usize>) {
        (self.images, self.counts)
    }
}

/// Averages diffraction patterns by cluster label for visual inspection of
/// clustering results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassAverager {
    empty_cluster_policy: EmptyClusterPolicy,
    runtime_config: RuntimeConfig,
}

impl ClassAverager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_empty_cluster_policy(mut self, policy: EmptyClusterPolicy) -> Self {
        self.empty_cluster_policy = policy;
        self
    }

    pub fn with_runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.runtime_config = config;
        self
    }

    /// Computes the mean pattern of each cluster.
    ///
    /// `labels` holds one cluster index per scan position, row-major over the
    /// scan grid (`rx * Ry + ry`). The number of clusters is `max(labels) + 1`.
    ///
    /// # Errors
    /// * `InvalidConfiguration` if `labels` is empty
    /// * `ShapeMismatch` if `labels.len() != Rx * Ry`
    /// * `EmptyCluster` if a label below the maximum has no members and the
    ///   policy is [`EmptyClusterPolicy::Error`]
    /// * `InvalidConfiguration` if `max(labels) + 1` clusters of `Qx * Qy`
    ///   pixels cannot be addressed
    pub fn average<D>(
        &self,
        stack: &D,
        labels: &[usize],
    ) -> Result<ClassImages, ClassificationError>
    where
        D: DiffractionStack + Sync + ?Sized,
    {
        let start = Instant::now();
        let (nx, ny) = stack.scan_shape();
        let (qx, qy) = stack.detector_shape();

        if labels.is_empty() {
            return Err(ClassificationError::InvalidConfiguration(
                "At least one label is required to derive the clusters".to_string(),
            ));
        }
        if labels.len() != nx * ny {
            return Err(ClassificationError::ShapeMismatch(format!(
                "Got {} labels for a {}x{} scan grid",
                labels.len(),
                nx,
                ny
            )));
        }

        let n_clusters = self.validate_labels(labels, qx * qy)?;
        let members = group_labels(labels, n_clusters);
        let counts: Vec<usize> = members.iter().map(Vec::len).collect();
        for (label, _) in counts.iter().enumerate().filter(|(_, &count)| count == 0) {
            match self.empty_cluster_policy {
                EmptyClusterPolicy::Error => {
                    return Err(ClassificationError::EmptyCluster { label });
                }
                EmptyClusterPolicy::Zero => {
                    warn!("Cluster {} has no members, leaving its image empty", label);
                }
            }
        }

        let mut images = Array3::<f32>::zeros((qx, qy, n_clusters));
        if self.runtime_config.is_serial() {
            for (n, slice) in images.axis_iter_mut(Axis(2)).enumerate() {
                average_cluster(stack, &members[n], slice);
            }
        } else {
            let pool = create_thread_pool(&self.runtime_config)?;
            let mut fill = || {
                images
                    .axis_iter_mut(Axis(2))
                    .into_par_iter()
                    .enumerate()
                    .for_each(|(n, slice)| average_cluster(stack, &members[n], slice))
            };
            match pool {
                Some(pool) => pool.install(fill),
                None => fill(),
            }
        }

        info!(
            "Averaged {} patterns into {} class images (took {:.2?})",
            labels.len(),
            counts.len(),
            start.elapsed()
        );
        Ok(ClassImages { images, counts })
    }

    /// Returns the cluster count, rejecting label sets whose class images
    /// could not be allocated before anything is allocated for them.
    fn validate_labels(
        &self,
        labels: &[usize],
        pixels: usize,
    ) -> Result<usize, ClassificationError> {
        let max = labels.iter().copied().max().unwrap_or(0);
        let n_clusters = max.checked_add(1).ok_or_else(|| {
            ClassificationError::InvalidConfiguration(format!(
                "Label {} leaves no room for a cluster count",
                max
            ))
        })?;

        // With more clusters than positions some label below the maximum is unused
        if self.empty_cluster_policy == EmptyClusterPolicy::Error && max >= labels.len() {
            if let Some(label) = first_missing_label(labels) {
                return Err(ClassificationError::EmptyCluster { label });
            }
        }

        let elements = n_clusters.checked_mul(pixels);
        if elements.map_or(true, |n| n > isize::MAX as usize / std::mem::size_of::<f32>()) {
            return Err(ClassificationError::InvalidConfiguration(format!(
                "{} class images of {} pixels exceed the addressable size",
                n_clusters, pixels
            )));
        }
        Ok(n_clusters)
    }
}

fn average_cluster<D>(stack: &D, members: &[usize], mut slice: ArrayViewMut2<'_, f32>)
where
    D: DiffractionStack + ?Sized,
{
    if members.is_empty() {
        return;
    }
    let (_, ny) = stack.scan_shape();
    for &i in members {
        slice += &stack.pattern(i / ny, i % ny);
    }
    slice /= members.len() as f32;
}

/// Averages `stack` by `labels` with the default policy, failing on empty clusters.
pub fn class_images<D>(stack: &D, labels: &[usize]) -> Result<ClassImages, ClassificationError>
where
    D: DiffractionStack + Sync + ?Sized,
{
    ClassAverager::new().average(stack, labels)
}
