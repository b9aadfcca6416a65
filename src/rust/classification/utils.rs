use ndarray::{Array2, Axis};

/// Scales every row to unit L2 norm; rows with a vanishing norm become zero.
pub(crate) fn normalize_rows(matrix: &Array2<f64>) -> Array2<f64> {
    let mut normalized = matrix.clone();
    for mut row in normalized.axis_iter_mut(Axis(0)) {
        let norm: f64 = row.iter().map(|&x| x * x).sum::<f64>().sqrt();
        if norm > 1e-10 {
            row /= norm;
        } else {
            row.fill(0.0);
        }
    }
    normalized
}

/// Groups label positions by value in one pass; member indices stay in
/// ascending order. Every label must be below `n_clusters`.
pub(crate) fn group_labels(labels: &[usize], n_clusters: usize) -> Vec<Vec<usize>> {
    let mut members = vec![Vec::new(); n_clusters];
    for (i, &label) in labels.iter().enumerate() {
        members[label].push(i);
    }
    members
}

/// Smallest value in `[0, labels.len())` that no label carries, if any.
pub(crate) fn first_missing_label(labels: &[usize]) -> Option<usize> {
    let mut seen = vec![false; labels.len()];
    for &label in labels {
        if label < seen.len() {
            seen[label] = true;
        }
    }
    seen.iter().position(|&present| !present)
}
