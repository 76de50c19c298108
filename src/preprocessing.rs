//! Standardization utilities shared by the dataset and the detector facade.
//!
//! The `Scaler` holds per-feature mean/std fitted once from the training
//! matrix. Rows are transformed per access so the underlying matrix is never
//! modified and the same statistics can be replayed at predict time.

use ndarray::{Array2, ArrayView1};

/// Per-feature mean/std statistics for input standardization.
#[derive(Clone, Debug, PartialEq)]
pub struct Scaler {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f32 = 1e-6;

    /// Standardize a single row: `(row - mean) / std`, elementwise.
    pub fn transform_row(&self, row: ArrayView1<f32>) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Fit a `Scaler` from a matrix where rows are samples and columns are
/// features. Uses the population standard deviation.
pub fn fit_scaler(x: &Array2<f32>) -> Scaler {
    let (nrows, ncols) = x.dim();
    assert!(
        nrows > 0 && ncols > 0,
        "fit_scaler requires a non-empty matrix"
    );

    let nrows_f = nrows as f32;
    let mut mean = vec![0.0f32; ncols];
    for row in x.rows() {
        for (c, v) in row.iter().enumerate() {
            mean[c] += v;
        }
    }
    for v in mean.iter_mut() {
        *v /= nrows_f;
    }

    let mut var = vec![0.0f32; ncols];
    for row in x.rows() {
        for (c, v) in row.iter().enumerate() {
            let d = v - mean[c];
            var[c] += d * d;
        }
    }
    for v in var.iter_mut() {
        *v = (*v / nrows_f).sqrt().max(Scaler::MIN_STD);
    }

    Scaler { mean, std: var }
}
