//! Dataset wrapper feeding mini-batches of (transformed row, original index)
//! pairs to the trainer and the scorer.

use anyhow::Result;
use candle_core::{Device, Tensor};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::DetectorError;
use crate::preprocessing::Scaler;

/// Validate a feature matrix before it reaches the model.
pub fn check_feature_matrix(x: &Array2<f32>) -> Result<(), DetectorError> {
    let (nrows, ncols) = x.dim();
    if nrows == 0 || ncols == 0 {
        return Err(DetectorError::InputShape(format!(
            "expected a non-empty matrix, got {}x{}",
            nrows, ncols
        )));
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(DetectorError::InputShape(
            "matrix contains NaN or infinite values".to_string(),
        ));
    }
    Ok(())
}

/// In-memory dataset over a feature matrix with optional standardization.
///
/// The transform is applied per access; the wrapped matrix is never
/// modified, so the same dataset can be iterated any number of times.
pub struct TabularDataset {
    x: Array2<f32>,
    scaler: Option<Scaler>,
}

impl TabularDataset {
    pub fn new(x: Array2<f32>, scaler: Option<Scaler>) -> Self {
        Self { x, scaler }
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Row `idx` after standardization (when enabled), paired with its
    /// original row index.
    pub fn get(&self, idx: usize) -> (Vec<f32>, usize) {
        let row = self.x.row(idx);
        let sample = match &self.scaler {
            Some(scaler) => scaler.transform_row(row),
            None => row.to_vec(),
        };
        (sample, idx)
    }

    /// Batches in original row order. Used for scoring.
    pub fn ordered_batches(&self, batch_size: usize) -> Vec<Batch> {
        self.batches_from((0..self.len()).collect(), batch_size)
    }

    /// Batches over a shuffled permutation of rows. Used for training.
    pub fn shuffled_batches(&self, batch_size: usize, rng: &mut StdRng) -> Vec<Batch> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        self.batches_from(indices, batch_size)
    }

    fn batches_from(&self, indices: Vec<usize>, batch_size: usize) -> Vec<Batch> {
        let batch_size = batch_size.max(1);
        indices
            .chunks(batch_size)
            .map(|chunk| {
                let mut rows = Vec::with_capacity(chunk.len() * self.n_features());
                for &idx in chunk {
                    let (sample, _) = self.get(idx);
                    rows.extend_from_slice(&sample);
                }
                Batch {
                    rows,
                    indices: chunk.to_vec(),
                    n_features: self.n_features(),
                }
            })
            .collect()
    }
}

/// One mini-batch of transformed rows plus their original row indices.
/// A trailing batch may be shorter than the configured batch size.
pub struct Batch {
    rows: Vec<f32>,
    pub indices: Vec<usize>,
    n_features: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Materialize the batch as a `(len, n_features)` f32 tensor on `device`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(
            &self.rows,
            (self.indices.len(), self.n_features),
            device,
        )?)
    }
}
