//! Detector facade: fit / decision_function / predict, plus the batch
//! scorer that turns reconstructions into index-aligned anomaly scores.

use anyhow::Result;
use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use log::{debug, info};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::AutoEncoderConfig;
use crate::dataset::{check_feature_matrix, Batch, TabularDataset};
use crate::error::DetectorError;
use crate::network::{Activation, AutoEncoderNet};
use crate::preprocessing::{fit_scaler, Scaler};
use crate::stats::{rowwise_euclidean, threshold_scores};
use crate::trainer::{restore_model, train_autoencoder, TrainOptions};

/// Reconstruction-based anomaly detector.
///
/// Learns a compressed representation of the training data with a symmetric
/// autoencoder; samples that reconstruct poorly receive high anomaly scores.
/// The assumed contamination fraction converts scores into binary labels.
pub struct AutoEncoder {
    config: AutoEncoderConfig,
    state: Option<FittedState>,
}

/// Everything owned by a fitted detector. Replaced wholesale on refit.
struct FittedState {
    net: AutoEncoderNet,
    scaler: Option<Scaler>,
    n_features: usize,
    decision_scores: Vec<f32>,
    threshold: f32,
    labels: Vec<u8>,
    best_loss: f32,
}

impl AutoEncoder {
    pub fn new(config: AutoEncoderConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AutoEncoderConfig::default())
    }

    pub fn config(&self) -> &AutoEncoderConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Fit the detector on `x`.
    ///
    /// Builds a fresh network, trains it, restores the best epoch snapshot,
    /// scores the training data and derives the outlier threshold. A
    /// previously fitted state is only replaced once the whole pipeline has
    /// succeeded, so a failed refit leaves the old model usable.
    pub fn fit(&mut self, x: &Array2<f32>) -> Result<&mut Self> {
        self.config.validate()?;
        check_feature_matrix(x)?;

        let (n_samples, n_features) = x.dim();
        let device = self.config.device.to_device()?;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let scaler = if self.config.preprocessing {
            Some(fit_scaler(x))
        } else {
            None
        };
        let dataset = TabularDataset::new(x.clone(), scaler.clone());

        let activation = Activation::from_name(&self.config.hidden_activation)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut net = AutoEncoderNet::new(
            n_features,
            &self.config.hidden_neurons,
            activation,
            self.config.dropout_rate,
            self.config.batch_norm,
            vb,
            device,
        )?;
        debug!("{:?}", net);
        info!(
            "fitting autoencoder on {} samples with {} features",
            n_samples, n_features
        );

        net.set_training_mode();
        let opts = TrainOptions {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            learning_rate: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            loss: self.config.loss,
        };
        let outcome = train_autoencoder(&net, &varmap, &dataset, &opts, &mut rng)?;
        restore_model(&net, &varmap, &outcome.best_state)?;
        net.set_evaluation_mode();
        info!(
            "training done; best epoch {} with mean loss {}",
            outcome.best_epoch, outcome.best_loss
        );

        let decision_scores = score_dataset(&net, &dataset, self.config.batch_size)?;
        let (threshold, labels) = threshold_scores(&decision_scores, self.config.contamination);

        self.state = Some(FittedState {
            net,
            scaler,
            n_features,
            decision_scores,
            threshold,
            labels,
            best_loss: outcome.best_loss,
        });
        Ok(self)
    }

    /// Raw anomaly scores for `x`, one per row, higher = more anomalous.
    /// Requires a fitted detector; `x` must have the fit-time feature width.
    pub fn decision_function(&self, x: &Array2<f32>) -> Result<Vec<f32>> {
        let state = self.fitted_state()?;
        check_feature_matrix(x)?;
        if x.ncols() != state.n_features {
            return Err(DetectorError::InputShape(format!(
                "expected {} features, got {}",
                state.n_features,
                x.ncols()
            ))
            .into());
        }
        let dataset = TabularDataset::new(x.clone(), state.scaler.clone());
        score_dataset(&state.net, &dataset, self.config.batch_size)
    }

    /// Binary outlier labels for `x` (1 = outlier) using the fitted
    /// threshold.
    pub fn predict(&self, x: &Array2<f32>) -> Result<Vec<u8>> {
        let threshold = self.fitted_state()?.threshold;
        let scores = self.decision_function(x)?;
        Ok(scores.iter().map(|&s| u8::from(s > threshold)).collect())
    }

    /// Anomaly scores of the training samples, index-aligned with the
    /// fit-time matrix.
    pub fn decision_scores(&self) -> Option<&[f32]> {
        self.state.as_ref().map(|s| s.decision_scores.as_slice())
    }

    /// Score threshold separating inliers from outliers.
    pub fn threshold(&self) -> Option<f32> {
        self.state.as_ref().map(|s| s.threshold)
    }

    /// Binary labels of the training samples (1 = outlier).
    pub fn labels(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|s| s.labels.as_slice())
    }

    /// Mean training loss of the best epoch.
    pub fn best_loss(&self) -> Option<f32> {
        self.state.as_ref().map(|s| s.best_loss)
    }

    /// Fit-time normalization statistics, when preprocessing is enabled.
    pub fn scaler(&self) -> Option<&Scaler> {
        self.state.as_ref().and_then(|s| s.scaler.as_ref())
    }

    pub fn n_features(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.n_features)
    }

    fn fitted_state(&self) -> Result<&FittedState, DetectorError> {
        self.state.as_ref().ok_or_else(|| {
            DetectorError::NotFitted(
                "detector has no trained model; call fit before scoring".to_string(),
            )
        })
    }
}

/// Score every sample in the dataset. Batches iterate in original row order.
pub fn score_dataset(
    net: &AutoEncoderNet,
    dataset: &TabularDataset,
    batch_size: usize,
) -> Result<Vec<f32>> {
    score_batches(net, &dataset.ordered_batches(batch_size), dataset.len())
}

/// Reconstruction error per sample over an arbitrary batch sequence.
///
/// Each per-row distance is written into the output at the row's original
/// index, so the result is independent of batching and shuffle order. The
/// network is expected to be in evaluation mode with its best snapshot
/// installed.
pub fn score_batches(net: &AutoEncoderNet, batches: &[Batch], n_samples: usize) -> Result<Vec<f32>> {
    let mut scores = vec![0.0f32; n_samples];
    for batch in batches {
        let input = batch.to_tensor(net.device())?;
        let reconstruction = net.forward(&input)?;
        let distances = rowwise_euclidean(&input, &reconstruction)?;
        for (&idx, &dist) in batch.indices.iter().zip(distances.iter()) {
            scores[idx] = dist;
        }
    }
    Ok(scores)
}
