use candle_core::{Device, Tensor};
use candle_nn::loss;
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::network::Activation;

/// Compute target the model is placed on, for both training and inference.
///
/// Selection is explicit configuration; the crate never probes hardware on
/// its own, so behavior stays deterministic and testable.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl Default for ComputeDevice {
    fn default() -> Self {
        ComputeDevice::Cpu
    }
}

impl ComputeDevice {
    pub fn to_device(&self) -> anyhow::Result<Device> {
        Ok(match self {
            ComputeDevice::Cpu => Device::Cpu,
            ComputeDevice::Cuda(ordinal) => Device::new_cuda(*ordinal)?,
            ComputeDevice::Metal(ordinal) => Device::new_metal(*ordinal)?,
        })
    }
}

/// Reconstruction loss minimized during training.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionLoss {
    MeanSquaredError,
    MeanAbsoluteError,
}

impl ReconstructionLoss {
    pub fn compute(
        &self,
        reconstruction: &Tensor,
        target: &Tensor,
    ) -> candle_core::Result<Tensor> {
        match self {
            ReconstructionLoss::MeanSquaredError => loss::mse(reconstruction, target),
            ReconstructionLoss::MeanAbsoluteError => (reconstruction - target)?.abs()?.mean_all(),
        }
    }
}

/// Central configuration for the autoencoder detector.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AutoEncoderConfig {
    /// Hidden-layer widths of the encoder; the decoder mirrors them in
    /// reverse, widening back to the input width.
    pub hidden_neurons: Vec<usize>,
    /// Name of the hidden-layer nonlinearity, resolved when the network is
    /// built. Unknown names fail fast with a configuration error.
    pub hidden_activation: String,
    /// Insert a batch-norm layer in front of every linear transform.
    pub batch_norm: bool,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub dropout_rate: f32,
    pub weight_decay: f64,
    /// Standardize inputs with fit-time mean/std before they reach the model.
    /// The same statistics are reused verbatim at predict time.
    pub preprocessing: bool,
    pub loss: ReconstructionLoss,
    /// Assumed fraction of outliers in the training data, in (0, 1). Drives
    /// the score threshold derived at the end of fit.
    pub contamination: f64,
    pub device: ComputeDevice,
    /// Seeds mini-batch shuffling. Parameter initialization uses the tensor
    /// backend's default initializer.
    pub seed: Option<u64>,
}

impl Default for AutoEncoderConfig {
    fn default() -> Self {
        Self {
            hidden_neurons: vec![128, 64],
            hidden_activation: "relu".to_string(),
            batch_norm: true,
            learning_rate: 1e-3,
            epochs: 100,
            batch_size: 32,
            dropout_rate: 0.2,
            weight_decay: 1e-5,
            preprocessing: true,
            loss: ReconstructionLoss::MeanSquaredError,
            contamination: 0.1,
            device: ComputeDevice::Cpu,
            seed: None,
        }
    }
}

impl AutoEncoderConfig {
    /// Reject invalid settings before any model state is touched.
    pub fn validate(&self) -> Result<(), DetectorError> {
        if self.hidden_neurons.is_empty() {
            return Err(DetectorError::Configuration(
                "hidden_neurons must not be empty".to_string(),
            ));
        }
        if self.hidden_neurons.iter().any(|&w| w == 0) {
            return Err(DetectorError::Configuration(
                "hidden-layer widths must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DetectorError::Configuration(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(DetectorError::Configuration(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.epochs == 0 {
            return Err(DetectorError::Configuration(
                "epochs must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DetectorError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination < 1.0) {
            return Err(DetectorError::Configuration(format!(
                "contamination must lie in (0, 1), got {}",
                self.contamination
            )));
        }
        Activation::from_name(&self.hidden_activation)?;
        Ok(())
    }
}
