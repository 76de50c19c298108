//! Symmetric encoder/decoder network built from a layer-width specification.

use anyhow::Result;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{linear, ops, Dropout, Init, Linear, Module, VarBuilder};
use std::fmt;

use crate::error::DetectorError;

/// Hidden-layer nonlinearity, resolved once from the configured name when
/// the network is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    LeakyRelu,
    Sigmoid,
    Tanh,
    Identity,
}

impl Activation {
    /// Resolve a configured activation name. Unknown names fail before any
    /// network is constructed.
    pub fn from_name(name: &str) -> Result<Self, DetectorError> {
        match name {
            "relu" => Ok(Activation::Relu),
            "leaky_relu" => Ok(Activation::LeakyRelu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "identity" | "linear" => Ok(Activation::Identity),
            other => Err(DetectorError::Configuration(format!(
                "unknown activation: {}",
                other
            ))),
        }
    }

    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Relu => xs.relu(),
            Activation::LeakyRelu => ops::leaky_relu(xs, 0.01),
            Activation::Sigmoid => ops::sigmoid(xs),
            Activation::Tanh => xs.tanh(),
            Activation::Identity => Ok(xs.clone()),
        }
    }
}

/// Batch normalization over the feature axis with a trainable scale/shift.
///
/// Training mode normalizes with per-batch statistics and folds them into
/// the running estimates; evaluation mode normalizes with the running
/// estimates only. The running statistics live in layer-owned `Var`s so the
/// trainer can include them in parameter snapshots.
struct BatchNorm1d {
    weight: Tensor,
    bias: Tensor,
    running_mean: Var,
    running_var: Var,
    eps: f64,
    momentum: f64,
}

impl BatchNorm1d {
    fn new(num_features: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let weight = vb.get_with_hints(num_features, "weight", Init::Const(1.))?;
        let bias = vb.get_with_hints(num_features, "bias", Init::Const(0.))?;
        let running_mean = Var::zeros(num_features, DType::F32, vb.device())?;
        let running_var = Var::ones(num_features, DType::F32, vb.device())?;
        Ok(Self {
            weight,
            bias,
            running_mean,
            running_var,
            eps: 1e-5,
            momentum: 0.1,
        })
    }

    fn forward(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let normed = if train {
            let mean = xs.mean_keepdim(0)?;
            let centered = xs.broadcast_sub(&mean)?;
            let var = centered.sqr()?.mean_keepdim(0)?;

            // Fold the batch statistics into the running estimates, outside
            // the autograd graph.
            let new_mean = ((self.running_mean.as_tensor() * (1.0 - self.momentum))?
                + (mean.flatten_all()?.detach() * self.momentum)?)?;
            self.running_mean.set(&new_mean)?;
            let new_var = ((self.running_var.as_tensor() * (1.0 - self.momentum))?
                + (var.flatten_all()?.detach() * self.momentum)?)?;
            self.running_var.set(&new_var)?;

            centered.broadcast_div(&(var + self.eps)?.sqrt()?)?
        } else {
            let centered = xs.broadcast_sub(self.running_mean.as_tensor())?;
            let denom = (self.running_var.as_tensor() + self.eps)?.sqrt()?;
            centered.broadcast_div(&denom)?
        };
        normed
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// One stage of the encoder or decoder stack: optional batch-norm on the
/// incoming width, a linear transform, the activation, then dropout.
struct LayerBlock {
    norm: Option<BatchNorm1d>,
    linear: Linear,
    activation: Activation,
    dropout: Dropout,
}

impl LayerBlock {
    fn new(
        in_features: usize,
        out_features: usize,
        activation: Activation,
        dropout_rate: f32,
        with_norm: bool,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let norm = if with_norm {
            Some(BatchNorm1d::new(in_features, vb.pp("norm"))?)
        } else {
            None
        };
        let linear = linear(in_features, out_features, vb.pp("linear"))?;
        Ok(Self {
            norm,
            linear,
            activation,
            dropout: Dropout::new(dropout_rate),
        })
    }

    fn forward(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        if let Some(norm) = &self.norm {
            x = norm.forward(&x, train)?;
        }
        x = self.linear.forward(&x)?;
        x = self.activation.forward(&x)?;
        self.dropout.forward(&x, train)
    }

    fn stat_vars(&self) -> Vec<(&'static str, &Var)> {
        match &self.norm {
            Some(norm) => vec![
                ("running_mean", &norm.running_mean),
                ("running_var", &norm.running_var),
            ],
            None => Vec::new(),
        }
    }
}

/// Mirrored encoder/decoder network. The encoder narrows from the input
/// width through `hidden_neurons`; the decoder runs the reversed sequence
/// back to the input width, so reconstructions always match the input
/// dimensionality.
pub struct AutoEncoderNet {
    widths: Vec<usize>,
    encoder: Vec<LayerBlock>,
    decoder: Vec<LayerBlock>,
    device: Device,
    is_training: bool,
}

impl AutoEncoderNet {
    /// Build both stacks with freshly initialized parameters registered in
    /// the `VarBuilder`'s variable map.
    pub fn new(
        n_features: usize,
        hidden_neurons: &[usize],
        activation: Activation,
        dropout_rate: f32,
        with_batch_norm: bool,
        vb: VarBuilder,
        device: Device,
    ) -> Result<Self> {
        if n_features == 0 {
            return Err(DetectorError::Configuration(
                "n_features must be positive".to_string(),
            )
            .into());
        }
        if hidden_neurons.is_empty() || hidden_neurons.iter().any(|&w| w == 0) {
            return Err(DetectorError::Configuration(
                "hidden_neurons must be a non-empty sequence of positive widths".to_string(),
            )
            .into());
        }
        if !(0.0..1.0).contains(&dropout_rate) {
            return Err(DetectorError::Configuration(format!(
                "dropout_rate must be in [0, 1), got {}",
                dropout_rate
            ))
            .into());
        }

        let mut widths = Vec::with_capacity(hidden_neurons.len() + 1);
        widths.push(n_features);
        widths.extend_from_slice(hidden_neurons);

        let enc_vb = vb.pp("encoder");
        let mut encoder = Vec::with_capacity(widths.len() - 1);
        for (idx, pair) in widths.windows(2).enumerate() {
            encoder.push(LayerBlock::new(
                pair[0],
                pair[1],
                activation,
                dropout_rate,
                with_batch_norm,
                enc_vb.pp(idx),
            )?);
        }

        let decoder_widths: Vec<usize> = widths.iter().rev().copied().collect();
        let dec_vb = vb.pp("decoder");
        let mut decoder = Vec::with_capacity(decoder_widths.len() - 1);
        for (idx, pair) in decoder_widths.windows(2).enumerate() {
            decoder.push(LayerBlock::new(
                pair[0],
                pair[1],
                activation,
                dropout_rate,
                with_batch_norm,
                dec_vb.pp(idx),
            )?);
        }

        Ok(Self {
            widths,
            encoder,
            decoder,
            device,
            is_training: true,
        })
    }

    /// Full reconstruction pass: decoder(encoder(input)).
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let latent = self.encode(xs)?;
        self.decode(&latent)
    }

    /// Latent/bottleneck representation of the input.
    pub fn encode(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        for block in &self.encoder {
            x = block.forward(&x, self.is_training)?;
        }
        Ok(x)
    }

    pub fn decode(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        for block in &self.decoder {
            x = block.forward(&x, self.is_training)?;
        }
        Ok(x)
    }

    /// Disable dropout and batch-norm statistics updates for inference.
    pub fn set_evaluation_mode(&mut self) {
        self.is_training = false;
    }

    /// Enable dropout and batch-norm statistics updates for training.
    pub fn set_training_mode(&mut self) {
        self.is_training = true;
    }

    /// Batch-norm running statistics, named by their position in the stack.
    /// They are not optimizer-managed, so the trainer snapshots them
    /// alongside the variable map.
    pub fn stat_vars(&self) -> Vec<(String, Var)> {
        let mut out = Vec::new();
        for (stack, blocks) in [("encoder", &self.encoder), ("decoder", &self.decoder)] {
            for (idx, block) in blocks.iter().enumerate() {
                for (name, var) in block.stat_vars() {
                    out.push((format!("{}.{}.norm.{}", stack, idx, name), var.clone()));
                }
            }
        }
        out
    }

    /// Encoder width sequence, `[n_features, hidden...]`.
    pub fn encoder_widths(&self) -> &[usize] {
        &self.widths
    }

    /// Decoder width sequence, the exact reverse of the encoder's.
    pub fn decoder_widths(&self) -> Vec<usize> {
        self.widths.iter().rev().copied().collect()
    }

    pub fn n_features(&self) -> usize {
        self.widths[0]
    }

    pub fn bottleneck(&self) -> usize {
        self.widths[self.widths.len() - 1]
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl fmt::Debug for AutoEncoderNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AutoEncoderNet(")?;
        for (idx, pair) in self.widths.windows(2).enumerate() {
            writeln!(f, "  (encoder.{}): {} -> {}", idx, pair[0], pair[1])?;
        }
        let decoder_widths = self.decoder_widths();
        for (idx, pair) in decoder_widths.windows(2).enumerate() {
            writeln!(f, "  (decoder.{}): {} -> {}", idx, pair[0], pair[1])?;
        }
        write!(f, ")")
    }
}
