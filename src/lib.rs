//! recon-detect: reconstruction-based deep anomaly detection.
//!
//! This crate trains a symmetric autoencoder on tabular data and scores
//! samples by reconstruction error: points the network reconstructs poorly
//! are flagged as outliers via a contamination-driven threshold. Training
//! runs epoch-wise mini-batch gradient descent and keeps the parameter
//! snapshot of the best epoch, which is restored before any scoring.
//!
//! The design favors small, testable modules: dataset iteration, network
//! construction, the training loop and the detector facade are separate
//! pieces wired together by [`AutoEncoder::fit`].

pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod network;
pub mod preprocessing;
pub mod stats;
pub mod trainer;

pub use config::{AutoEncoderConfig, ComputeDevice, ReconstructionLoss};
pub use detector::AutoEncoder;
pub use error::DetectorError;
