//! End-to-end tests for the detector facade: fit, scoring, thresholding,
//! snapshot restoration and the fitted-state machine.

use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use ndarray::Array2;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use recon_detect::dataset::TabularDataset;
use recon_detect::detector::{score_batches, AutoEncoder};
use recon_detect::error::DetectorError;
use recon_detect::network::{Activation, AutoEncoderNet};
use recon_detect::trainer::{restore_model, snapshot_model, train_autoencoder, TrainOptions};
use recon_detect::{AutoEncoderConfig, ReconstructionLoss};

fn quick_config() -> AutoEncoderConfig {
    AutoEncoderConfig {
        hidden_neurons: vec![4, 2],
        epochs: 3,
        batch_size: 16,
        batch_norm: false,
        seed: Some(1),
        ..AutoEncoderConfig::default()
    }
}

fn gaussian_matrix(nrows: usize, ncols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    Array2::from_shape_fn((nrows, ncols), |_| normal.sample(&mut rng))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[test]
fn decision_function_before_fit_is_a_not_fitted_error() {
    let detector = AutoEncoder::new(quick_config());
    assert!(!detector.is_fitted());

    let x = gaussian_matrix(10, 4, 3);
    let err = detector.decision_function(&x).unwrap_err();
    let typed = err.downcast_ref::<DetectorError>().expect("typed error");
    assert!(matches!(typed, DetectorError::NotFitted(_)));

    let err = detector.predict(&x).unwrap_err();
    let typed = err.downcast_ref::<DetectorError>().expect("typed error");
    assert!(matches!(typed, DetectorError::NotFitted(_)));
}

#[test]
fn bad_activation_fails_before_training() {
    let config = AutoEncoderConfig {
        hidden_activation: "swish".to_string(),
        ..quick_config()
    };
    let mut detector = AutoEncoder::new(config);
    let err = detector.fit(&gaussian_matrix(10, 4, 3)).unwrap_err();
    let typed = err.downcast_ref::<DetectorError>().expect("typed error");
    assert!(matches!(typed, DetectorError::Configuration(_)));
    assert!(!detector.is_fitted());
}

#[test]
fn feature_width_mismatch_is_an_input_shape_error() {
    let mut detector = AutoEncoder::new(quick_config());
    detector.fit(&gaussian_matrix(30, 5, 11)).unwrap();

    let err = detector
        .decision_function(&gaussian_matrix(10, 4, 12))
        .unwrap_err();
    let typed = err.downcast_ref::<DetectorError>().expect("typed error");
    assert!(matches!(typed, DetectorError::InputShape(_)));
}

#[test]
fn refit_replaces_all_prior_state() {
    let mut detector = AutoEncoder::new(quick_config());
    detector.fit(&gaussian_matrix(30, 5, 21)).unwrap();
    assert_eq!(detector.n_features(), Some(5));

    detector.fit(&gaussian_matrix(30, 3, 22)).unwrap();
    assert_eq!(detector.n_features(), Some(3));

    // The old feature width is gone with the old model.
    assert!(detector.decision_function(&gaussian_matrix(8, 5, 23)).is_err());
    let scores = detector
        .decision_function(&gaussian_matrix(8, 3, 24))
        .unwrap();
    assert_eq!(scores.len(), 8);
}

// ---------------------------------------------------------------------------
// Scoring contracts
// ---------------------------------------------------------------------------

#[test]
fn decision_function_returns_one_score_per_row() {
    let mut detector = AutoEncoder::new(quick_config());
    detector.fit(&gaussian_matrix(40, 6, 31)).unwrap();

    for n in [1usize, 7, 40] {
        let scores = detector
            .decision_function(&gaussian_matrix(n, 6, 32))
            .unwrap();
        assert_eq!(scores.len(), n);
    }
}

#[test]
fn scores_are_independent_of_batch_order() {
    let x = gaussian_matrix(25, 6, 41);
    let dataset = TabularDataset::new(x, None);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &candle_core::Device::Cpu);
    let mut net = AutoEncoderNet::new(
        6,
        &[4, 2],
        Activation::Relu,
        0.2,
        true,
        vb,
        candle_core::Device::Cpu,
    )
    .unwrap();
    net.set_evaluation_mode();

    let ordered = score_batches(&net, &dataset.ordered_batches(4), dataset.len()).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let shuffled = score_batches(&net, &dataset.shuffled_batches(7, &mut rng), dataset.len())
        .unwrap();

    assert_eq!(ordered.len(), shuffled.len());
    for (a, b) in ordered.iter().zip(shuffled.iter()) {
        assert!((a - b).abs() < 1e-6, "scores diverged: {} vs {}", a, b);
    }
}

#[test]
fn normalization_stats_are_reused_at_predict_time() {
    let x = gaussian_matrix(40, 5, 51);
    let mut detector = AutoEncoder::new(quick_config());
    detector.fit(&x).unwrap();

    let scaler_before = detector.scaler().cloned().expect("preprocessing enabled");
    let scores = detector.decision_function(&x).unwrap();
    let scaler_after = detector.scaler().cloned().expect("preprocessing enabled");

    // Scoring must not refit the stats.
    assert_eq!(scaler_before, scaler_after);

    // Re-scoring the training matrix through the same stats and the same
    // evaluation-mode network reproduces the fit-time scores.
    let fit_scores = detector.decision_scores().unwrap();
    assert_eq!(scores.len(), fit_scores.len());
    for (a, b) in scores.iter().zip(fit_scores.iter()) {
        assert!((a - b).abs() < 1e-5, "scores diverged: {} vs {}", a, b);
    }
}

// ---------------------------------------------------------------------------
// Training loop
// ---------------------------------------------------------------------------

#[test]
fn best_snapshot_tracks_the_minimum_epoch_loss() {
    let x = gaussian_matrix(40, 4, 61);
    let dataset = TabularDataset::new(x, None);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &candle_core::Device::Cpu);
    let net = AutoEncoderNet::new(
        4,
        &[3, 2],
        Activation::Relu,
        0.0,
        false,
        vb,
        candle_core::Device::Cpu,
    )
    .unwrap();

    let opts = TrainOptions {
        epochs: 6,
        batch_size: 8,
        learning_rate: 1e-3,
        weight_decay: 1e-5,
        loss: ReconstructionLoss::MeanSquaredError,
    };
    let mut rng = StdRng::seed_from_u64(62);
    let outcome = train_autoencoder(&net, &varmap, &dataset, &opts, &mut rng).unwrap();

    assert_eq!(outcome.epoch_losses.len(), 6);

    // The recorded best is exactly the minimum of the per-epoch means.
    let min_loss = outcome
        .epoch_losses
        .iter()
        .copied()
        .fold(f32::INFINITY, f32::min);
    assert_eq!(outcome.best_loss, min_loss);
    assert_eq!(outcome.epoch_losses[outcome.best_epoch], outcome.best_loss);

    // Ties go to the later epoch, so nothing after best_epoch can match it.
    assert!(outcome.epoch_losses[outcome.best_epoch + 1..]
        .iter()
        .all(|&l| l > outcome.best_loss));

    // Restoring the snapshot puts exactly those parameters back.
    restore_model(&net, &varmap, &outcome.best_state).unwrap();
    let restored = snapshot_model(&net, &varmap).unwrap();
    assert_eq!(restored.len(), outcome.best_state.len());
    for (name, tensor) in restored {
        let expected = outcome.best_state[&name]
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let actual = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(expected, actual, "parameter {} diverged", name);
    }
}

#[test]
fn snapshot_includes_batch_norm_statistics() {
    let x = gaussian_matrix(32, 4, 81);
    let dataset = TabularDataset::new(x, None);

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &candle_core::Device::Cpu);
    let net = AutoEncoderNet::new(
        4,
        &[2],
        Activation::Relu,
        0.0,
        true,
        vb,
        candle_core::Device::Cpu,
    )
    .unwrap();

    let opts = TrainOptions {
        epochs: 2,
        batch_size: 8,
        learning_rate: 1e-3,
        weight_decay: 0.0,
        loss: ReconstructionLoss::MeanSquaredError,
    };
    let mut rng = StdRng::seed_from_u64(82);
    let outcome = train_autoencoder(&net, &varmap, &dataset, &opts, &mut rng).unwrap();

    assert!(outcome
        .best_state
        .contains_key("encoder.0.norm.running_mean"));
    assert!(outcome.best_state.contains_key("decoder.0.norm.running_var"));
}

// ---------------------------------------------------------------------------
// End-to-end scenario
// ---------------------------------------------------------------------------

#[test]
fn fit_flags_scattered_outliers() {
    let _ = env_logger::builder().is_test(true).try_init();

    let n_inliers = 475;
    let n_outliers = 25;
    let n_features = 10;

    let mut rng = StdRng::seed_from_u64(71);
    let normal = Normal::new(0.0f32, 1.0).unwrap();
    let uniform = Uniform::new(-6.0f32, 6.0);

    let mut data = Vec::with_capacity((n_inliers + n_outliers) * n_features);
    for _ in 0..n_inliers * n_features {
        data.push(normal.sample(&mut rng));
    }
    for _ in 0..n_outliers * n_features {
        data.push(rng.sample(uniform));
    }
    let x = Array2::from_shape_vec((n_inliers + n_outliers, n_features), data).unwrap();

    let config = AutoEncoderConfig {
        hidden_neurons: vec![32, 16],
        epochs: 10,
        batch_size: 32,
        contamination: 0.05,
        seed: Some(72),
        ..AutoEncoderConfig::default()
    };
    let mut detector = AutoEncoder::new(config);
    detector.fit(&x).unwrap();

    let scores = detector.decision_scores().unwrap();
    let labels = detector.labels().unwrap();
    assert_eq!(scores.len(), 500);
    assert_eq!(labels.len(), 500);

    // Roughly the contamination fraction is flagged.
    let flagged = labels.iter().filter(|&&l| l == 1).count();
    assert!(
        (15..=40).contains(&flagged),
        "expected ~25 flagged samples, got {}",
        flagged
    );

    // Flagged samples carry higher anomaly scores than unflagged ones.
    let (mut flagged_sum, mut flagged_n) = (0.0f64, 0usize);
    let (mut clean_sum, mut clean_n) = (0.0f64, 0usize);
    for (score, label) in scores.iter().zip(labels.iter()) {
        if *label == 1 {
            flagged_sum += *score as f64;
            flagged_n += 1;
        } else {
            clean_sum += *score as f64;
            clean_n += 1;
        }
    }
    let flagged_mean = flagged_sum / flagged_n as f64;
    let clean_mean = clean_sum / clean_n as f64;
    assert!(
        flagged_mean > clean_mean,
        "flagged mean {} should exceed unflagged mean {}",
        flagged_mean,
        clean_mean
    );

    // The scattered tail rows should score higher on average than the
    // Gaussian cluster they were mixed into.
    let outlier_mean: f64 =
        scores[n_inliers..].iter().map(|&s| s as f64).sum::<f64>() / n_outliers as f64;
    let inlier_mean: f64 =
        scores[..n_inliers].iter().map(|&s| s as f64).sum::<f64>() / n_inliers as f64;
    assert!(
        outlier_mean > inlier_mean,
        "outlier mean {} should exceed inlier mean {}",
        outlier_mean,
        inlier_mean
    );

    // Fresh data scores through the same fitted model.
    let labels = detector.predict(&gaussian_matrix(20, n_features, 73)).unwrap();
    assert_eq!(labels.len(), 20);
    assert!(labels.iter().all(|&l| l <= 1));
}
