//! Numeric helpers shared by the trainer and the detector facade.

use anyhow::Result;
use candle_core::Tensor;

/// Compute average and std deviation from a slice of loss values.
pub fn compute_loss_stats(losses: &[f32]) -> (f32, f32) {
    let avg = losses.iter().copied().sum::<f32>() / losses.len() as f32;
    let std = (losses.iter().map(|l| (l - avg).powi(2)).sum::<f32>() / losses.len() as f32).sqrt();
    (avg, std)
}

/// Per-row Euclidean distance between two row-aligned matrices of equal
/// shape. Returns one distance per row rather than a full pairwise matrix,
/// so the cost stays linear in the number of rows.
pub fn rowwise_euclidean(a: &Tensor, b: &Tensor) -> Result<Vec<f32>> {
    let diff = (a - b)?;
    let dists = diff.sqr()?.sum(1)?.sqrt()?;
    Ok(dists.to_vec1::<f32>()?)
}

/// Linearly interpolated percentile, `q` in [0, 100].
pub fn percentile(values: &[f32], q: f64) -> f32 {
    assert!(!values.is_empty(), "percentile requires at least one value");
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let w = (rank - lo as f64) as f32;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

/// Derive the outlier threshold and 0/1 labels (1 = outlier) from raw
/// anomaly scores and an assumed contamination fraction in (0, 1).
pub fn threshold_scores(scores: &[f32], contamination: f64) -> (f32, Vec<u8>) {
    let threshold = percentile(scores, 100.0 * (1.0 - contamination));
    let labels = scores.iter().map(|&s| u8::from(s > threshold)).collect();
    (threshold, labels)
}
