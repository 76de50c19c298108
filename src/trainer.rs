//! Epoch-wise mini-batch training with best-snapshot tracking.

use anyhow::{anyhow, Result};
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use log::info;
use rand::rngs::StdRng;
use std::collections::HashMap;

use crate::config::ReconstructionLoss;
use crate::dataset::TabularDataset;
use crate::network::AutoEncoderNet;
use crate::stats::compute_loss_stats;

/// Hyper-parameters consumed by a single training run.
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub loss: ReconstructionLoss,
}

/// Outcome of a training run.
///
/// `best_state` holds the parameter snapshot of the epoch with the lowest
/// mean loss. The live parameters are left at their final state; the caller
/// restores the snapshot before scoring.
pub struct TrainOutcome {
    pub best_loss: f32,
    pub best_epoch: usize,
    pub epoch_losses: Vec<f32>,
    pub best_state: HashMap<String, Tensor>,
}

/// Deep-copy the full model state into freshly allocated tensors, so later
/// optimizer steps cannot mutate the snapshot through shared storage.
/// Covers the optimizer-managed variable map plus the batch-norm running
/// statistics owned by the network.
pub fn snapshot_model(net: &AutoEncoderNet, varmap: &VarMap) -> Result<HashMap<String, Tensor>> {
    let data = varmap.data().lock().unwrap();
    let mut state = HashMap::with_capacity(data.len());
    for (name, var) in data.iter() {
        state.insert(name.clone(), var.as_tensor().copy()?);
    }
    drop(data);
    for (name, var) in net.stat_vars() {
        state.insert(name, var.as_tensor().copy()?);
    }
    Ok(state)
}

/// Write a snapshot back into the live model state by name.
pub fn restore_model(
    net: &AutoEncoderNet,
    varmap: &VarMap,
    state: &HashMap<String, Tensor>,
) -> Result<()> {
    let data = varmap.data().lock().unwrap();
    for (name, var) in data.iter() {
        let tensor = state
            .get(name)
            .ok_or_else(|| anyhow!("parameter {} missing from snapshot", name))?;
        var.set(tensor)?;
    }
    drop(data);
    for (name, var) in net.stat_vars() {
        let tensor = state
            .get(&name)
            .ok_or_else(|| anyhow!("parameter {} missing from snapshot", name))?;
        var.set(tensor)?;
    }
    Ok(())
}

/// Run `opts.epochs` epochs of shuffled mini-batch optimization over the
/// dataset. Tracks the best epoch by mean batch loss; ties go to the later
/// epoch, so the snapshot reflects the most recent minimum.
pub fn train_autoencoder(
    net: &AutoEncoderNet,
    varmap: &VarMap,
    dataset: &TabularDataset,
    opts: &TrainOptions,
    rng: &mut StdRng,
) -> Result<TrainOutcome> {
    let params = ParamsAdamW {
        lr: opts.learning_rate,
        weight_decay: opts.weight_decay,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(varmap.all_vars(), params)?;

    let mut best_loss = f32::INFINITY;
    let mut best_epoch = 0usize;
    let mut best_state = None;
    let mut epoch_losses = Vec::with_capacity(opts.epochs);

    for epoch in 0..opts.epochs {
        let mut batch_losses = Vec::new();
        for batch in dataset.shuffled_batches(opts.batch_size, rng) {
            let input = batch.to_tensor(net.device())?;
            let reconstruction = net.forward(&input)?;
            let loss = opts.loss.compute(&reconstruction, &input)?;
            optimizer.backward_step(&loss)?;
            batch_losses.push(loss.to_vec0::<f32>()?);
        }
        let (mean_loss, _) = compute_loss_stats(&batch_losses);
        info!("epoch {}: training loss {}", epoch, mean_loss);

        if mean_loss <= best_loss {
            best_loss = mean_loss;
            best_epoch = epoch;
            best_state = Some(snapshot_model(net, varmap)?);
        }
        epoch_losses.push(mean_loss);
    }

    let best_state = best_state.ok_or_else(|| anyhow!("training ran for zero epochs"))?;
    Ok(TrainOutcome {
        best_loss,
        best_epoch,
        epoch_losses,
        best_state,
    })
}
