use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::brains::{Checkpoint, Policy, Transition, WeightUpdate};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Replay-buffer size below which no learning happens. Also the unit
    /// of the dynamic batch multiplier.
    pub minimal_size: usize,
    pub batch_size: usize,
    /// Cumulative learning steps between weight publications.
    pub update_freq: usize,
}

/// Body of the learner process. Drains the trajectory queue into the
/// policy's replay buffer, learns, and periodically republishes weights.
///
/// The trajectory channel disconnecting is the shutdown signal: the rollout
/// side drops its sender during teardown, and the learner persists a final
/// checkpoint and returns instead of being killed mid-iteration.
pub fn learner_loop<P: Policy>(
    mut learner: P,
    config: LearnerConfig,
    traj_rx: Receiver<Transition>,
    weight_tx: Sender<WeightUpdate>,
    checkpoint: Arc<Mutex<Checkpoint>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // resume from a previous run's weights when the file is already there
    {
        let guard = checkpoint.lock().unwrap();
        if let Ok(weights) = guard.load() {
            info!("learner resuming from {}", guard.path().display());
            learner.load_weights(&weights);
        }
    }

    let mut update_count = 0usize;
    let mut loss = None;
    loop {
        // scale the effective batch with how full the buffer is
        let k = (learner.buffer_len() / config.minimal_size).max(1);
        learner.set_batch_size(k * config.batch_size);
        for _ in 0..k {
            match traj_rx.recv() {
                Ok(transition) => learner.store_transition(transition),
                Err(_) => {
                    let guard = checkpoint.lock().unwrap();
                    guard
                        .save(&learner.weights())
                        .map_err(|e| e.to_string())?;
                    info!(
                        "learner shutting down, {} learn steps, buffer {}",
                        learner.learn_steps(),
                        learner.buffer_len()
                    );
                    return Ok(());
                }
            }
        }

        if learner.buffer_len() >= config.minimal_size {
            for _ in 0..k {
                loss = learner.learn();
                update_count += 1;
            }
            // the file write and the queue publish form one atomic update
            // for the rollout side; skip both when the queue is full
            if update_count / config.update_freq > 0 && !weight_tx.is_full() {
                let guard = checkpoint.lock().unwrap();
                let update = WeightUpdate {
                    learn_steps: learner.learn_steps(),
                    loss,
                };
                if weight_tx.try_send(update).is_ok() {
                    guard
                        .save(&learner.weights())
                        .map_err(|e| e.to_string())?;
                    debug!("published weights at learn step {}", update.learn_steps);
                }
                update_count %= config.update_freq;
            }
        }
    }
}
