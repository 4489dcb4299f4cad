use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use itertools::Itertools;
use kdam::{tqdm, BarExt};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::brains::{Checkpoint, Policy, Transition, WeightUpdate};
use crate::envs::action::fill_action_param;
use crate::envs::{AgentAction, AgentId, Env, RewardBreakdown, SpeedRegime, TruncationReason};
use crate::hparams::{ACTION_PARAM_DIM, SIGMA_ACC_MIN, SIGMA_DECAY_AFTER_STEPS, TRAIN_ITERATIONS};
use crate::{TbWriter, Timestamp};

pub mod learner;

pub use learner::{learner_loop, LearnerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub total_episodes: usize,
    pub update_freq: usize,
    pub batch_size: usize,
    pub minimal_size: usize,
    /// Capacity of the trajectory queue; a full queue blocks rollout.
    pub traj_capacity: usize,
    /// Store lane-change steer in the learned (remapped) range.
    pub modify_change_steer: bool,
    pub sigma_steer: f32,
    pub sigma_acc: f32,
    pub sigma_decay: f32,
    pub save_dir: PathBuf,
    /// Write tensorboard episode metrics (off for headless tests).
    pub log_metrics: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            total_episodes: 50_000,
            update_freq: 300,
            batch_size: 256,
            minimal_size: 10_000,
            traj_capacity: 10_000,
            modify_change_steer: false,
            sigma_steer: 0.3,
            sigma_acc: 0.5,
            sigma_decay: 0.9999,
            save_dir: PathBuf::from("out/multi_agent/pdqn"),
            log_metrics: true,
        }
    }
}

impl TrainConfig {
    pub fn to_yaml(&self) -> Result<String, Box<dyn Error>> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let mut f = File::create(path)?;
        write!(f, "{}", self.to_yaml()?)?;
        Ok(())
    }

    pub fn from_yaml(s: &str) -> Result<Self, Box<dyn Error>> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let mut f = File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        Self::from_yaml(&s)
    }

    fn learner_config(&self) -> LearnerConfig {
        LearnerConfig {
            minimal_size: self.minimal_size,
            batch_size: self.batch_size,
            update_freq: self.update_freq,
        }
    }
}

/// Per-episode objective scores for one agent, seeded with the baseline
/// offsets the metrics are measured against.
#[derive(Debug, Clone, Copy)]
struct EpisodeStats {
    ttc: f32,
    efficiency: f32,
    comfort: f32,
    lane_center: f32,
    lane_change: f32,
    total: f32,
}

impl EpisodeStats {
    fn new() -> Self {
        Self {
            ttc: -1.0,
            efficiency: -1.0,
            comfort: -1.0,
            lane_center: -1.0,
            lane_change: 0.0,
            total: -4.0,
        }
    }

    fn accumulate(&mut self, r: &RewardBreakdown) {
        self.ttc += r.ttc;
        self.efficiency += r.efficiency;
        self.comfort += r.comfort;
        self.lane_center += r.lane_center;
        self.lane_change += r.lane_change;
    }
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub episodes: usize,
    pub losses: Vec<f32>,
    pub final_checkpoint: PathBuf,
}

/// Rollout driver: runs episodes with a local worker policy while a
/// learner thread trains on the transitions it receives.
pub struct Trainer {
    pub config: TrainConfig,
    pub timestamp: Timestamp,
    writer: TbWriter,
    stop: Arc<AtomicBool>,
    losses: Vec<f32>,
    sigma_steer: f32,
    sigma_acc: f32,
}

impl Trainer {
    pub fn new(config: TrainConfig) -> Self {
        let timestamp = Timestamp::default();
        let mut writer = TbWriter::default();
        if config.log_metrics {
            writer.init(Some("pdqn"), &timestamp);
        }
        Self {
            sigma_steer: config.sigma_steer,
            sigma_acc: config.sigma_acc,
            config,
            timestamp,
            writer,
            stop: Arc::new(AtomicBool::new(false)),
            losses: Vec::new(),
        }
    }

    /// Handle an operator can set to interrupt training; teardown still
    /// runs and a final checkpoint is written.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the full actor/learner loop. The learner policy is constructed
    /// by `learner_factory` inside its own thread so the two sides never
    /// share policy state. Teardown runs on every exit path.
    pub fn train<E, P, L, F>(
        mut self,
        env: &mut E,
        mut worker: P,
        learner_factory: F,
    ) -> Result<TrainReport, Box<dyn Error>>
    where
        E: Env,
        P: Policy,
        L: Policy + 'static,
        F: FnOnce() -> L + Send + 'static,
    {
        let checkpoint = Arc::new(Mutex::new(Checkpoint::new(
            self.config.save_dir.join("learner.json"),
        )));
        let (traj_tx, traj_rx) = bounded::<Transition>(self.config.traj_capacity);
        let (weight_tx, weight_rx) = bounded::<WeightUpdate>(1);

        let learner_cfg = self.config.learner_config();
        let learner_ckpt = checkpoint.clone();
        let learner = thread::Builder::new()
            .name("learner".into())
            .spawn(move || learner_loop(learner_factory(), learner_cfg, traj_rx, weight_tx, learner_ckpt))?;

        let result = self.run_episodes(env, &mut worker, &traj_tx, &weight_rx, &checkpoint);

        // unconditional teardown, in the same order on every exit path
        env.close();
        drop(traj_tx);
        match learner.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("learner exited with error: {e}"),
            Err(_) => error!("learner thread panicked"),
        }
        self.writer.close();
        let final_checkpoint = self.config.save_dir.join("pdqn_final.json");
        if let Err(e) = Checkpoint::new(&final_checkpoint).save(&worker.weights()) {
            error!("final checkpoint failed: {e}");
        }
        info!("done");

        result.map(|episodes| TrainReport {
            episodes,
            losses: self.losses,
            final_checkpoint,
        })
    }

    fn run_episodes<E: Env, P: Policy>(
        &mut self,
        env: &mut E,
        worker: &mut P,
        traj_tx: &Sender<Transition>,
        weight_rx: &Receiver<WeightUpdate>,
        checkpoint: &Arc<Mutex<Checkpoint>>,
    ) -> Result<usize, Box<dyn Error>> {
        let per_iteration = (self.config.total_episodes / TRAIN_ITERATIONS).max(1);
        let mut episodes = 0usize;
        'outer: for i in 0..TRAIN_ITERATIONS {
            let mut pbar = tqdm!(total = per_iteration, desc = format!("Iteration {i}"));
            for _ in 0..per_iteration {
                if self.stop.load(Ordering::Relaxed) {
                    info!("stop requested, ending after {episodes} episodes");
                    break 'outer;
                }
                self.run_episode(env, worker, traj_tx, weight_rx, checkpoint, episodes)?;
                episodes += 1;
                pbar.update(1).ok();
            }
            if episodes >= self.config.total_episodes {
                break;
            }
        }
        Ok(episodes)
    }

    fn run_episode<E: Env, P: Policy>(
        &mut self,
        env: &mut E,
        worker: &mut P,
        traj_tx: &Sender<Transition>,
        weight_rx: &Receiver<WeightUpdate>,
        checkpoint: &Arc<Mutex<Checkpoint>>,
        episode: usize,
    ) -> Result<(), Box<dyn Error>> {
        let mut states = env.reset()?;
        worker.reset_noise();
        let mut stats: BTreeMap<AgentId, EpisodeStats> = states
            .keys()
            .map(|id| (id.clone(), EpisodeStats::new()))
            .collect();

        let mut done = false;
        let mut truncated = false;
        while !done && !truncated {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            self.apply_weight_update(worker, weight_rx, checkpoint);

            let mut actions: BTreeMap<AgentId, AgentAction> = BTreeMap::new();
            let mut all_params: BTreeMap<AgentId, Vec<f32>> = BTreeMap::new();
            for (id, obs) in &states {
                let decision = worker.take_action(&obs.features);
                actions.insert(
                    id.clone(),
                    AgentAction {
                        index: decision.action,
                        params: decision.params,
                    },
                );
                all_params.insert(id.clone(), decision.all_params);
            }

            let outcome = env.step(&actions)?;
            for (id, info) in &outcome.infos {
                if info.speed_state != SpeedRegime::Running {
                    continue;
                }
                let stat = stats.entry(id.clone()).or_insert_with(EpisodeStats::new);
                stat.total = info.total_reward;
                let reason = outcome
                    .truncateds
                    .get(id)
                    .copied()
                    .unwrap_or(TruncationReason::None);
                if reason.truncated() {
                    continue;
                }
                stat.accumulate(&info.rewards);

                let (Some(state), Some(next_state)) = (states.get(id), outcome.obs.get(id))
                else {
                    continue;
                };
                let action = info.current_action.param_index();
                let mut saved_params = all_params
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; ACTION_PARAM_DIM]);
                fill_action_param(
                    action,
                    info.control.steer,
                    info.control.throttle_brake(),
                    &mut saved_params,
                    self.config.modify_change_steer,
                );
                debug!(
                    "actor {id} step {}: action {action}, stored params {saved_params:?}",
                    info.step
                );
                let transition = Transition {
                    state: state.features.clone(),
                    next_state: next_state.features.clone(),
                    action,
                    action_param: saved_params,
                    reward: outcome.rewards.get(id).copied().unwrap_or(0.0),
                    done: outcome.dones.get(id).copied().unwrap_or(false),
                    truncated: reason.truncated(),
                    info: info.clone(),
                };
                // blocking send: backpressure against a slow learner
                traj_tx
                    .send(transition)
                    .map_err(|_| "trajectory queue disconnected")?;
            }

            done = outcome.done_all;
            truncated = outcome.truncated_all.truncated();
            states = outcome.obs;

            let progress = env.progress();
            if progress.total_steps == progress.pre_train_steps && progress.total_steps > 0 {
                let path = self.config.save_dir.join("pdqn_pre_trained.json");
                Checkpoint::new(path).save(&worker.weights())?;
            }
            if progress.rl_control_steps > SIGMA_DECAY_AFTER_STEPS && self.sigma_acc > SIGMA_ACC_MIN
            {
                self.sigma_steer *= self.config.sigma_decay;
                self.sigma_acc *= self.config.sigma_decay;
                worker.set_sigma(self.sigma_steer, self.sigma_acc);
                info!("sigma decayed to {} {}", self.sigma_steer, self.sigma_acc);
            }
        }

        self.write_episode_metrics(env, &stats, episode);
        Checkpoint::new(self.config.save_dir.join("pdqn_final.json")).save(&worker.weights())?;
        Ok(())
    }

    /// Non-blocking poll of the weight queue. The checkpoint read and the
    /// queue drain happen under the shared lock so a half-written snapshot
    /// is never observed.
    fn apply_weight_update<P: Policy>(
        &mut self,
        worker: &mut P,
        weight_rx: &Receiver<WeightUpdate>,
        checkpoint: &Arc<Mutex<Checkpoint>>,
    ) {
        if weight_rx.is_empty() {
            return;
        }
        let guard = checkpoint.lock().unwrap();
        match guard.load() {
            Ok(weights) => worker.load_weights(&weights),
            Err(e) => error!("failed to load learner checkpoint: {e}"),
        }
        if let Ok(update) = weight_rx.try_recv() {
            if let Some(loss) = update.loss {
                info!("learn steps: {}, q loss: {}", update.learn_steps, loss);
                self.losses.push(loss);
            }
        }
    }

    fn write_episode_metrics<E: Env>(
        &mut self,
        env: &E,
        stats: &BTreeMap<AgentId, EpisodeStats>,
        episode: usize,
    ) {
        let progress = env.progress();
        if !progress.rl_switch {
            return;
        }
        let steps_of = |id: &AgentId| (progress.time_steps.get(id).copied().unwrap_or(0) + 1) as f32;

        let scalar_map = |f: &dyn Fn(&EpisodeStats, f32) -> f32| -> HashMap<String, f32> {
            stats
                .iter()
                .map(|(id, s)| (id.clone(), f(s, steps_of(id))))
                .collect()
        };
        let total = scalar_map(&|s, _| s.total);
        let avg = scalar_map(&|s, n| s.total / n);
        let ttc = scalar_map(&|s, n| s.ttc / n);
        let efficiency = scalar_map(&|s, n| s.efficiency / n);
        let comfort = scalar_map(&|s, n| s.comfort / n);
        let lane_center = scalar_map(&|s, n| s.lane_center / n);
        let lane_change = scalar_map(&|s, n| s.lane_change / n);
        let time_steps = stats
            .keys()
            .map(|id| (id.clone(), steps_of(id) - 1.0))
            .collect::<HashMap<_, _>>();

        self.writer.add_scalars("Total_Reward", &total, episode);
        self.writer.add_scalars("Avg_Reward", &avg, episode);
        self.writer.add_scalars("Time_Steps", &time_steps, episode);
        self.writer.add_scalars("TTC", &ttc, episode);
        self.writer.add_scalars("Efficiency", &efficiency, episode);
        self.writer.add_scalars("Comfort", &comfort, episode);
        self.writer.add_scalars("Lcen", &lane_center, episode);
        self.writer
            .add_scalars("Lane_change_reward", &lane_change, episode);
        debug!(
            "episode {episode}: total steps {}, rl control steps {}, agents {}",
            progress.total_steps,
            progress.rl_control_steps,
            stats.keys().join(",")
        );
    }
}
