use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::envs::obs::FeatureFrame;
use crate::envs::StepInfo;

/// Hyperparameters handed to a [`Policy`] constructor. The trainer never
/// reads these; they travel to whatever builds the networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdqnParams {
    pub gamma: f32,
    /// Soft target-update rate.
    pub tau: f32,
    pub epsilon: f32,
    pub sigma: f32,
    pub sigma_steer: f32,
    pub sigma_acc: f32,
    /// Ornstein-Uhlenbeck mean-reversion rate for the exploration noise.
    pub theta: f32,
    pub lr_actor: f32,
    pub lr_critic: f32,
    pub buffer_size: usize,
    pub clip_grad: f32,
    pub zero_index_gradients: bool,
    pub inverting_gradients: bool,
    /// Prioritized experience replay.
    pub per: bool,
}

impl Default for PdqnParams {
    fn default() -> Self {
        Self {
            gamma: 0.9,
            tau: 0.01,
            epsilon: 0.5,
            sigma: 0.5,
            sigma_steer: 0.3,
            sigma_acc: 0.5,
            theta: 0.05,
            lr_actor: 2e-4,
            lr_critic: 2e-4,
            buffer_size: 160_000,
            clip_grad: 10.0,
            zero_index_gradients: true,
            inverting_gradients: true,
            per: true,
        }
    }
}

impl PdqnParams {
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
}

/// The unit stored in the replay buffer. Owned by the learner once it
/// leaves the trajectory queue.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: FeatureFrame,
    pub next_state: FeatureFrame,
    pub action: usize,
    pub action_param: Vec<f32>,
    pub reward: f32,
    pub done: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: usize,
    pub params: Vec<f32>,
    pub all_params: Vec<f32>,
}

/// Parameter snapshot of the four P-DQN networks. Moves between processes
/// by value, through the weight queue and the checkpoint file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentWeights {
    pub actor: Vec<f32>,
    pub actor_target: Vec<f32>,
    pub critic: Vec<f32>,
    pub critic_target: Vec<f32>,
}

/// Published by the learner after a round of updates. The weights
/// themselves travel through the checkpoint file under the shared lock.
#[derive(Debug, Clone, Copy)]
pub struct WeightUpdate {
    pub learn_steps: usize,
    pub loss: Option<f32>,
}

/// The P-DQN agent boundary. Network bodies and the replay buffer live
/// behind this trait; the trainer only moves data across it.
pub trait Policy: Send {
    fn take_action(&mut self, obs: &FeatureFrame) -> Decision;
    fn store_transition(&mut self, transition: Transition);
    fn learn(&mut self) -> Option<f32>;
    fn buffer_len(&self) -> usize;
    fn set_batch_size(&mut self, batch_size: usize);
    fn learn_steps(&self) -> usize;
    fn weights(&self) -> AgentWeights;
    fn load_weights(&mut self, weights: &AgentWeights);
    fn set_sigma(&mut self, sigma_steer: f32, sigma_acc: f32);
    fn reset_noise(&mut self);

    fn save_net(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>>
    where
        Self: Sized,
    {
        Checkpoint::new(path).save(&self.weights())
    }
}

/// Durable checkpoint: one JSON file mapping the four network names to
/// their parameter blobs.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, weights: &AgentWeights) -> Result<(), Box<dyn Error>> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let f = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(f), weights)?;
        Ok(())
    }

    pub fn load(&self) -> Result<AgentWeights, Box<dyn Error>> {
        let f = File::open(&self.path)?;
        let weights = serde_json::from_reader(BufReader::new(f))?;
        Ok(weights)
    }
}
