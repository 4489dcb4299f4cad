use std::collections::BTreeMap;
use std::error::Error;

use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod action;
pub mod obs;
pub mod scenario;

use action::{ControlCommand, LaneAction};
use obs::FeatureFrame;

pub type AgentId = String;

/// Why an episode was cut short. `None` means it was not.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum TruncationReason {
    #[display(fmt = "NONE")]
    None = -1,
    #[display(fmt = "OTHER")]
    Other = 0,
    #[display(fmt = "CHANGE_LANE_IN_LANE_FOLLOW")]
    LaneChangeInLaneFollow = 1,
    #[display(fmt = "COLLISION")]
    Collision = 2,
    #[display(fmt = "SPEED_LOW")]
    LowSpeed = 3,
    #[display(fmt = "OUT_OF_ROAD")]
    OffRoad = 4,
    #[display(fmt = "OPPOSITE_DIRECTION")]
    WrongDirection = 5,
    #[display(fmt = "TRAFFIC_LIGHT_BREAK")]
    TrafficLightViolation = 6,
    #[display(fmt = "CHANGE_TO_WRONG_LANE")]
    WrongLaneAfterChange = 7,
}

impl TruncationReason {
    pub fn truncated(&self) -> bool {
        *self != TruncationReason::None
    }
}

/// Which controller currently drives the vehicle. Transitions are owned by
/// the environment's speed governor; the trainer only observes them.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedRegime {
    #[display(fmt = "START")]
    Start,
    #[display(fmt = "RUNNING")]
    Running,
    #[display(fmt = "RUNNING_RL")]
    RunningRl,
    #[display(fmt = "RUNNING_PID")]
    RunningPid,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub ttc: f32,
    pub efficiency: f32,
    pub comfort: f32,
    pub lane_center: f32,
    pub lane_change: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub step: usize,
    pub speed_state: SpeedRegime,
    pub current_action: LaneAction,
    pub control: ControlCommand,
    pub total_reward: f32,
    pub rewards: RewardBreakdown,
}

/// Raw sensor frame plus the feature set the policy consumes.
#[derive(Debug, Clone)]
pub struct AgentObs {
    pub frame: Option<Box<[u8]>>,
    pub features: FeatureFrame,
}

impl AgentObs {
    pub fn from_features(features: FeatureFrame) -> Self {
        Self {
            frame: None,
            features,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentAction {
    pub index: usize,
    pub params: Vec<f32>,
}

/// Result of stepping the joint environment. `done_all`/`truncated_all`
/// aggregate the per-agent flags (the reserved `__all__` entry).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub obs: BTreeMap<AgentId, AgentObs>,
    pub rewards: BTreeMap<AgentId, f32>,
    pub dones: BTreeMap<AgentId, bool>,
    pub done_all: bool,
    pub truncateds: BTreeMap<AgentId, TruncationReason>,
    pub truncated_all: TruncationReason,
    pub infos: BTreeMap<AgentId, StepInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub total_steps: usize,
    pub pre_train_steps: usize,
    pub rl_control_steps: usize,
    pub rl_switch: bool,
    pub time_steps: BTreeMap<AgentId, usize>,
}

/// Boundary to the driving simulator. The simulator itself (physics,
/// rendering, traffic) lives behind this trait.
pub trait Env {
    fn reset(&mut self) -> Result<BTreeMap<AgentId, AgentObs>, Box<dyn Error>>;
    fn step(
        &mut self,
        actions: &BTreeMap<AgentId, AgentAction>,
    ) -> Result<StepOutcome, Box<dyn Error>>;
    fn progress(&self) -> Progress;
    fn close(&mut self);
}
