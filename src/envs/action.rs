use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum LaneAction {
    #[display(fmt = "LANE_FOLLOW")]
    LaneFollow = 0,
    #[display(fmt = "LANE_CHANGE_LEFT")]
    LaneChangeLeft = -1,
    #[display(fmt = "LANE_CHANGE_RIGHT")]
    LaneChangeRight = 1,
    #[display(fmt = "STOP")]
    Stop = 2,
}

impl LaneAction {
    /// Index of this action in the flat parameter buffer. Lane changes own
    /// the outer slots; LaneFollow (and Stop, which carries no learned
    /// parameters) map to the middle.
    pub fn param_index(&self) -> usize {
        match self {
            LaneAction::LaneChangeLeft => 0,
            LaneAction::LaneFollow | LaneAction::Stop => 1,
            LaneAction::LaneChangeRight => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlCommand {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
    pub gear: i32,
    pub reverse: bool,
    pub manual_gear_shift: bool,
}

impl Default for ControlCommand {
    fn default() -> Self {
        Self {
            throttle: 0.0,
            brake: 0.0,
            steer: 0.0,
            gear: 1,
            reverse: false,
            manual_gear_shift: false,
        }
    }
}

impl ControlCommand {
    /// Collapse throttle and brake into the single signed axis the policy
    /// learns: braking is negative, throttle positive.
    pub fn throttle_brake(&self) -> f32 {
        if self.brake > 0.0 {
            -self.brake
        } else {
            self.throttle
        }
    }
}

/// Compress a physical steer value into the learned sub-range for the two
/// lane-change actions. Left changes only ever steer in [-1, 0], right
/// changes in [0, 1]; the affine map lets the network output its full
/// range for either maneuver. Inverse of [`recover_steer`].
pub fn process_steer(a_index: usize, steer: f32) -> f32 {
    match a_index {
        0 => steer * 0.5 - 0.5,
        2 => steer * 0.5 + 0.5,
        _ => steer,
    }
}

/// Undo the lane-change steer compression, recovering the network-range
/// value from a stored physical steer. Clamped to [-1, 1].
pub fn recover_steer(a_index: usize, steer: f32) -> f32 {
    let recovered = match a_index {
        0 => (steer + 0.5) / 0.5,
        2 => (steer - 0.5) / 0.5,
        _ => steer,
    };
    recovered.clamp(-1.0, 1.0)
}

/// Write `(steer, throttle_brake)` into the two parameter slots owned by
/// `action`, leaving every other slot untouched. With
/// `modify_change_steer` set, lane-change steer is mapped back into the
/// learned range first so replayed parameters match what the network emits.
pub fn fill_action_param(
    action: usize,
    steer: f32,
    throttle_brake: f32,
    action_param: &mut [f32],
    modify_change_steer: bool,
) {
    let steer = if modify_change_steer {
        recover_steer(action, steer)
    } else {
        steer
    };
    action_param[action * 2] = steer;
    action_param[action * 2 + 1] = throttle_brake;
}
