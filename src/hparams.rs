/// Waypoints read per lane group by the lane encoder.
pub const LANE_WINDOW: usize = 10;
/// Divisor applied to waypoint elevation deltas.
pub const ELEVATION_NORM: f32 = 3.0;
/// Divisor applied to heading differences (degrees).
pub const YAW_NORM_DEG: f32 = 90.0;

/// Signed magnitude emitted for a wall or touching-vehicle slot.
pub const CONTACT_SENTINEL: f32 = 0.001;
/// Signed magnitude emitted for an unoccupied slot.
pub const EMPTY_SENTINEL: f32 = 1.0;

pub const NUM_LANE_ACTIONS: usize = 3;
pub const ACTION_PARAM_DIM: usize = NUM_LANE_ACTIONS * 2;

// pub const TOTAL_EPISODES: usize = 50_000;
pub const TRAIN_ITERATIONS: usize = 10;

/// RL-controlled steps after which exploration noise starts decaying.
pub const SIGMA_DECAY_AFTER_STEPS: usize = 10_000;
pub const SIGMA_ACC_MIN: f32 = 0.01;
