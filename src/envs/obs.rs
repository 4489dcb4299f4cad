use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::hparams::{
    CONTACT_SENTINEL, ELEVATION_NORM, EMPTY_SENTINEL, LANE_WINDOW, YAW_NORM_DEG,
};
use crate::math;

#[derive(Debug, Clone, Copy)]
pub struct Waypoint {
    pub location: Point3<f32>,
    pub forward: Vector3<f32>,
}

/// Waypoint sequences around the ego vehicle, split by relative lane and
/// travel direction. `None` when the planner produced nothing for a group.
#[derive(Debug, Clone, Default)]
pub struct WaypointBlock {
    pub left_front: Option<Vec<Waypoint>>,
    pub left_rear: Option<Vec<Waypoint>>,
    pub center_front: Option<Vec<Waypoint>>,
    pub center_rear: Option<Vec<Waypoint>>,
    pub right_front: Option<Vec<Waypoint>>,
    pub right_rear: Option<Vec<Waypoint>>,
}

#[derive(Debug, Clone, Copy)]
pub struct NeighborVehicle {
    pub location: Point3<f32>,
    pub velocity: Vector3<f32>,
    pub half_extent_x: f32,
    pub half_extent_y: f32,
}

/// Nearest vehicles in the ego lane and the two adjacent lanes. The
/// distance triples are ordered [left, center, right].
#[derive(Debug, Clone, Default)]
pub struct VehicleBlock {
    pub left_front: Option<NeighborVehicle>,
    pub left_rear: Option<NeighborVehicle>,
    pub center_front: Option<NeighborVehicle>,
    pub center_rear: Option<NeighborVehicle>,
    pub right_front: Option<NeighborVehicle>,
    pub right_rear: Option<NeighborVehicle>,
    pub front_distances: Option<[f32; 3]>,
    pub rear_distances: Option<[f32; 3]>,
}

#[derive(Debug, Clone, Copy)]
pub struct EgoState {
    pub location: Point3<f32>,
    pub velocity: Vector3<f32>,
    pub forward: Vector3<f32>,
    pub half_extent_x: f32,
    pub half_extent_y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanePosition {
    Left,
    Center,
    Right,
}

impl LanePosition {
    pub fn offset(&self) -> f32 {
        match self {
            LanePosition::Left => -1.0,
            LanePosition::Center => 0.0,
            LanePosition::Right => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Rear,
}

impl Side {
    // front positive, rear negative
    pub fn sign(&self) -> f32 {
        match self {
            Side::Front => 1.0,
            Side::Rear => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VehicleSlot {
    pub position: LanePosition,
    pub side: Side,
}

/// Fixed slot order of the surrounding-vehicle feature matrix.
pub const VEHICLE_SLOTS: [VehicleSlot; 6] = [
    VehicleSlot {
        position: LanePosition::Left,
        side: Side::Front,
    },
    VehicleSlot {
        position: LanePosition::Center,
        side: Side::Front,
    },
    VehicleSlot {
        position: LanePosition::Right,
        side: Side::Front,
    },
    VehicleSlot {
        position: LanePosition::Left,
        side: Side::Rear,
    },
    VehicleSlot {
        position: LanePosition::Center,
        side: Side::Rear,
    },
    VehicleSlot {
        position: LanePosition::Right,
        side: Side::Rear,
    },
];

pub type LaneFeatures = [[f32; 3]; LANE_WINDOW];
pub type VehicleFeatures = [[f32; 3]; 6];

/// The per-agent feature set fed to the policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub left_waypoints: LaneFeatures,
    pub center_waypoints: LaneFeatures,
    pub right_waypoints: LaneFeatures,
    pub vehicle_info: VehicleFeatures,
    pub hero_vehicle: [f32; 6],
    pub light: [f32; 3],
}

/// Encodes one lane-relative waypoint group into a fixed 10x3 block of
/// `[elevation_delta, heading_difference, lane_offset]` rows. Reads
/// exactly the first `LANE_WINDOW` waypoints (the stride is reserved for
/// coarser windows and currently unused) and panics on fewer; callers
/// must pad.
pub fn encode_lane_waypoints(
    wps: &[Waypoint],
    ego_z: f32,
    ego_forward: &Vector3<f32>,
    _stride: usize,
    lane_offset: f32,
) -> LaneFeatures {
    let mut out = [[0.0f32; 3]; LANE_WINDOW];
    for (i, row) in out.iter_mut().enumerate() {
        let wp = &wps[i];
        let delta_z = wp.location.z - ego_z;
        let yaw = math::yaw_diff(&wp.forward, ego_forward).to_degrees() / YAW_NORM_DEG;
        *row = [delta_z / ELEVATION_NORM, yaw, lane_offset];
    }
    out
}

/// Encodes the six surrounding-vehicle slots into a 6x3 block of
/// `[signed_distance, signed_relative_speed, lane_offset]` rows, in
/// `VEHICLE_SLOTS` order.
///
/// A wall on a lateral side takes precedence over any vehicle reported for
/// that slot and collapses it to a near-contact sentinel. An unoccupied
/// slot reads as a full-scale distance with zero closing speed, so the
/// policy sees "nothing ahead" and "nothing behind" as the saturated case.
pub fn encode_surrounding(
    ego: &EgoState,
    block: &VehicleBlock,
    left_wall: bool,
    right_wall: bool,
    proximity: f32,
) -> VehicleFeatures {
    let slots = [
        &block.left_front,
        &block.center_front,
        &block.right_front,
        &block.left_rear,
        &block.center_rear,
        &block.right_rear,
    ];
    let ego_speed = math::speed(&ego.velocity, false);
    let ego_extent = ego.half_extent_x.abs().max(ego.half_extent_y.abs());

    let mut out = [[0.0f32; 3]; 6];
    for (i, slot) in VEHICLE_SLOTS.iter().enumerate() {
        let lane = slot.position.offset();
        let sgn = slot.side.sign();
        let wall = match slot.position {
            LanePosition::Left => left_wall,
            LanePosition::Right => right_wall,
            LanePosition::Center => false,
        };
        out[i] = if wall {
            [sgn * CONTACT_SENTINEL, 0.0, lane]
        } else {
            match slots[i] {
                None => [sgn * EMPTY_SENTINEL, 0.0, lane],
                Some(veh) => {
                    let rel_speed = ego_speed - math::speed(&veh.velocity, false);
                    let extent = veh.half_extent_x.abs().max(veh.half_extent_y.abs());
                    let distance =
                        nalgebra::distance(&ego.location, &veh.location) - (ego_extent + extent);
                    if distance < 0.0 {
                        // overlapping bounding boxes
                        [sgn * CONTACT_SENTINEL, sgn * rel_speed, lane]
                    } else {
                        [sgn * distance / proximity, sgn * rel_speed, lane]
                    }
                }
            }
        };
    }
    out
}
