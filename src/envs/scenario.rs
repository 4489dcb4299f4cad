use std::collections::BTreeMap;
use std::error::Error;

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Weather preset ids, matching the simulator's parameter table.
pub const WEATHERS: [&str; 14] = [
    "ClearNoon",
    "CloudyNoon",
    "WetNoon",
    "WetCloudyNoon",
    "MidRainyNoon",
    "HardRainNoon",
    "SoftRainNoon",
    "ClearSunset",
    "CloudySunset",
    "WetSunset",
    "WetCloudySunset",
    "MidRainSunset",
    "HardRainSunset",
    "SoftRainSunset",
];

pub const TEST_WEATHERS: [usize; 9] = [0, 2, 5, 7, 9, 10, 11, 12, 13];
pub const TRAIN_WEATHERS: [usize; 5] = [1, 3, 4, 6, 8];

/// An actor start/end location: either a named spawn node or explicit
/// coordinates with an optional heading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpawnPoint {
    Node(i64),
    Location { x: f32, y: f32, z: f32, yaw: Option<f32> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSpec {
    pub start: SpawnPoint,
    pub end: SpawnPoint,
}

/// One driving scenario: the map, the controlled actors, background
/// traffic counts, the admissible weathers and the step limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub map: String,
    pub actors: BTreeMap<String, ActorSpec>,
    pub num_vehicles: usize,
    pub num_pedestrians: usize,
    pub weather_distribution: Vec<usize>,
    pub max_steps: usize,
}

impl Scenario {
    /// Draw a weather id from this scenario's distribution. Falls back to
    /// clear noon when the distribution is empty.
    pub fn pick_weather<R: Rng>(&self, rng: &mut R) -> usize {
        *self.weather_distribution.choose(rng).unwrap_or(&0)
    }
}

fn scenario(
    map: &str,
    actors: &[(&str, SpawnPoint, SpawnPoint)],
    num_vehicles: usize,
    num_pedestrians: usize,
    weathers: &[usize],
    max_steps: usize,
) -> Scenario {
    Scenario {
        map: map.to_string(),
        actors: actors
            .iter()
            .map(|(name, start, end)| {
                (
                    name.to_string(),
                    ActorSpec {
                        start: start.clone(),
                        end: end.clone(),
                    },
                )
            })
            .collect(),
        num_vehicles,
        num_pedestrians,
        weather_distribution: weathers.to_vec(),
        max_steps,
    }
}

fn loc(x: f32, y: f32, z: f32) -> SpawnPoint {
    SpawnPoint::Location { x, y, z, yaw: None }
}

fn loc_yaw(x: f32, y: f32, z: f32, yaw: f32) -> SpawnPoint {
    SpawnPoint::Location { x, y, z, yaw: Some(yaw) }
}

lazy_static! {
    static ref BASE_SCENARIOS: BTreeMap<&'static str, Scenario> = BTreeMap::from([
        (
            "FR2C_TOWN5",
            scenario(
                "Town05",
                &[
                    ("car1", SpawnPoint::Node(-1), SpawnPoint::Node(-1)),
                    ("car2", SpawnPoint::Node(-2), SpawnPoint::Node(-1)),
                ],
                20,
                0,
                &[0],
                2000,
            )
        ),
        (
            "SSUI3C_TOWN3",
            scenario(
                "Town03",
                &[
                    ("car1", loc(170.5, 80.0, 0.4), loc(144.0, 59.0, 0.0)),
                    ("car2", loc(188.0, 59.0, 0.4), loc(167.0, 75.7, 0.13)),
                    ("car3", loc(147.6, 62.6, 0.4), loc(191.2, 62.7, 0.0)),
                ],
                0,
                0,
                &[0],
                500,
            )
        ),
        (
            "SSUI1B2C1P_TOWN3",
            scenario(
                "Town03",
                &[
                    ("car1", loc(170.5, 80.0, 0.4), loc(144.0, 59.0, 0.0)),
                    ("car2", loc(188.0, 59.0, 0.4), loc(167.0, 75.7, 0.13)),
                    ("pedestrian1", loc(158.0, 75.0, 0.4), loc(185.0, 71.0, 0.0)),
                    ("bike1", loc(147.6, 62.6, 0.4), loc(191.2, 62.7, 0.0)),
                ],
                0,
                0,
                &[0],
                500,
            )
        ),
        (
            "SUI3C_TOWN3",
            scenario(
                "Town03",
                &[
                    ("car1", loc(70.0, -132.8, 8.0), loc(127.0, -132.0, 8.0)),
                    ("car2", loc(84.3, -118.0, 9.0), loc(120.0, -132.0, 8.0)),
                    ("car3", loc(43.0, -133.0, 4.0), loc(100.0, -132.0, 8.0)),
                ],
                0,
                0,
                &[0],
                500,
            )
        ),
        (
            "SUI1B2C1P_TOWN3",
            scenario(
                "Town03",
                &[
                    ("car1", loc(94.0, -132.7, 10.0), loc(106.0, -132.7, 8.0)),
                    ("car2", loc(84.0, -115.0, 10.0), loc(41.0, -137.0, 8.0)),
                    ("pedestrian1", loc_yaw(74.0, -126.0, 10.0, 0.0), loc(92.0, -125.0, 8.0)),
                    ("bike1", loc(69.0, -132.0, 8.0), loc(104.0, -132.0, 8.0)),
                ],
                0,
                0,
                &[0],
                200,
            )
        ),
        (
            "DEFAULT_SCENARIO_TOWN1",
            scenario(
                "Town01",
                &[("vehicle1", SpawnPoint::Node(128), SpawnPoint::Node(133))],
                0,
                0,
                &[0],
                2000,
            )
        ),
        (
            "DEFAULT_SCENARIO_TOWN1_2",
            scenario(
                "Town01",
                &[("vehicle1", SpawnPoint::Node(133), SpawnPoint::Node(65))],
                0,
                0,
                &[0],
                2000,
            )
        ),
        (
            "DEFAULT_SCENARIO_TOWN1_COMBINED",
            scenario(
                "Town01",
                &[
                    (
                        "vehicle1",
                        loc_yaw(217.50998, 198.75999, 0.5, -0.16),
                        loc_yaw(299.39996, 199.05999, 0.5, -0.16),
                    ),
                    ("vehicle2", SpawnPoint::Node(133), SpawnPoint::Node(65)),
                ],
                10,
                10,
                &[0],
                2000,
            )
        ),
        (
            "DEFAULT_SCENARIO_TOWN1_COMBINED_WITH_MANUAL",
            scenario(
                "Town01",
                &[
                    (
                        "vehicle1",
                        loc_yaw(217.50998, 198.75999, 39.430626, -0.16),
                        loc_yaw(299.39996, 199.05999, 39.430626, -0.16),
                    ),
                    ("vehicle2", SpawnPoint::Node(133), SpawnPoint::Node(65)),
                    (
                        "manual",
                        loc_yaw(299.39996, 194.75999, 39.430626, 180.0),
                        loc_yaw(217.50998, 194.05999, 39.430626, 180.0),
                    ),
                ],
                0,
                0,
                &[0],
                2000,
            )
        ),
        (
            "LANE_KEEP_TOWN1",
            scenario(
                "Town01",
                &[("vehicle1", SpawnPoint::Node(36), SpawnPoint::Node(40))],
                0,
                0,
                &[0],
                2000,
            )
        ),
        (
            "LANE_KEEP_TOWN2",
            scenario(
                "Town02",
                &[("vehicle1", SpawnPoint::Node(36), SpawnPoint::Node(40))],
                0,
                0,
                &[0],
                2000,
            )
        ),
    ]);
}

/// Caller-facing handle for scenario selection: a registered name, a list
/// of names, or an already-resolved record.
#[derive(Debug, Clone)]
pub enum ScenarioSelector {
    Name(String),
    Names(Vec<String>),
    Inline(Scenario),
}

/// Immutable scenario lookup table. Built once from the base entries;
/// extended by merging additional entries rather than by inheritance.
#[derive(Debug, Clone)]
pub struct ScenarioRegistry {
    entries: BTreeMap<String, Scenario>,
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        Self {
            entries: BASE_SCENARIOS
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

impl ScenarioRegistry {
    /// Merge extra entries over the base table. Duplicate names override.
    pub fn with_entries(mut self, extra: BTreeMap<String, Scenario>) -> Self {
        self.entries.extend(extra);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.entries.get(name)
    }

    /// Normalize any selector form into the resolved record list.
    pub fn resolve(&self, selector: &ScenarioSelector) -> Result<Vec<Scenario>, Box<dyn Error>> {
        match selector {
            ScenarioSelector::Inline(s) => Ok(vec![s.clone()]),
            ScenarioSelector::Name(name) => Ok(vec![self.lookup(name)?]),
            ScenarioSelector::Names(names) => {
                names.iter().map(|n| self.lookup(n)).collect()
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Scenario, Box<dyn Error>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown scenario: {name}").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn resolves_single_name() {
        let reg = ScenarioRegistry::default();
        let out = reg
            .resolve(&ScenarioSelector::Name("SSUI3C_TOWN3".into()))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].map, "Town03");
        assert_eq!(out[0].actors.len(), 3);
    }

    #[test]
    fn resolves_name_list_in_order() {
        let reg = ScenarioRegistry::default();
        let out = reg
            .resolve(&ScenarioSelector::Names(vec![
                "LANE_KEEP_TOWN2".into(),
                "FR2C_TOWN5".into(),
            ]))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].map, "Town02");
        assert_eq!(out[1].map, "Town05");
    }

    #[test]
    fn inline_record_passes_through() {
        let reg = ScenarioRegistry::default();
        let inline = reg.get("FR2C_TOWN5").unwrap().clone();
        let out = reg
            .resolve(&ScenarioSelector::Inline(inline.clone()))
            .unwrap();
        assert_eq!(out[0], inline);
    }

    #[test]
    fn mixed_actor_scenarios_present() {
        let reg = ScenarioRegistry::default();
        let s = reg.get("SUI1B2C1P_TOWN3").unwrap();
        assert_eq!(s.actors.len(), 4);
        assert!(s.actors.contains_key("pedestrian1"));
        assert!(s.actors.contains_key("bike1"));
        assert_eq!(s.max_steps, 200);

        let combined = reg.get("DEFAULT_SCENARIO_TOWN1_COMBINED").unwrap();
        assert_eq!(combined.num_vehicles, 10);
        assert_eq!(combined.num_pedestrians, 10);
        match &combined.actors["vehicle1"].start {
            SpawnPoint::Location { yaw, .. } => assert_eq!(*yaw, Some(-0.16)),
            SpawnPoint::Node(_) => panic!("expected explicit location"),
        }
        assert!(reg.get("DEFAULT_SCENARIO_TOWN1_2").is_some());
        assert!(reg.get("LANE_KEEP_TOWN1").is_some());
        assert!(reg
            .get("DEFAULT_SCENARIO_TOWN1_COMBINED_WITH_MANUAL")
            .is_some());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let reg = ScenarioRegistry::default();
        assert!(reg
            .resolve(&ScenarioSelector::Name("NO_SUCH_TOWN".into()))
            .is_err());
    }

    #[test]
    fn merged_entries_override() {
        let mut custom = ScenarioRegistry::default()
            .get("LANE_KEEP_TOWN2")
            .unwrap()
            .clone();
        custom.max_steps = 77;
        let reg = ScenarioRegistry::default()
            .with_entries(BTreeMap::from([("LANE_KEEP_TOWN2".to_string(), custom)]));
        assert_eq!(reg.get("LANE_KEEP_TOWN2").unwrap().max_steps, 77);
    }

    #[test]
    fn weather_drawn_from_distribution() {
        let mut s = ScenarioRegistry::default().get("FR2C_TOWN5").unwrap().clone();
        s.weather_distribution = TRAIN_WEATHERS.to_vec();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let w = s.pick_weather(&mut rng);
            assert!(TRAIN_WEATHERS.contains(&w));
            assert!(w < WEATHERS.len());
        }
    }
}
