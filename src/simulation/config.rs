//! Scenario documents
//!
//! A scenario is a JSON map describing roads, lights, crossings, parking
//! areas, vehicles and spawn points. Two scenarios ship with the crate; any
//! other document can be loaded from disk. Fields the engine does not use
//! (such as a road `color`) are ignored.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::crossing::RoadType;
use super::error::ConfigError;
use super::road_network::SegmentSpec;
use super::traffic_light::LightGroup;
use super::types::{Landmark, Landmarks, Position};

const BASIC_MAP: &str = include_str!("../../maps/basic_map_config.json");
const COMPLETE_MAP: &str = include_str!("../../maps/map_config.json");

/// Built-in scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScenarioMode {
    /// Roads, lights and crossings only
    Basic,
    /// Everything, including parking areas
    #[default]
    Complete,
}

impl ScenarioMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenarioMode::Basic => "basic",
            ScenarioMode::Complete => "complete",
        }
    }
}

fn default_road_capacity() -> u32 {
    2
}

fn default_parking_time() -> u32 {
    2
}

fn default_exit_time() -> u32 {
    1
}

fn default_parking_kind() -> String {
    "street".to_string()
}

fn default_road_type() -> String {
    "2_carriles".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadConfig {
    /// Defaults to `road_{index}`
    #[serde(default)]
    pub id: Option<String>,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    #[serde(default = "default_road_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub one_way: bool,
    #[serde(default)]
    pub is_spawn_point: bool,
    #[serde(default)]
    pub is_despawn_point: bool,
    /// Explicit successors. Inferred from endpoint proximity when absent.
    #[serde(default)]
    pub connections: Option<Vec<String>>,
}

impl RoadConfig {
    pub fn name(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("road_{}", index))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub group: Option<LightGroup>,
    /// Base change time in seconds
    #[serde(default)]
    pub change_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_road_type")]
    pub road_type: String,
    /// Fixed crossing duration in seconds
    #[serde(default)]
    pub wait_time: Option<u32>,
}

impl CrossingConfig {
    pub fn road_type(&self) -> RoadType {
        RoadType::from_name(&self.road_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub capacity: u32,
    #[serde(default = "default_parking_time")]
    pub parking_time: u32,
    #[serde(default = "default_exit_time")]
    pub exit_time: u32,
    /// `street` or `building`
    #[serde(rename = "type", default = "default_parking_kind")]
    pub kind: String,
}

impl ParkingConfig {
    pub fn is_building(&self) -> bool {
        self.kind.eq_ignore_ascii_case("building")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub id: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Start at the next spawn point instead of `(x, y)`
    #[serde(default)]
    pub spawn: bool,
}

impl VehicleConfig {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPointConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub road_id: String,
}

/// Command-line adjustments applied on top of a scenario
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub lane_capacity: Option<u32>,
    /// Building-type areas receive double this capacity
    pub parking_capacity: Option<u32>,
    pub parking_time: Option<u32>,
    pub exit_time: Option<u32>,
    pub traffic_light_wait: Option<f64>,
    pub pedestrian_wait: Option<u32>,
}

impl ConfigOverrides {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("lane capacity", self.lane_capacity),
            ("parking capacity", self.parking_capacity),
            ("parking time", self.parking_time),
            ("exit time", self.exit_time),
            ("pedestrian wait", self.pedestrian_wait),
        ];
        for (name, value) in positive {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if let Some(wait) = self.traffic_light_wait {
            if !(wait.is_finite() && wait > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "traffic light wait must be positive, got {}",
                    wait
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    #[serde(default)]
    pub roads: Vec<RoadConfig>,
    #[serde(default)]
    pub traffic_lights: Vec<LightConfig>,
    #[serde(default)]
    pub crossings: Vec<CrossingConfig>,
    #[serde(default)]
    pub parking_areas: Vec<ParkingConfig>,
    #[serde(default)]
    pub vehicles: Vec<VehicleConfig>,
    #[serde(default)]
    pub spawn_points: Vec<SpawnPointConfig>,
}

impl MapConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: MapConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("Loaded scenario from {}", path.display());
        Ok(config)
    }

    pub fn builtin(mode: ScenarioMode) -> Result<Self, ConfigError> {
        let text = match mode {
            ScenarioMode::Basic => BASIC_MAP,
            ScenarioMode::Complete => COMPLETE_MAP,
        };
        let config = Self::from_json(text)?;
        info!("Loaded built-in {} scenario", mode.as_str());
        Ok(config)
    }

    /// Checks the document for problems that would only surface mid-run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roads.is_empty() {
            return Err(ConfigError::NoRoads);
        }

        let mut road_names = HashSet::new();
        for (index, road) in self.roads.iter().enumerate() {
            let name = road.name(index);
            if road.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "road {} has zero capacity",
                    name
                )));
            }
            if !road_names.insert(name.clone()) {
                return Err(ConfigError::DuplicateId(name));
            }
        }

        for (index, road) in self.roads.iter().enumerate() {
            for target in road.connections.iter().flatten() {
                if !road_names.contains(target) {
                    return Err(ConfigError::UnknownRoad {
                        referrer: road.name(index),
                        road: target.clone(),
                    });
                }
            }
        }

        for point in &self.spawn_points {
            if !road_names.contains(&point.road_id) {
                return Err(ConfigError::UnknownRoad {
                    referrer: point.id.clone(),
                    road: point.road_id.clone(),
                });
            }
        }

        for area in &self.parking_areas {
            if area.capacity == 0 {
                return Err(ConfigError::Invalid(format!(
                    "parking area {} has zero capacity",
                    area.id
                )));
            }
        }

        // Agents share a single registry
        let mut agents = HashSet::new();
        let agent_ids = self
            .traffic_lights
            .iter()
            .map(|light| &light.id)
            .chain(self.crossings.iter().map(|crossing| &crossing.id))
            .chain(self.parking_areas.iter().map(|area| &area.id))
            .chain(self.vehicles.iter().map(|vehicle| &vehicle.id));
        for id in agent_ids {
            if !agents.insert(id.as_str()) {
                return Err(ConfigError::DuplicateId(id.clone()));
            }
        }

        if self.vehicles.iter().any(|vehicle| vehicle.spawn) && self.spawn_points.is_empty() {
            debug!("Spawn vehicles without spawn points start near their coordinates");
        }

        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        overrides.validate()?;

        if let Some(capacity) = overrides.lane_capacity {
            for road in &mut self.roads {
                road.capacity = capacity;
            }
            info!("Lane capacity set to {} for every road", capacity);
        }
        for area in &mut self.parking_areas {
            if let Some(capacity) = overrides.parking_capacity {
                area.capacity = if area.is_building() {
                    capacity * 2
                } else {
                    capacity
                };
            }
            if let Some(parking_time) = overrides.parking_time {
                area.parking_time = parking_time;
            }
            if let Some(exit_time) = overrides.exit_time {
                area.exit_time = exit_time;
            }
        }
        if let Some(wait) = overrides.traffic_light_wait {
            for light in &mut self.traffic_lights {
                light.change_time = Some(wait);
            }
        }
        if let Some(wait) = overrides.pedestrian_wait {
            for crossing in &mut self.crossings {
                crossing.wait_time = Some(wait);
            }
        }
        Ok(())
    }

    pub fn segment_specs(&self) -> Vec<SegmentSpec> {
        self.roads
            .iter()
            .enumerate()
            .map(|(index, road)| SegmentSpec {
                name: road.name(index),
                start: Position::new(road.x1, road.y1),
                end: Position::new(road.x2, road.y2),
                capacity: road.capacity,
                one_way: road.one_way,
                is_spawn: road.is_spawn_point,
                is_despawn: road.is_despawn_point,
                connections: road.connections.clone(),
            })
            .collect()
    }

    pub fn landmarks(&self) -> Landmarks {
        Landmarks {
            traffic_lights: self
                .traffic_lights
                .iter()
                .map(|light| Landmark::new(light.id.as_str(), Position::new(light.x, light.y)))
                .collect(),
            crossings: self
                .crossings
                .iter()
                .map(|crossing| {
                    Landmark::new(crossing.id.as_str(), Position::new(crossing.x, crossing.y))
                })
                .collect(),
            parking_areas: self
                .parking_areas
                .iter()
                .map(|area| Landmark::new(area.id.as_str(), Position::new(area.x, area.y)))
                .collect(),
        }
    }
}
