//! Core types for the traffic simulation
//!
//! Identifiers, planar positions and the landmark tables vehicles use to
//! find nearby controllers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of an agent registered with the runtime (vehicle, light, crossing,
/// parking area or the orchestrator itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for AgentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Index of a road segment inside the [`RoadNetwork`](super::RoadNetwork)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentIndex(pub usize);

impl fmt::Display for SegmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 2D position on the map canvas (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Where despawned vehicles are parked so nothing can see them
    pub const OFF_MAP: Position = Position {
        x: -1000.0,
        y: -1000.0,
    };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn lerp(&self, other: &Position, t: f64) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    /// Axis-aligned proximity test: both coordinate deltas within `radius`
    pub fn is_near(&self, other: &Position, radius: f64) -> bool {
        (self.x - other.x).abs() <= radius && (self.y - other.y).abs() <= radius
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

/// Cardinal heading of a segment, taken from the dominant axis of its
/// displacement vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }
}

/// A controller that sits at a fixed point on the map
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub id: AgentId,
    pub position: Position,
}

impl Landmark {
    pub fn new(id: impl Into<AgentId>, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// Positions of every controller a vehicle may need to query.
///
/// Built once from the configuration and shared read-only by all vehicles.
#[derive(Debug, Clone, Default)]
pub struct Landmarks {
    pub traffic_lights: Vec<Landmark>,
    pub crossings: Vec<Landmark>,
    pub parking_areas: Vec<Landmark>,
}

impl Landmarks {
    /// Lights whose position is within `radius` of `position`
    pub fn lights_near(&self, position: &Position, radius: f64) -> impl Iterator<Item = &Landmark> {
        let position = *position;
        self.traffic_lights
            .iter()
            .filter(move |light| light.position.is_near(&position, radius))
    }

    /// Crossings whose position is within `radius` of `position`
    pub fn crossings_near(
        &self,
        position: &Position,
        radius: f64,
    ) -> impl Iterator<Item = &Landmark> {
        let position = *position;
        self.crossings
            .iter()
            .filter(move |crossing| crossing.position.is_near(&position, radius))
    }

    /// Parking areas within `radius`, nearest first
    pub fn parking_near(&self, position: &Position, radius: f64) -> Vec<&Landmark> {
        let mut nearby: Vec<&Landmark> = self
            .parking_areas
            .iter()
            .filter(|area| area.position.is_near(position, radius))
            .collect();
        nearby.sort_by(|a, b| {
            position
                .distance(&a.position)
                .partial_cmp(&position.distance(&b.position))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        nearby
    }

    /// The nearest parking area regardless of distance
    pub fn nearest_parking(&self, position: &Position) -> Option<&Landmark> {
        self.parking_areas.iter().min_by(|a, b| {
            position
                .distance(&a.position)
                .partial_cmp(&position.distance(&b.position))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Radius of the box around a vehicle in which lights and crossings apply
pub const OBSTACLE_RADIUS: f64 = 30.0;

/// Radius in which a driving vehicle notices a parking area
pub const PARKING_SEARCH_RADIUS: f64 = 50.0;

/// Maximum gap between a segment end and the next segment start for the
/// two to be considered connected when no explicit connections are given
pub const CONNECTION_SNAP_DISTANCE: f64 = 5.0;
