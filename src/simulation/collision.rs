//! Inter-vehicle collision hook
//!
//! Vehicles publish their position on a shared [`PositionBoard`] after
//! every move. Whether a vehicle consults the board before moving is
//! decided by its [`CollisionPolicy`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::types::{AgentId, Position};

/// How vehicles react to each other
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CollisionPolicy {
    /// Never blocks
    #[default]
    Disabled,
    /// Blocks when another live vehicle is closer than the radius
    Radius(f64),
}

impl CollisionPolicy {
    pub fn from_radius(radius: Option<f64>) -> Self {
        match radius {
            Some(radius) if radius > 0.0 => CollisionPolicy::Radius(radius),
            _ => CollisionPolicy::Disabled,
        }
    }

    /// Whether `vehicle` moving to `candidate` would come too close to
    /// someone else on the board
    pub fn blocks(&self, board: &PositionBoard, vehicle: &AgentId, candidate: &Position) -> bool {
        match self {
            CollisionPolicy::Disabled => false,
            CollisionPolicy::Radius(radius) => board.any_within(vehicle, candidate, *radius),
        }
    }
}

/// Last known position of every live vehicle, keyed by id
#[derive(Debug, Clone, Default)]
pub struct PositionBoard {
    positions: Rc<RefCell<HashMap<AgentId, Position>>>,
}

impl PositionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, vehicle: &AgentId, position: Position) {
        self.positions
            .borrow_mut()
            .insert(vehicle.clone(), position);
    }

    pub fn remove(&self, vehicle: &AgentId) {
        self.positions.borrow_mut().remove(vehicle);
    }

    pub fn position(&self, vehicle: &AgentId) -> Option<Position> {
        self.positions.borrow().get(vehicle).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.borrow().is_empty()
    }

    /// Closest vehicle other than `vehicle` and its distance to `point`
    pub fn nearest_other(&self, vehicle: &AgentId, point: &Position) -> Option<(AgentId, f64)> {
        self.positions
            .borrow()
            .iter()
            .filter(|(id, _)| *id != vehicle)
            .map(|(id, position)| (id.clone(), position.distance(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Whether any vehicle other than `vehicle` stands within `radius` of `point`
    pub fn any_within(&self, vehicle: &AgentId, point: &Position, radius: f64) -> bool {
        self.nearest_other(vehicle, point)
            .is_some_and(|(_, distance)| distance < radius)
    }
}
