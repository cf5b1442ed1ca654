//! Shared occupancy ledger for road segments and parking areas
//!
//! Every admission decision goes through [`ResourceLedger::try_enter`]. The
//! check and the increment happen inside one synchronous call, so no other
//! task can observe or take the last slot in between.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use log::{debug, warn};

use super::types::{AgentId, SegmentIndex};

/// A capacity-bounded resource tracked by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Segment(SegmentIndex),
    Parking(AgentId),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Segment(index) => write!(f, "segment {}", index),
            ResourceKey::Parking(id) => write!(f, "parking {}", id),
        }
    }
}

/// Handle shared by every agent in one simulation
pub type SharedLedger = Rc<RefCell<ResourceLedger>>;

#[derive(Debug, Default)]
pub struct ResourceLedger {
    occupancy: HashMap<ResourceKey, u32>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLedger {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Reserves one slot if `occupancy < capacity`. A rejection leaves the
    /// ledger untouched.
    pub fn try_enter(&mut self, key: &ResourceKey, capacity: u32) -> bool {
        let current = self.occupancy(key);
        if current >= capacity {
            debug!("Admission to {} rejected ({}/{})", key, current, capacity);
            return false;
        }
        self.occupancy.insert(key.clone(), current + 1);
        true
    }

    /// Releases one slot, never going below zero
    pub fn leave(&mut self, key: &ResourceKey) {
        match self.occupancy.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.occupancy.remove(key);
                }
            }
            _ => warn!("Release of {} with no recorded occupancy ignored", key),
        }
    }

    pub fn occupancy(&self, key: &ResourceKey) -> u32 {
        self.occupancy.get(key).copied().unwrap_or(0)
    }

    /// Sum of all recorded occupancy
    pub fn total(&self) -> u32 {
        self.occupancy.values().sum()
    }
}
