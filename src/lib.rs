//! Traffic Agents Library
//!
//! An agent-based traffic simulation: vehicles negotiate with traffic
//! lights, pedestrian crossings and parking areas over a road network.

pub mod simulation;
