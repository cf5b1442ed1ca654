//! Agent-based traffic simulation engine
//!
//! Vehicles, traffic lights, pedestrian crossings and parking areas run as
//! independent agents on a single-threaded tokio `LocalSet` and talk to
//! each other through request/response messages. [`SimWorld`] builds a run
//! from a [`MapConfig`] and drives it tick by tick.

mod collision;
mod config;
mod crossing;
mod error;
mod geometry;
mod ledger;
mod message;
mod parking;
mod qlearning;
mod rng;
mod road_network;
mod runtime;
mod stats;
mod traffic_light;
mod types;
mod vehicle;
mod world;

// Re-export public types for external use
pub use collision::{CollisionPolicy, PositionBoard};
pub use config::{
    ConfigOverrides, CrossingConfig, LightConfig, MapConfig, ParkingConfig, RoadConfig,
    ScenarioMode, SpawnPointConfig, VehicleConfig,
};
pub use crossing::{
    sample_arrivals, CrossingAction, CrossingHandle, CrossingOptions, CrossingStatus,
    PedestrianCrossing, RoadType, ARRIVAL_PROBABILITY, BATCH_CONTINUE_PROBABILITY,
    EARLY_STOP_PENALTY,
};
pub use error::{ConfigError, DecodeError, MessagingError, PolicyError, SimError};
pub use geometry::{
    cardinal_direction, ease_in_out, project_onto_segment, segment_intersection, turn_position,
};
pub use ledger::{ResourceKey, ResourceLedger, SharedLedger};
pub use message::{Command, Message, Rejection, Reply};
pub use parking::{
    ParkingArea, ParkingHandle, ParkingLot, ParkingOptions, FORCED_EXIT_AFTER, MIN_PARK_TIME,
    OPTIONAL_EXIT_AFTER, OPTIONAL_EXIT_PROBABILITY,
};
pub use qlearning::{PolicySettings, PolicyStats, QLearningPolicy, SharedPolicy};
pub use rng::RngFactory;
pub use road_network::{
    RoadNetwork, RoadSegment, SegmentSpec, TurnKind, TurnOption, STRAIGHT_WEIGHT, TURN_WEIGHT,
    U_TURN_WEIGHT, WEIGHTED_CHOICE_PROBABILITY,
};
pub use runtime::{Agent, AgentRuntime, SimClock, REQUEST_TIMEOUT_SECONDS};
pub use stats::{SimulationSummary, StatsCollector, VehicleStats};
pub use traffic_light::{
    GroupCoordinator, LightGroup, LightHandle, LightMode, LightOptions, LightStatus, SignalState,
    TrafficLightController, CHANGE_TIME_JITTER, DECISION_INTERVAL, MIN_CHANGE_TIME,
};
pub use types::{
    AgentId, Direction, Landmark, Landmarks, Position, SegmentIndex, CONNECTION_SNAP_DISTANCE,
    OBSTACLE_RADIUS, PARKING_SEARCH_RADIUS,
};
pub use vehicle::{
    DespawnReason, DriveState, MoveOutcome, Vehicle, VehicleEnv, VehicleReport, VehicleSettings,
    VehicleSnapshot, WaitReason,
};
pub use world::{SimWorld, WorldOptions, ORCHESTRATOR_ID, PARK_REQUEST_INTERVAL};
