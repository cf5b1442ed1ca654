//! Vehicle agents
//!
//! A vehicle drives along its segment in fixed progress steps, turns onto
//! a successor at the segment end, and may stop at a parking area on the
//! way. Each `move` message drives exactly one transition attempt. Before
//! advancing, the vehicle asks nearby lights and crossings whether it may
//! go; any segment change is admitted through the shared ledger.
//!
//! Ledger order is acquire-then-release: the target segment is reserved
//! when a turn starts and the old segment is only released when the turn
//! completes, so a cancelled run never leaves a vehicle unaccounted for.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::Rng;
use tokio::sync::mpsc;

use super::collision::{CollisionPolicy, PositionBoard};
use super::error::MessagingError;
use super::geometry::turn_position;
use super::ledger::{ResourceKey, SharedLedger};
use super::message::{Command, Message, Reply};
use super::road_network::{RoadNetwork, RoadSegment};
use super::runtime::{Agent, AgentRuntime};
use super::traffic_light::SignalState;
use super::types::{
    AgentId, Landmarks, Position, SegmentIndex, OBSTACLE_RADIUS, PARKING_SEARCH_RADIUS,
};

/// Slack when comparing progress against the end of a segment or turn
const PROGRESS_EPSILON: f64 = 1e-9;

/// Tunables of vehicle behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSettings {
    /// Progress gained per move along a segment
    pub movement_step: f64,
    /// Progress gained per move through a turn
    pub turn_step: f64,
    /// Chance per move to try a nearby parking area
    pub parking_desire: f64,
    /// Chance per move that a parked vehicle leaves on its own
    pub self_exit_probability: f64,
    /// Progress past which a vehicle on a despawn segment leaves
    pub despawn_progress: f64,
    /// Visits of one segment after which the vehicle is considered looping
    pub revisit_limit: usize,
    pub max_steps: u32,
    /// Moves after leaving a parking area before parking is tried again
    pub parking_cooldown: u32,
    /// Moves to wait after a full target segment before choosing again
    pub turn_retry_cooldown: u32,
    /// Number of recently used parking areas that are skipped
    pub recent_parking_memory: usize,
    pub collision: CollisionPolicy,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            movement_step: 0.1,
            turn_step: 0.5,
            parking_desire: 0.3,
            self_exit_probability: 0.2,
            despawn_progress: 0.95,
            revisit_limit: 3,
            max_steps: 500,
            parking_cooldown: 10,
            turn_retry_cooldown: 2,
            recent_parking_memory: 3,
            collision: CollisionPolicy::Disabled,
        }
    }
}

/// Read-only world shared by every vehicle, plus the despawn report sink
#[derive(Clone)]
pub struct VehicleEnv {
    pub network: Rc<RoadNetwork>,
    pub ledger: SharedLedger,
    pub landmarks: Rc<Landmarks>,
    pub board: PositionBoard,
    pub reports: Option<mpsc::UnboundedSender<VehicleReport>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Driving,
    Parking,
    Parked,
    Exiting,
    Despawned,
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveState::Driving => "driving",
            DriveState::Parking => "parking",
            DriveState::Parked => "parked",
            DriveState::Exiting => "exiting",
            DriveState::Despawned => "despawned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DespawnReason {
    ReachedExit,
    Looping,
    StepLimit,
}

impl fmt::Display for DespawnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DespawnReason::ReachedExit => f.write_str("reached a despawn point"),
            DespawnReason::Looping => f.write_str("looping"),
            DespawnReason::StepLimit => f.write_str("step limit"),
        }
    }
}

/// Why a vehicle did not move this tick
#[derive(Debug, Clone, PartialEq)]
pub enum WaitReason {
    RedLight(AgentId),
    CrossingOccupied(AgentId),
    Collision,
    SegmentFull(SegmentIndex),
    TurnCooldown,
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitReason::RedLight(light) => write!(f, "red light {}", light),
            WaitReason::CrossingOccupied(crossing) => write!(f, "occupied crossing {}", crossing),
            WaitReason::Collision => f.write_str("potential collision"),
            WaitReason::SegmentFull(segment) => write!(f, "road {} at capacity", segment),
            WaitReason::TurnCooldown => f.write_str("waiting to retry turn"),
        }
    }
}

/// Result of one command handled by a vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Advanced { segment: SegmentIndex, progress: f64 },
    TurnStarted { target: SegmentIndex },
    Turning { target: SegmentIndex, progress: f64 },
    TurnCompleted { segment: SegmentIndex, position: Position },
    Waiting { reason: WaitReason, wait: u32 },
    Holding { segment: SegmentIndex },
    ParkingStarted { area: AgentId, parking_time: u32 },
    ParkingRejected { area: AgentId, reason: String },
    StillParking { remaining: u32 },
    ParkingCompleted { area: AgentId },
    Parked { area: AgentId },
    ExitStarted { area: AgentId, exit_time: u32 },
    ExitRejected { area: AgentId, reason: String },
    StillExiting { remaining: u32 },
    ExitCompleted,
    NoParking,
    Refused { action: &'static str, state: DriveState },
    Despawned { reason: DespawnReason },
    Inert,
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveOutcome::Advanced { segment, progress } => {
                write!(f, "Vehicle moving along road segment {} ({:.1})", segment, progress)
            }
            MoveOutcome::TurnStarted { target } => write!(f, "Vehicle turning onto road {}", target),
            MoveOutcome::Turning { target, progress } => {
                write!(f, "Vehicle turning onto road {} ({:.1})", target, progress)
            }
            MoveOutcome::TurnCompleted { segment, position } => {
                write!(f, "Vehicle completed turn onto road {} at {}", segment, position)
            }
            MoveOutcome::Waiting { reason, wait } => {
                write!(f, "Waiting due to {}. Wait time: {} sec.", reason, wait)
            }
            MoveOutcome::Holding { segment } => {
                write!(f, "No further road segment to follow from road {}", segment)
            }
            MoveOutcome::ParkingStarted { area, parking_time } => write!(
                f,
                "Vehicle found parking at {}, parking time {}s",
                area, parking_time
            ),
            MoveOutcome::ParkingRejected { area, reason } => {
                write!(f, "Parking rejected at {}: {}", area, reason)
            }
            MoveOutcome::StillParking { remaining } => {
                write!(f, "Still parking... {}s remaining", remaining)
            }
            MoveOutcome::ParkingCompleted { area } => write!(f, "Completed parking at {}", area),
            MoveOutcome::Parked { area } => write!(f, "Vehicle is parked at {}", area),
            MoveOutcome::ExitStarted { area, exit_time } => write!(
                f,
                "Initiating exit from parking at {}, exit time {}s",
                area, exit_time
            ),
            MoveOutcome::ExitRejected { area, reason } => {
                write!(f, "Exit rejected from {}: {}", area, reason)
            }
            MoveOutcome::StillExiting { remaining } => {
                write!(f, "Still exiting... {}s remaining", remaining)
            }
            MoveOutcome::ExitCompleted => f.write_str("Completed exiting from parking"),
            MoveOutcome::NoParking => f.write_str("No parking areas available"),
            MoveOutcome::Refused { action, state } => {
                write!(f, "Cannot {} now. Current state: {}", action, state)
            }
            MoveOutcome::Despawned { reason } => write!(f, "Vehicle despawned: {}", reason),
            MoveOutcome::Inert => f.write_str("Vehicle has left the simulation"),
        }
    }
}

/// Diagnostic view answered to `request_state`
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub id: AgentId,
    pub segment: SegmentIndex,
    pub progress: f64,
    pub position: Position,
    pub state: DriveState,
    pub turning: bool,
    pub target_parking: Option<AgentId>,
    pub current_wait: u32,
    pub wait_times: Vec<u32>,
    pub route: Vec<SegmentIndex>,
    pub steps: u32,
}

impl fmt::Display for VehicleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on road {} ({:.2}) at {}, {}, waits {:?}",
            self.id, self.segment, self.progress, self.position, self.state, self.wait_times
        )
    }
}

/// Sent to the aggregator when a vehicle leaves the simulation
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleReport {
    pub id: AgentId,
    pub reason: DespawnReason,
    pub wait_times: Vec<u32>,
    pub route: Vec<SegmentIndex>,
    pub steps: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Turn {
    target: SegmentIndex,
    origin: Position,
    junction: Position,
    destination: Position,
    progress: f64,
}

pub struct Vehicle {
    id: AgentId,
    segment: SegmentIndex,
    progress: f64,
    position: Position,
    turn: Option<Turn>,
    state: DriveState,
    target_parking: Option<AgentId>,
    parking_timer: u32,
    current_wait: u32,
    wait_times: Vec<u32>,
    route: Vec<SegmentIndex>,
    recent_parking: VecDeque<AgentId>,
    parking_cooldown: u32,
    turn_cooldown: u32,
    steps: u32,
    dead_end_warned: bool,
    env: VehicleEnv,
    settings: VehicleSettings,
    rng: StdRng,
}

impl Vehicle {
    /// Places a vehicle on `segment`. The caller must already hold a ledger
    /// slot on that segment for it.
    pub fn new(
        id: AgentId,
        segment: SegmentIndex,
        progress: f64,
        env: VehicleEnv,
        settings: VehicleSettings,
        rng: StdRng,
    ) -> Self {
        let progress = progress.clamp(0.0, 1.0);
        let position = env
            .network
            .segment(segment)
            .map(|road| road.point_at(progress))
            .unwrap_or_default();

        Self {
            id,
            segment,
            progress,
            position,
            turn: None,
            state: DriveState::Driving,
            target_parking: None,
            parking_timer: 0,
            current_wait: 0,
            wait_times: Vec::new(),
            route: vec![segment],
            recent_parking: VecDeque::new(),
            parking_cooldown: 0,
            turn_cooldown: 0,
            steps: 0,
            dead_end_warned: false,
            env,
            settings,
            rng,
        }
    }

    /// Registers the vehicle with the runtime and publishes its position
    pub fn launch(self, runtime: &AgentRuntime) -> Result<(), MessagingError> {
        self.env.board.update(&self.id, self.position);
        let id = self.id.clone();
        runtime.register(id, self)
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            id: self.id.clone(),
            segment: self.segment,
            progress: self.progress,
            position: self.position,
            state: self.state,
            turning: self.turn.is_some(),
            target_parking: self.target_parking.clone(),
            current_wait: self.current_wait,
            wait_times: self.wait_times.clone(),
            route: self.route.clone(),
            steps: self.steps,
        }
    }

    /// One state-machine tick
    pub async fn step(&mut self, runtime: &AgentRuntime) -> MoveOutcome {
        if self.state == DriveState::Despawned {
            return MoveOutcome::Inert;
        }
        self.steps += 1;

        match self.state {
            DriveState::Parked => {
                if self.rng.random_bool(self.settings.self_exit_probability) {
                    self.request_exit(runtime).await
                } else {
                    MoveOutcome::Parked {
                        area: self.parking_area(),
                    }
                }
            }
            DriveState::Parking => {
                self.parking_timer = self.parking_timer.saturating_sub(1);
                if self.parking_timer == 0 {
                    self.state = DriveState::Parked;
                    MoveOutcome::ParkingCompleted {
                        area: self.parking_area(),
                    }
                } else {
                    MoveOutcome::StillParking {
                        remaining: self.parking_timer,
                    }
                }
            }
            DriveState::Exiting => {
                self.parking_timer = self.parking_timer.saturating_sub(1);
                if self.parking_timer == 0 {
                    self.finish_exit();
                    MoveOutcome::ExitCompleted
                } else {
                    MoveOutcome::StillExiting {
                        remaining: self.parking_timer,
                    }
                }
            }
            DriveState::Driving => self.drive(runtime).await,
            DriveState::Despawned => MoveOutcome::Inert,
        }
    }

    async fn drive(&mut self, runtime: &AgentRuntime) -> MoveOutcome {
        if self.turn.is_none() {
            if let Some(reason) = self.despawn_reason() {
                return self.despawn(reason);
            }
        }
        self.parking_cooldown = self.parking_cooldown.saturating_sub(1);

        let probe = match &self.turn {
            Some(turn) => turn.junction,
            None => self.position,
        };
        if let Some(reason) = self.check_obstacles(probe, runtime).await {
            return self.wait(reason);
        }

        let candidate = self.candidate_position();
        if self
            .settings
            .collision
            .blocks(&self.env.board, &self.id, &candidate)
        {
            return self.wait(WaitReason::Collision);
        }

        if self.turn.is_some() {
            return self.continue_turn();
        }

        if let Some(outcome) = self.try_park_nearby(runtime).await {
            return outcome;
        }

        self.advance()
    }

    /// Where the vehicle would be after moving this tick
    fn candidate_position(&self) -> Position {
        if let Some(turn) = &self.turn {
            let progress = (turn.progress + self.settings.turn_step).min(1.0);
            return turn_position(turn.origin, turn.junction, turn.destination, progress);
        }
        let progress = (self.progress + self.settings.movement_step).min(1.0);
        self.current_road()
            .map(|road| road.point_at(progress))
            .unwrap_or(self.position)
    }

    fn current_road(&self) -> Option<&RoadSegment> {
        self.env.network.segment(self.segment)
    }

    fn advance(&mut self) -> MoveOutcome {
        let Some(road) = self.env.network.segment(self.segment) else {
            return MoveOutcome::Holding {
                segment: self.segment,
            };
        };
        let (end, is_despawn) = (road.end, road.is_despawn);

        let next = self.progress + self.settings.movement_step;
        if next < 1.0 - PROGRESS_EPSILON {
            self.progress = next;
            let position = road.point_at(next);
            self.set_position(position);
            self.record_movement();
            if let Some(reason) = self.despawn_reason() {
                return self.despawn(reason);
            }
            return MoveOutcome::Advanced {
                segment: self.segment,
                progress: self.progress,
            };
        }

        if self.progress < 1.0 {
            self.progress = 1.0;
            self.set_position(end);
            self.record_movement();
            if let Some(reason) = self.despawn_reason() {
                return self.despawn(reason);
            }
        }

        if self.turn_cooldown > 0 {
            self.turn_cooldown -= 1;
            return self.wait(WaitReason::TurnCooldown);
        }

        let network = self.env.network.clone();
        let Some(option) = network.choose_turn(self.segment, &mut self.rng) else {
            if is_despawn {
                return self.despawn(DespawnReason::ReachedExit);
            }
            if !self.dead_end_warned {
                warn!(
                    "{}: road {} has no legal successor, holding in place",
                    self.id, self.segment
                );
                self.dead_end_warned = true;
            }
            return MoveOutcome::Holding {
                segment: self.segment,
            };
        };

        let Some(target) = network.segment(option.target) else {
            return MoveOutcome::Holding {
                segment: self.segment,
            };
        };

        let admitted = self
            .env
            .ledger
            .borrow_mut()
            .try_enter(&ResourceKey::Segment(target.index), target.capacity);
        if !admitted {
            self.turn_cooldown = self.settings.turn_retry_cooldown;
            return self.wait(WaitReason::SegmentFull(target.index));
        }

        debug!(
            "{} turning from road {} onto road {} at {}",
            self.id, self.segment, target.index, option.junction
        );
        self.turn = Some(Turn {
            target: target.index,
            origin: self.position,
            junction: option.junction,
            destination: target.start,
            progress: 0.0,
        });
        self.record_movement();
        MoveOutcome::TurnStarted {
            target: target.index,
        }
    }

    fn continue_turn(&mut self) -> MoveOutcome {
        let Some(mut turn) = self.turn.take() else {
            return self.advance();
        };
        turn.progress = (turn.progress + self.settings.turn_step).min(1.0);
        self.record_movement();

        if turn.progress < 1.0 - PROGRESS_EPSILON {
            let position = turn_position(turn.origin, turn.junction, turn.destination, turn.progress);
            self.set_position(position);
            let outcome = MoveOutcome::Turning {
                target: turn.target,
                progress: turn.progress,
            };
            self.turn = Some(turn);
            return outcome;
        }

        self.env
            .ledger
            .borrow_mut()
            .leave(&ResourceKey::Segment(self.segment));
        self.segment = turn.target;
        self.progress = 0.0;
        self.set_position(turn.destination);
        self.route.push(turn.target);

        if let Some(reason) = self.despawn_reason() {
            return self.despawn(reason);
        }
        MoveOutcome::TurnCompleted {
            segment: self.segment,
            position: self.position,
        }
    }

    async fn check_obstacles(&self, at: Position, runtime: &AgentRuntime) -> Option<WaitReason> {
        let landmarks = self.env.landmarks.clone();

        for light in landmarks.lights_near(&at, OBSTACLE_RADIUS) {
            match runtime
                .request(&self.id, Command::RequestState, &light.id)
                .await
            {
                Ok(Reply::Signal(SignalState::Red)) => {
                    debug!("{} stopped at red light {}", self.id, light.id);
                    return Some(WaitReason::RedLight(light.id.clone()));
                }
                Ok(_) => {}
                Err(err) => warn!("{}: ignoring light {}: {}", self.id, light.id, err),
            }
        }

        for crossing in landmarks.crossings_near(&at, OBSTACLE_RADIUS) {
            match runtime
                .request(&self.id, Command::RequestState, &crossing.id)
                .await
            {
                Ok(Reply::Crossing { occupied: true, .. }) => {
                    debug!("{} stopped at occupied crossing {}", self.id, crossing.id);
                    return Some(WaitReason::CrossingOccupied(crossing.id.clone()));
                }
                Ok(_) => {}
                Err(err) => warn!("{}: ignoring crossing {}: {}", self.id, crossing.id, err),
            }
        }

        None
    }

    /// Occasionally tries the nearby parking areas that were not used
    /// recently. `None` when the vehicle keeps driving.
    async fn try_park_nearby(&mut self, runtime: &AgentRuntime) -> Option<MoveOutcome> {
        if self.parking_cooldown > 0 || self.env.landmarks.parking_areas.is_empty() {
            return None;
        }
        if !self.rng.random_bool(self.settings.parking_desire) {
            return None;
        }

        let candidates: Vec<AgentId> = self
            .env
            .landmarks
            .parking_near(&self.position, PARKING_SEARCH_RADIUS)
            .into_iter()
            .filter(|area| !self.recent_parking.contains(&area.id))
            .map(|area| area.id.clone())
            .collect();

        for area in candidates {
            match self.request_park(&area, runtime).await {
                outcome @ MoveOutcome::ParkingStarted { .. } => return Some(outcome),
                outcome => debug!("{}: {}", self.id, outcome),
            }
        }
        None
    }

    async fn request_park(&mut self, area: &AgentId, runtime: &AgentRuntime) -> MoveOutcome {
        match runtime.request(&self.id, Command::Park, area).await {
            Ok(Reply::ParkAccepted { parking_time }) => {
                self.state = DriveState::Parking;
                self.target_parking = Some(area.clone());
                self.parking_timer = parking_time.max(1);
                self.record_movement();
                info!(
                    "{} starting to park at {}, time: {}s",
                    self.id, area, parking_time
                );
                MoveOutcome::ParkingStarted {
                    area: area.clone(),
                    parking_time,
                }
            }
            Ok(reply) => MoveOutcome::ParkingRejected {
                area: area.clone(),
                reason: reply.to_string(),
            },
            Err(err) => {
                warn!("{}: parking request to {} failed: {}", self.id, area, err);
                MoveOutcome::ParkingRejected {
                    area: area.clone(),
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn request_exit(&mut self, runtime: &AgentRuntime) -> MoveOutcome {
        let Some(area) = self.target_parking.clone() else {
            return MoveOutcome::Refused {
                action: "exit",
                state: self.state,
            };
        };

        match runtime.request(&self.id, Command::Exit, &area).await {
            Ok(Reply::ExitAccepted { exit_time }) => {
                self.state = DriveState::Exiting;
                self.parking_timer = exit_time.max(1);
                info!(
                    "{} starting to exit from {}, time: {}s",
                    self.id, area, exit_time
                );
                MoveOutcome::ExitStarted { area, exit_time }
            }
            Ok(reply) => MoveOutcome::ExitRejected {
                area,
                reason: reply.to_string(),
            },
            Err(err) => {
                warn!("{}: exit request to {} failed: {}", self.id, area, err);
                MoveOutcome::ExitRejected {
                    reason: err.to_string(),
                    area,
                }
            }
        }
    }

    fn finish_exit(&mut self) {
        self.state = DriveState::Driving;
        if let Some(area) = self.target_parking.take() {
            self.recent_parking.push_back(area);
            while self.recent_parking.len() > self.settings.recent_parking_memory {
                self.recent_parking.pop_front();
            }
        }
        self.parking_cooldown = self.settings.parking_cooldown;
    }

    /// `park` command: head for the nearest parking area, however far
    async fn park_command(&mut self, runtime: &AgentRuntime) -> MoveOutcome {
        if self.state != DriveState::Driving || self.turn.is_some() {
            return MoveOutcome::Refused {
                action: "park",
                state: self.state,
            };
        }
        let Some(area) = self
            .env
            .landmarks
            .nearest_parking(&self.position)
            .map(|area| area.id.clone())
        else {
            return MoveOutcome::NoParking;
        };
        self.request_park(&area, runtime).await
    }

    /// `unpark`, `exit` and `exit_notification`
    async fn exit_command(&mut self, runtime: &AgentRuntime) -> MoveOutcome {
        if self.state != DriveState::Parked {
            return MoveOutcome::Refused {
                action: "exit parking",
                state: self.state,
            };
        }
        self.request_exit(runtime).await
    }

    fn parking_area(&self) -> AgentId {
        self.target_parking
            .clone()
            .unwrap_or_else(|| AgentId::new("unknown"))
    }

    fn despawn_reason(&self) -> Option<DespawnReason> {
        if self.steps > self.settings.max_steps {
            return Some(DespawnReason::StepLimit);
        }
        let on_exit = self
            .current_road()
            .is_some_and(|road| road.is_despawn && self.progress > self.settings.despawn_progress);
        if on_exit {
            return Some(DespawnReason::ReachedExit);
        }
        let visits = self
            .route
            .iter()
            .filter(|segment| **segment == self.segment)
            .count();
        if visits >= self.settings.revisit_limit {
            return Some(DespawnReason::Looping);
        }
        None
    }

    /// Leaves the simulation for good: frees the ledger, moves off the map
    /// and reports to the aggregator. Idempotent.
    pub fn despawn(&mut self, reason: DespawnReason) -> MoveOutcome {
        if self.state == DriveState::Despawned {
            return MoveOutcome::Inert;
        }

        let mut ledger = self.env.ledger.borrow_mut();
        if let Some(turn) = self.turn.take() {
            ledger.leave(&ResourceKey::Segment(turn.target));
        }
        ledger.leave(&ResourceKey::Segment(self.segment));
        drop(ledger);

        if self.current_wait > 0 {
            self.wait_times.push(std::mem::take(&mut self.current_wait));
        }
        self.state = DriveState::Despawned;
        self.position = Position::OFF_MAP;
        self.env.board.remove(&self.id);

        if let Some(reports) = &self.env.reports {
            let report = VehicleReport {
                id: self.id.clone(),
                reason,
                wait_times: self.wait_times.clone(),
                route: self.route.clone(),
                steps: self.steps,
            };
            if reports.send(report).is_err() {
                debug!("{}: no aggregator listening for despawn report", self.id);
            }
        }

        info!(
            "{} despawned ({}) after {} steps, route {:?}",
            self.id, reason, self.steps, self.route
        );
        MoveOutcome::Despawned { reason }
    }

    fn wait(&mut self, reason: WaitReason) -> MoveOutcome {
        self.current_wait += 1;
        MoveOutcome::Waiting {
            reason,
            wait: self.current_wait,
        }
    }

    /// Closes a pending wait incident, if any
    fn record_movement(&mut self) {
        if self.current_wait > 0 {
            self.wait_times.push(std::mem::take(&mut self.current_wait));
        }
    }

    fn set_position(&mut self, position: Position) {
        self.position = position;
        self.env.board.update(&self.id, position);
    }
}

impl Agent for Vehicle {
    async fn handle(&mut self, command: Command, message: &Message, runtime: &AgentRuntime) -> Reply {
        if self.state == DriveState::Despawned && command != Command::RequestState {
            return Reply::Moved(MoveOutcome::Inert);
        }

        let outcome = match command {
            Command::Move => self.step(runtime).await,
            Command::Park => self.park_command(runtime).await,
            Command::Unpark | Command::Exit | Command::ExitNotification => {
                self.exit_command(runtime).await
            }
            Command::RequestState => return Reply::VehicleStatus(self.snapshot()),
            _ => {
                debug!("{}: ignoring {:?} from {}", self.id, command, message.source);
                return Reply::invalid_command();
            }
        };
        debug!("{} -> {}: {}", self.id, message.source, outcome);
        Reply::Moved(outcome)
    }
}
