//! Simulation world
//!
//! Owns the shared structures of a run, launches every agent described by
//! a [`MapConfig`] and drives the tick loop: stage the next vehicle onto
//! the map, occasionally ask the lead vehicle to park, then send `move` to
//! every vehicle on the map.
//!
//! Must be built and driven from inside a tokio `LocalSet`.

use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, info, warn};

use super::collision::PositionBoard;
use super::config::MapConfig;
use super::crossing::{CrossingHandle, CrossingOptions, PedestrianCrossing};
use super::error::{ConfigError, SimError};
use super::geometry::project_onto_segment;
use super::ledger::{ResourceKey, ResourceLedger, SharedLedger};
use super::message::{Command, Reply};
use super::parking::{ParkingArea, ParkingHandle, ParkingOptions};
use super::qlearning::{PolicySettings, PolicyStats};
use super::rng::RngFactory;
use super::road_network::RoadNetwork;
use super::runtime::{AgentRuntime, SimClock};
use super::stats::{SimulationSummary, StatsCollector};
use super::traffic_light::{
    GroupCoordinator, LightHandle, LightMode, LightOptions, SignalState, TrafficLightController,
};
use super::types::{AgentId, Landmarks, Position, SegmentIndex};
use super::vehicle::{Vehicle, VehicleEnv, VehicleSettings, VehicleSnapshot};

/// Ticks between `park` requests to the lead vehicle
pub const PARK_REQUEST_INTERVAL: u32 = 10;

/// Id the world uses as the source of its own messages
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// How a run is driven
#[derive(Debug, Clone)]
pub struct WorldOptions {
    /// Learning controllers instead of fixed timers
    pub use_rl: bool,
    pub policy: PolicySettings,
    pub seed: Option<u64>,
    pub clock: SimClock,
    pub vehicle: VehicleSettings,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            use_rl: false,
            policy: PolicySettings::default(),
            seed: None,
            clock: SimClock::default(),
            vehicle: VehicleSettings::default(),
        }
    }
}

/// A vehicle waiting to be placed on the map
#[derive(Debug, Clone)]
struct PendingVehicle {
    id: AgentId,
    segment: SegmentIndex,
    progress: f64,
}

#[derive(Debug, Clone)]
struct EnteredVehicle {
    id: AgentId,
    start: Position,
}

pub struct SimWorld {
    id: AgentId,
    runtime: AgentRuntime,
    clock: SimClock,
    use_rl: bool,
    network: Rc<RoadNetwork>,
    ledger: SharedLedger,
    board: PositionBoard,
    coordinator: GroupCoordinator,
    rng: RngFactory,
    env: VehicleEnv,
    settings: VehicleSettings,
    lights: Vec<(AgentId, LightHandle)>,
    crossings: Vec<(AgentId, CrossingHandle)>,
    parking: Vec<(AgentId, ParkingHandle)>,
    pending: VecDeque<PendingVehicle>,
    entered: Vec<EnteredVehicle>,
    vehicles_configured: usize,
    stats: StatsCollector,
    ticks: u32,
}

impl SimWorld {
    /// Builds the road network and launches every controller. Vehicles are
    /// queued and enter one at a time as the run progresses.
    pub fn build(config: MapConfig, options: WorldOptions) -> Result<Self, SimError> {
        config.validate()?;

        let network = Rc::new(RoadNetwork::build(config.segment_specs())?);
        let landmarks: Rc<Landmarks> = Rc::new(config.landmarks());
        let ledger = ResourceLedger::shared();
        let board = PositionBoard::new();
        let runtime = AgentRuntime::with_clock(&options.clock);
        let coordinator = GroupCoordinator::new();
        let rng = RngFactory::new(options.seed);
        let learning = options.use_rl.then_some(options.policy);
        let (reports, stats) = StatsCollector::channel();

        let mut lights = Vec::new();
        for light in &config.traffic_lights {
            let id = AgentId::new(light.id.as_str());
            let mode = match learning {
                Some(settings) => LightMode::Learning(settings),
                None => LightMode::Grouped(coordinator.clone()),
            };
            let handle = TrafficLightController::launch(
                id.clone(),
                LightOptions {
                    group: light.group,
                    change_time: light.change_time,
                },
                mode,
                &runtime,
                options.clock,
                rng.for_agent(&id),
            )?;
            lights.push((id, handle));
        }

        let mut crossings = Vec::new();
        for crossing in &config.crossings {
            let id = AgentId::new(crossing.id.as_str());
            let handle = PedestrianCrossing::launch(
                id.clone(),
                CrossingOptions {
                    road_type: crossing.road_type(),
                    fixed_duration: crossing.wait_time,
                    learning,
                },
                &runtime,
                options.clock,
                rng.for_agent(&id),
            )?;
            crossings.push((id, handle));
        }

        let mut parking = Vec::new();
        for area in &config.parking_areas {
            let id = AgentId::new(area.id.as_str());
            let handle = ParkingArea::launch(
                id.clone(),
                ParkingOptions {
                    capacity: area.capacity,
                    parking_time: area.parking_time,
                    exit_time: area.exit_time,
                    learning,
                },
                ledger.clone(),
                &runtime,
                options.clock,
                rng.for_agent(&id),
            )?;
            parking.push((id, handle));
        }

        let pending = place_vehicles(&config, &network)?;

        info!(
            "World ready: {} roads, {} turn options, {} lights, {} crossings, {} parking areas, {} vehicles",
            network.segment_count(),
            network.turn_option_count(),
            lights.len(),
            crossings.len(),
            parking.len(),
            pending.len()
        );
        if let Some(seed) = rng.seed() {
            info!("Random seed: {}", seed);
        }

        let env = VehicleEnv {
            network: network.clone(),
            ledger: ledger.clone(),
            landmarks,
            board: board.clone(),
            reports: Some(reports),
        };

        Ok(Self {
            id: AgentId::new(ORCHESTRATOR_ID),
            runtime,
            clock: options.clock,
            use_rl: options.use_rl,
            network,
            ledger,
            board,
            coordinator,
            rng,
            env,
            settings: options.vehicle,
            lights,
            crossings,
            parking,
            vehicles_configured: pending.len(),
            pending,
            entered: Vec::new(),
            stats,
            ticks: 0,
        })
    }

    /// One orchestrator step
    pub async fn tick(&mut self) -> Result<(), SimError> {
        let tick = self.ticks;
        self.ticks += 1;

        self.admit_next()?;

        if !self.parking.is_empty() && tick > 0 && tick % PARK_REQUEST_INTERVAL == 0 {
            if let Some(lead) = self.live_vehicles().into_iter().next() {
                match self.runtime.request(&self.id, Command::Park, &lead).await {
                    Ok(reply) => info!("Park request to {}: {}", lead, reply),
                    Err(err) => warn!("Park request to {} failed: {}", lead, err),
                }
            }
        }

        for vehicle in self.live_vehicles() {
            match self.runtime.request(&self.id, Command::Move, &vehicle).await {
                Ok(reply) => debug!("{}: {}", vehicle, reply),
                Err(err) => warn!("Move request to {} failed: {}", vehicle, err),
            }
        }

        self.stats.drain();
        Ok(())
    }

    /// Runs `seconds` ticks, one simulated second apart, and collects the
    /// final statistics
    pub async fn run(&mut self, seconds: u32) -> Result<SimulationSummary, SimError> {
        info!("Running simulation for {} seconds", seconds);
        for _ in 0..seconds {
            self.tick().await?;
            self.clock.sleep(1.0).await;
        }
        Ok(self.summary().await)
    }

    /// Places the next queued vehicle once the previous one has left its
    /// start point and the start segment admits it
    fn admit_next(&mut self) -> Result<(), SimError> {
        let Some(next) = self.pending.front() else {
            return Ok(());
        };

        if let Some(previous) = self.entered.last() {
            let still_at_start = self
                .board
                .position(&previous.id)
                .is_some_and(|position| position.distance(&previous.start) < 1e-6);
            if still_at_start {
                debug!("{} waits for {} to clear the start", next.id, previous.id);
                return Ok(());
            }
        }

        let capacity = self
            .network
            .segment(next.segment)
            .map(|segment| segment.capacity)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown segment {}", next.segment)))?;
        let key = ResourceKey::Segment(next.segment);
        if !self.ledger.borrow_mut().try_enter(&key, capacity) {
            debug!("{} waits for room on road {}", next.id, next.segment);
            return Ok(());
        }

        let Some(next) = self.pending.pop_front() else {
            return Ok(());
        };
        let vehicle = Vehicle::new(
            next.id.clone(),
            next.segment,
            next.progress,
            self.env.clone(),
            self.settings.clone(),
            self.rng.for_agent(&next.id),
        );
        let start = vehicle.position();
        if let Err(err) = vehicle.launch(&self.runtime) {
            self.ledger.borrow_mut().leave(&key);
            return Err(err.into());
        }

        info!(
            "Vehicle {} entered on road {} at {}",
            next.id, next.segment, start
        );
        self.entered.push(EnteredVehicle { id: next.id, start });
        Ok(())
    }

    /// Vehicles on the map that have not despawned, in entry order
    fn live_vehicles(&self) -> Vec<AgentId> {
        self.entered
            .iter()
            .filter(|vehicle| !self.stats.is_despawned(&vehicle.id))
            .map(|vehicle| vehicle.id.clone())
            .collect()
    }

    /// Snapshots of every live vehicle
    pub async fn vehicle_snapshots(&self) -> Vec<VehicleSnapshot> {
        let mut snapshots = Vec::new();
        for vehicle in self.live_vehicles() {
            match self
                .runtime
                .request(&self.id, Command::RequestState, &vehicle)
                .await
            {
                Ok(Reply::VehicleStatus(snapshot)) => snapshots.push(snapshot),
                Ok(other) => warn!("Unexpected state reply from {}: {}", vehicle, other),
                Err(err) => warn!("State request to {} failed: {}", vehicle, err),
            }
        }
        snapshots
    }

    /// Learning statistics of every controller; empty without learning
    pub async fn rl_stats(&self) -> Vec<(AgentId, PolicyStats)> {
        if !self.use_rl {
            return Vec::new();
        }

        let controllers = self
            .lights
            .iter()
            .map(|(id, _)| id)
            .chain(self.crossings.iter().map(|(id, _)| id))
            .chain(self.parking.iter().map(|(id, _)| id));

        let mut stats = Vec::new();
        for controller in controllers {
            match self
                .runtime
                .request(&self.id, Command::RequestRlStats, controller)
                .await
            {
                Ok(Reply::RlStats(policy)) => stats.push((controller.clone(), policy)),
                Ok(other) => debug!("{} has no learning statistics: {}", controller, other),
                Err(err) => warn!("Statistics request to {} failed: {}", controller, err),
            }
        }
        stats
    }

    pub async fn summary(&mut self) -> SimulationSummary {
        self.stats.drain();
        let live = self.vehicle_snapshots().await;
        let policies = self.rl_stats().await;
        self.stats.drain();
        self.stats.summarize(
            self.ticks,
            self.vehicles_configured,
            self.entered.len(),
            &live,
            policies,
        )
    }

    /// Cancels every agent task
    pub fn shutdown(&self) {
        self.runtime.stop();
        info!("Simulation stopped after {} ticks", self.ticks);
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn board(&self) -> &PositionBoard {
        &self.board
    }

    pub fn coordinator(&self) -> &GroupCoordinator {
        &self.coordinator
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn entered_count(&self) -> usize {
        self.entered.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn despawned_count(&self) -> usize {
        self.stats.despawned_count()
    }

    pub fn light_state(&self, id: &AgentId) -> Option<SignalState> {
        self.lights
            .iter()
            .find(|(light, _)| light == id)
            .map(|(_, handle)| handle.borrow().state)
    }

    pub fn crossing_queue(&self, id: &AgentId) -> Option<usize> {
        self.crossings
            .iter()
            .find(|(crossing, _)| crossing == id)
            .map(|(_, handle)| handle.borrow().queue_length())
    }

    pub fn parking_occupancy(&self, id: &AgentId) -> Option<u32> {
        self.parking
            .iter()
            .find(|(area, _)| area == id)
            .map(|(_, handle)| handle.borrow().occupancy())
    }
}

/// Start segment for every configured vehicle. Spawn vehicles rotate
/// through the spawn points; the others start on the road closest to
/// their coordinates.
fn place_vehicles(
    config: &MapConfig,
    network: &RoadNetwork,
) -> Result<VecDeque<PendingVehicle>, ConfigError> {
    let mut spawn_points = Vec::with_capacity(config.spawn_points.len());
    for point in &config.spawn_points {
        let segment = network
            .segment_by_name(&point.road_id)
            .ok_or_else(|| ConfigError::UnknownRoad {
                referrer: point.id.clone(),
                road: point.road_id.clone(),
            })?;
        let progress = project_onto_segment(
            Position::new(point.x, point.y),
            segment.start,
            segment.end,
        );
        spawn_points.push((segment.index, progress));
    }

    let mut next_spawn = 0;
    let mut pending = VecDeque::with_capacity(config.vehicles.len());
    for vehicle in &config.vehicles {
        let placement = if vehicle.spawn && !spawn_points.is_empty() {
            let placement = spawn_points[next_spawn % spawn_points.len()];
            next_spawn += 1;
            Some(placement)
        } else {
            network
                .find_closest_point_on_road(&vehicle.position())
                .map(|(segment, _, progress)| (segment, progress))
        };

        let (segment, progress) = placement.ok_or(ConfigError::NoRoads)?;
        pending.push_back(PendingVehicle {
            id: AgentId::new(vehicle.id.as_str()),
            segment,
            progress,
        });
    }
    Ok(pending)
}
