//! Parking areas
//!
//! A vehicle inside an area is in exactly one of three phases: entering
//! (parking timer running), parked (elapsed time counting up) or exiting
//! (exit timer running). Admission goes through the shared ledger; the
//! slot is only released once the exit timer has run out.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::MessagingError;
use super::ledger::{ResourceKey, ResourceLedger, SharedLedger};
use super::message::{Command, Message, Reply, Rejection};
use super::qlearning::{PolicySettings, QLearningPolicy, SharedPolicy};
use super::runtime::{Agent, AgentRuntime, SimClock};
use super::types::AgentId;

/// Parked time after which a vehicle is always told to leave
pub const FORCED_EXIT_AFTER: u32 = 15;
/// Parked time after which a vehicle may be told to leave
pub const OPTIONAL_EXIT_AFTER: u32 = 5;
/// Chance per second of an optional exit notification
pub const OPTIONAL_EXIT_PROBABILITY: f64 = 0.15;
/// Parked time the learned policy is expected to respect
pub const MIN_PARK_TIME: u32 = 2;

/// Actions of a learning parking area, decided per parked vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkingAction {
    Stay = 0,
    Exit = 1,
}

impl ParkingAction {
    const COUNT: usize = 2;

    fn from_index(index: usize) -> Self {
        if index == 1 {
            ParkingAction::Exit
        } else {
            ParkingAction::Stay
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParkingLot {
    pub key: ResourceKey,
    pub capacity: u32,
    pub parking_time: u32,
    pub exit_time: u32,
    /// Remaining parking time of vehicles still entering
    pub entering: BTreeMap<AgentId, u32>,
    /// Elapsed parked time
    pub parked: BTreeMap<AgentId, u32>,
    /// Remaining exit time
    pub exiting: BTreeMap<AgentId, u32>,
    /// Parked vehicles already told to leave
    pub notified: BTreeSet<AgentId>,
    pub total_admitted: u64,
    pub total_rejected: u64,
}

pub type ParkingHandle = Rc<RefCell<ParkingLot>>;

impl ParkingLot {
    pub fn new(id: &AgentId, capacity: u32, parking_time: u32, exit_time: u32) -> Self {
        Self {
            key: ResourceKey::Parking(id.clone()),
            capacity,
            parking_time,
            exit_time,
            entering: BTreeMap::new(),
            parked: BTreeMap::new(),
            exiting: BTreeMap::new(),
            notified: BTreeSet::new(),
            total_admitted: 0,
            total_rejected: 0,
        }
    }

    pub fn occupancy(&self) -> u32 {
        (self.entering.len() + self.parked.len() + self.exiting.len()) as u32
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity
    }

    pub fn contains(&self, vehicle: &AgentId) -> bool {
        self.entering.contains_key(vehicle)
            || self.parked.contains_key(vehicle)
            || self.exiting.contains_key(vehicle)
    }

    pub fn status(&self) -> Reply {
        Reply::ParkingStatus {
            occupancy: self.occupancy(),
            capacity: self.capacity,
        }
    }

    /// Admits `vehicle` if the ledger has a free slot, with a parking time
    /// of the configured time plus U(-0.5, 1.0), floored at one second
    pub fn request_park<R: Rng + ?Sized>(
        &mut self,
        vehicle: &AgentId,
        ledger: &mut ResourceLedger,
        rng: &mut R,
    ) -> Reply {
        if self.contains(vehicle) {
            return Reply::Rejected(Rejection::AlreadyPresent);
        }
        if !ledger.try_enter(&self.key, self.capacity) {
            self.total_rejected += 1;
            return Reply::Rejected(Rejection::ParkingFull {
                occupancy: ledger.occupancy(&self.key),
                capacity: self.capacity,
            });
        }

        let parking_time = jittered(self.parking_time, rng.random_range(-0.5..1.0));
        self.entering.insert(vehicle.clone(), parking_time);
        self.total_admitted += 1;
        Reply::ParkAccepted { parking_time }
    }

    /// Starts the exit of a parked vehicle, with an exit time of the
    /// configured time plus U(-0.2, 0.5), floored at one second
    pub fn request_exit<R: Rng + ?Sized>(&mut self, vehicle: &AgentId, rng: &mut R) -> Reply {
        if self.entering.contains_key(vehicle) {
            return Reply::Rejected(Rejection::StillParking);
        }
        if self.exiting.contains_key(vehicle) {
            return Reply::Rejected(Rejection::AlreadyExiting);
        }
        if self.parked.remove(vehicle).is_none() {
            return Reply::Rejected(Rejection::NotParkedHere);
        }

        self.notified.remove(vehicle);
        let exit_time = jittered(self.exit_time, rng.random_range(-0.2..0.5));
        self.exiting.insert(vehicle.clone(), exit_time);
        Reply::ExitAccepted { exit_time }
    }

    /// Counts down entering vehicles; those reaching zero become parked
    pub fn advance_entering(&mut self) {
        let mut done = Vec::new();
        for (vehicle, remaining) in self.entering.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                done.push(vehicle.clone());
            }
        }
        for vehicle in done {
            self.entering.remove(&vehicle);
            debug!("{} has completed parking", vehicle);
            self.parked.insert(vehicle, 0);
        }
    }

    /// Counts down exiting vehicles; those reaching zero leave and free
    /// their ledger slot
    pub fn advance_exiting(&mut self, ledger: &mut ResourceLedger) {
        let mut done = Vec::new();
        for (vehicle, remaining) in self.exiting.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                done.push(vehicle.clone());
            }
        }
        for vehicle in done {
            self.exiting.remove(&vehicle);
            ledger.leave(&self.key);
            debug!("{} has completed exiting", vehicle);
        }
    }

    /// Ages parked vehicles and picks the ones to notify: always after 15
    /// seconds, with 15% chance per second after 5
    pub fn due_exits<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<AgentId> {
        let mut due = Vec::new();
        for (vehicle, elapsed) in self.parked.iter_mut() {
            *elapsed += 1;
            if self.notified.contains(vehicle) {
                continue;
            }
            if *elapsed > FORCED_EXIT_AFTER
                || (*elapsed > OPTIONAL_EXIT_AFTER && rng.random_bool(OPTIONAL_EXIT_PROBABILITY))
            {
                due.push(vehicle.clone());
            }
        }
        self.notified.extend(due.iter().cloned());
        due
    }

    /// Ages parked vehicles and lets the policy decide stay/exit for each
    /// vehicle not yet notified
    pub fn learned_exits(&mut self, policy: &mut QLearningPolicy) -> Vec<AgentId> {
        let full = self.is_full();
        let mut due = Vec::new();
        for (vehicle, elapsed) in self.parked.iter_mut() {
            *elapsed += 1;
            if self.notified.contains(vehicle) {
                continue;
            }

            let action = ParkingAction::from_index(policy.choose());
            let reward = match action {
                ParkingAction::Stay if *elapsed < MIN_PARK_TIME => 1.0,
                ParkingAction::Stay => -1.0,
                ParkingAction::Exit if *elapsed < MIN_PARK_TIME => -2.0,
                ParkingAction::Exit => {
                    due.push(vehicle.clone());
                    if full {
                        5.0
                    } else {
                        3.0
                    }
                }
            };
            policy.update(action as usize, reward);
        }
        self.notified.extend(due.iter().cloned());
        due
    }
}

fn jittered(base: u32, jitter: f64) -> u32 {
    ((base as f64 + jitter).trunc() as u32).max(1)
}

/// Construction parameters of a parking area
#[derive(Debug, Clone)]
pub struct ParkingOptions {
    pub capacity: u32,
    pub parking_time: u32,
    pub exit_time: u32,
    /// Learning exit policy when set
    pub learning: Option<PolicySettings>,
}

impl Default for ParkingOptions {
    fn default() -> Self {
        Self {
            capacity: 3,
            parking_time: 2,
            exit_time: 1,
            learning: None,
        }
    }
}

pub struct ParkingArea {
    id: AgentId,
    lot: ParkingHandle,
    ledger: SharedLedger,
    policy: Option<SharedPolicy>,
    rng: StdRng,
}

impl ParkingArea {
    /// Registers the area and starts its timer loop
    pub fn launch(
        id: AgentId,
        options: ParkingOptions,
        ledger: SharedLedger,
        runtime: &AgentRuntime,
        clock: SimClock,
        mut rng: StdRng,
    ) -> Result<ParkingHandle, MessagingError> {
        let lot = Rc::new(RefCell::new(ParkingLot::new(
            &id,
            options.capacity,
            options.parking_time,
            options.exit_time,
        )));
        let loop_rng = StdRng::from_rng(&mut rng);
        let policy = options.learning.map(|settings| {
            QLearningPolicy::new(ParkingAction::COUNT, settings, StdRng::from_rng(&mut rng))
                .shared()
        });

        runtime.register(
            id.clone(),
            ParkingArea {
                id: id.clone(),
                lot: lot.clone(),
                ledger: ledger.clone(),
                policy: policy.clone(),
                rng,
            },
        )?;

        runtime.spawn_background(parking_loop(
            id.clone(),
            lot.clone(),
            ledger,
            policy,
            runtime.clone(),
            clock,
            loop_rng,
        ));

        info!(
            "Parking area {} ready (capacity {}, parking {}s, exit {}s)",
            id, options.capacity, options.parking_time, options.exit_time
        );
        Ok(lot)
    }
}

async fn parking_loop(
    id: AgentId,
    lot: ParkingHandle,
    ledger: SharedLedger,
    policy: Option<SharedPolicy>,
    runtime: AgentRuntime,
    clock: SimClock,
    mut rng: StdRng,
) {
    loop {
        clock.sleep(1.0).await;

        let due = {
            let mut lot = lot.borrow_mut();
            lot.advance_entering();
            let due = match &policy {
                Some(policy) => lot.learned_exits(&mut policy.borrow_mut()),
                None => lot.due_exits(&mut rng),
            };
            lot.advance_exiting(&mut ledger.borrow_mut());
            due
        };

        for vehicle in due {
            match runtime
                .request(&id, Command::ExitNotification, &vehicle)
                .await
            {
                Ok(reply) => debug!("{}: notified {} to exit: {}", id, vehicle, reply),
                Err(err) => warn!("{}: exit notification to {} failed: {}", id, vehicle, err),
            }
        }
    }
}

impl Agent for ParkingArea {
    async fn handle(&mut self, command: Command, message: &Message, _: &AgentRuntime) -> Reply {
        let vehicle = &message.source;
        let reply = match command {
            Command::RequestState => self.lot.borrow().status(),
            Command::Park => {
                self.lot
                    .borrow_mut()
                    .request_park(vehicle, &mut self.ledger.borrow_mut(), &mut self.rng)
            }
            Command::Exit | Command::Unpark => {
                self.lot.borrow_mut().request_exit(vehicle, &mut self.rng)
            }
            Command::UpdateEpsilon(epsilon) => match &self.policy {
                Some(policy) => match policy.borrow_mut().set_epsilon(epsilon) {
                    Ok(()) => Reply::Ack(format!("Epsilon updated to {}", epsilon)),
                    Err(err) => Reply::Invalid(err.to_string()),
                },
                None => Reply::invalid_command(),
            },
            Command::UpdateLearning(rate) => match &self.policy {
                Some(policy) => match policy.borrow_mut().set_learning_rate(rate) {
                    Ok(()) => Reply::Ack(format!("Learning rate updated to {}", rate)),
                    Err(err) => Reply::Invalid(err.to_string()),
                },
                None => Reply::invalid_command(),
            },
            Command::RequestRlStats => match &self.policy {
                Some(policy) => Reply::RlStats(policy.borrow().stats()),
                None => Reply::invalid_command(),
            },
            _ => Reply::invalid_command(),
        };

        match &reply {
            Reply::ParkAccepted { .. } | Reply::ExitAccepted { .. } => {
                info!("{} -> {}: {}", self.id, vehicle, reply)
            }
            _ => debug!("{} -> {}: {}", self.id, vehicle, reply),
        }
        reply
    }
}
