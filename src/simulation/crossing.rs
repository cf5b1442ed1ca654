//! Pedestrian crossings
//!
//! A crossing keeps a FIFO queue of waiting pedestrians (each entry is the
//! number of seconds that pedestrian needs) and is either free or occupied.
//! Vehicles treat an occupied crossing as an obstacle.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;

use super::error::MessagingError;
use super::message::{Command, Message, Reply};
use super::qlearning::{PolicySettings, QLearningPolicy, SharedPolicy};
use super::runtime::{Agent, AgentRuntime, SimClock};
use super::types::AgentId;

/// Chance per cycle that new pedestrians show up
pub const ARRIVAL_PROBABILITY: f64 = 0.4;
/// Chance that one more waiting pedestrian joins a batch
pub const BATCH_CONTINUE_PROBABILITY: f64 = 0.7;
/// Reward for stopping traffic before the minimum wait
pub const EARLY_STOP_PENALTY: f64 = -100.0;

/// Width of the road a crossing spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoadType {
    OneLane,
    #[default]
    TwoLanes,
}

impl RoadType {
    /// `1_carril` and `one_lane` name a single lane; anything else is two
    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "1_carril" | "one_lane" | "1_lane" => RoadType::OneLane,
            _ => RoadType::TwoLanes,
        }
    }

    /// Seconds traffic must have flowed before stopping it again is fine
    pub fn min_wait(self) -> u32 {
        match self {
            RoadType::OneLane => 1,
            RoadType::TwoLanes => 2,
        }
    }
}

/// Actions of a learning crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingAction {
    StopTraffic = 0,
    AllowTraffic = 1,
}

impl CrossingAction {
    const COUNT: usize = 2;

    fn from_index(index: usize) -> Self {
        if index == 0 {
            CrossingAction::StopTraffic
        } else {
            CrossingAction::AllowTraffic
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossingStatus {
    pub occupied: bool,
    /// Seconds until an occupied crossing frees up
    pub remaining: u32,
    pub queue: VecDeque<u32>,
    pub max_queue_length: usize,
    /// Overrides every crossing duration when set
    pub fixed_duration: Option<u32>,
    pub road_type: RoadType,
    /// Decisions since traffic was last stopped
    pub waited: u32,
    /// Pedestrians that have started crossing
    pub crossed: u64,
}

pub type CrossingHandle = Rc<RefCell<CrossingStatus>>;

impl CrossingStatus {
    pub fn new(road_type: RoadType, fixed_duration: Option<u32>) -> Self {
        Self {
            road_type,
            fixed_duration,
            ..Self::default()
        }
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    /// Appends pedestrians to the queue
    pub fn arrive(&mut self, durations: impl IntoIterator<Item = u32>) {
        self.queue.extend(durations);
        self.max_queue_length = self.max_queue_length.max(self.queue.len());
    }

    /// Fixed-timer cycle after arrivals: start the next pedestrian when
    /// free, otherwise count the current crossing down
    pub fn advance(&mut self) {
        if !self.occupied {
            if let Some(duration) = self.queue.pop_front() {
                self.occupy(duration);
            }
        } else {
            self.count_down();
        }
    }

    /// One learning decision. Returns the reward for `action`.
    pub fn decide(&mut self, action: CrossingAction, rng: &mut StdRng) -> f64 {
        if self.occupied {
            self.count_down();
        }
        self.waited += 1;
        let queue = self.queue.len() as f64;

        match action {
            CrossingAction::StopTraffic => {
                if !self.occupied {
                    if let Some(first) = self.queue.pop_front() {
                        let mut longest = first;
                        let mut batch = 1;
                        while !self.queue.is_empty() && rng.random_bool(BATCH_CONTINUE_PROBABILITY)
                        {
                            if let Some(next) = self.queue.pop_front() {
                                longest = longest.max(next);
                                batch += 1;
                            }
                        }
                        self.crossed += batch - 1;
                        self.occupy(longest);
                    }
                }

                if self.waited >= self.road_type.min_wait() {
                    self.waited = 0;
                    -queue
                } else {
                    EARLY_STOP_PENALTY
                }
            }
            CrossingAction::AllowTraffic => queue,
        }
    }

    fn occupy(&mut self, duration: u32) {
        self.occupied = true;
        self.remaining = self.fixed_duration.unwrap_or(duration).max(1);
        self.crossed += 1;
        debug!(
            "Crossing occupied for {} seconds, queue {}",
            self.remaining,
            self.queue.len()
        );
    }

    fn count_down(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.occupied = false;
        }
    }
}

/// 40% of the time, 1 to 3 pedestrians needing 1 to 3 seconds each
pub fn sample_arrivals<R: Rng + ?Sized>(rng: &mut R) -> Vec<u32> {
    if !rng.random_bool(ARRIVAL_PROBABILITY) {
        return Vec::new();
    }
    let count = rng.random_range(1..=3);
    (0..count).map(|_| rng.random_range(1..=3)).collect()
}

/// Construction parameters of a crossing
#[derive(Debug, Clone, Default)]
pub struct CrossingOptions {
    pub road_type: RoadType,
    pub fixed_duration: Option<u32>,
    /// Learning mode when set
    pub learning: Option<PolicySettings>,
}

pub struct PedestrianCrossing {
    id: AgentId,
    status: CrossingHandle,
    policy: Option<SharedPolicy>,
}

impl PedestrianCrossing {
    /// Registers the crossing and starts its pedestrian loop
    pub fn launch(
        id: AgentId,
        options: CrossingOptions,
        runtime: &AgentRuntime,
        clock: SimClock,
        rng: StdRng,
    ) -> Result<CrossingHandle, MessagingError> {
        let status = Rc::new(RefCell::new(CrossingStatus::new(
            options.road_type,
            options.fixed_duration,
        )));
        let policy = options
            .learning
            .map(|settings| QLearningPolicy::new(CrossingAction::COUNT, settings, rng.clone()).shared());

        runtime.register(
            id.clone(),
            PedestrianCrossing {
                id: id.clone(),
                status: status.clone(),
                policy: policy.clone(),
            },
        )?;

        match policy {
            Some(policy) => {
                runtime.spawn_background(learning_loop(id.clone(), status.clone(), policy, clock))
            }
            None => runtime.spawn_background(fixed_loop(id.clone(), status.clone(), clock, rng)),
        }

        info!(
            "Pedestrian crossing {} ready ({:?}, min wait {}s)",
            id,
            options.road_type,
            options.road_type.min_wait()
        );
        Ok(status)
    }
}

async fn fixed_loop(id: AgentId, status: CrossingHandle, clock: SimClock, mut rng: StdRng) {
    loop {
        let pause = rng.random_range(1..=2);
        clock.sleep(pause as f64).await;

        let arrivals = sample_arrivals(&mut rng);
        let mut status = status.borrow_mut();
        if !arrivals.is_empty() {
            debug!(
                "{}: {} pedestrians arrived, queue {}",
                id,
                arrivals.len(),
                status.queue.len() + arrivals.len()
            );
            status.arrive(arrivals);
        }
        status.advance();
    }
}

async fn learning_loop(id: AgentId, status: CrossingHandle, policy: SharedPolicy, clock: SimClock) {
    loop {
        clock.sleep(1.0).await;

        let mut policy = policy.borrow_mut();
        let mut status = status.borrow_mut();
        let arrivals = sample_arrivals(policy.rng());
        status.arrive(arrivals);

        let action = CrossingAction::from_index(policy.choose());
        let reward = status.decide(action, policy.rng());
        debug!("{}: action {:?} reward {:.1}", id, action, reward);
        policy.update(action as usize, reward);
    }
}

impl Agent for PedestrianCrossing {
    async fn handle(&mut self, command: Command, message: &Message, _: &AgentRuntime) -> Reply {
        match command {
            Command::RequestState => {
                let status = self.status.borrow();
                Reply::Crossing {
                    occupied: status.occupied,
                    queue: status.queue.len(),
                }
            }
            Command::UpdateTiming(time) => {
                let seconds = time.round();
                if seconds >= 1.0 {
                    let seconds = seconds as u32;
                    self.status.borrow_mut().fixed_duration = Some(seconds);
                    info!("{} wait time updated to {} seconds", self.id, seconds);
                    Reply::Ack(format!("Wait time updated to {}", seconds))
                } else {
                    Reply::Invalid("Invalid wait time value".to_string())
                }
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
            _ => {
                debug!("{}: ignoring {:?} from {}", self.id, command, message.source);
                Reply::invalid_command()
            }
        }
    }
}
