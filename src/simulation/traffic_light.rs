//! Traffic light controllers and their group coordination
//!
//! Lights belong to one of two opposing groups. In the fixed-timer mode a
//! single [`GroupCoordinator`] loop pushes the group states to every member
//! and then flips both groups, so the groups always disagree. In learning
//! mode every light runs its own decision loop instead and never joins a
//! coordinator.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::MessagingError;
use super::message::{Command, Message, Reply};
use super::qlearning::{PolicySettings, QLearningPolicy, SharedPolicy};
use super::runtime::{Agent, AgentRuntime, SimClock};
use super::types::AgentId;

/// Jitter added to every light's change time
pub const CHANGE_TIME_JITTER: f64 = 0.5;
/// Floor for change times after jitter
pub const MIN_CHANGE_TIME: f64 = 0.5;
/// Seconds between two decisions of a learning light
pub const DECISION_INTERVAL: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalState {
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "GREEN")]
    Green,
}

impl SignalState {
    pub fn flipped(self) -> Self {
        match self {
            SignalState::Red => SignalState::Green,
            SignalState::Green => SignalState::Red,
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalState::Red => f.write_str("RED"),
            SignalState::Green => f.write_str("GREEN"),
        }
    }
}

/// The two opposing flows a light can control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightGroup {
    NorthSouth,
    EastWest,
}

impl LightGroup {
    /// Derives the group from a light's name: orientation words first, then
    /// the parity of a trailing `_<n>` id (even is north-south)
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("left") || lower.contains("right") {
            return LightGroup::NorthSouth;
        }
        if lower.contains("top") || lower.contains("bottom") || lower.contains("mid") {
            return LightGroup::EastWest;
        }

        let id = lower
            .rsplit_once('_')
            .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
            .unwrap_or(0);
        if id % 2 == 0 {
            LightGroup::NorthSouth
        } else {
            LightGroup::EastWest
        }
    }

    /// Signal shown before the first coordination step
    pub fn initial_state(self) -> SignalState {
        match self {
            LightGroup::NorthSouth => SignalState::Red,
            LightGroup::EastWest => SignalState::Green,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LightGroup::NorthSouth => "north_south",
            LightGroup::EastWest => "east_west",
        }
    }
}

impl fmt::Display for LightGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one light, shared between its mailbox and whichever loop
/// drives it
#[derive(Debug, Clone, PartialEq)]
pub struct LightStatus {
    pub state: SignalState,
    /// Seconds between coordination steps
    pub change_time: f64,
    /// `request_state` queries answered RED since the last decision
    pub red_queries: u32,
}

pub type LightHandle = Rc<RefCell<LightStatus>>;

struct Member {
    id: AgentId,
    group: LightGroup,
    status: LightHandle,
}

struct CoordinatorState {
    members: Vec<Member>,
    north_south: SignalState,
    east_west: SignalState,
    /// Status of the first member; its change time paces the loop
    pacer: Option<LightHandle>,
}

/// Owned roster of grouped lights. Clones share the same roster; the
/// coordination loop is started by the first light that joins.
#[derive(Clone)]
pub struct GroupCoordinator {
    inner: Rc<RefCell<CoordinatorState>>,
}

impl Default for GroupCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(CoordinatorState {
                members: Vec::new(),
                north_south: LightGroup::NorthSouth.initial_state(),
                east_west: LightGroup::EastWest.initial_state(),
                pacer: None,
            })),
        }
    }

    pub fn group_state(&self, group: LightGroup) -> SignalState {
        let state = self.inner.borrow();
        match group {
            LightGroup::NorthSouth => state.north_south,
            LightGroup::EastWest => state.east_west,
        }
    }

    pub fn members(&self, group: LightGroup) -> Vec<AgentId> {
        self.inner
            .borrow()
            .members
            .iter()
            .filter(|member| member.group == group)
            .map(|member| member.id.clone())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().pacer.is_some()
    }

    /// Adds a light to its group roster and sets its state to the group's
    /// current state. The first light to join starts the coordination loop.
    pub fn join(
        &self,
        id: AgentId,
        group: LightGroup,
        status: LightHandle,
        runtime: &AgentRuntime,
        clock: SimClock,
    ) {
        let start = {
            let mut state = self.inner.borrow_mut();
            status.borrow_mut().state = match group {
                LightGroup::NorthSouth => state.north_south,
                LightGroup::EastWest => state.east_west,
            };
            state.members.push(Member {
                id,
                group,
                status: status.clone(),
            });
            if state.pacer.is_none() {
                state.pacer = Some(status);
                true
            } else {
                false
            }
        };

        if start {
            info!("Starting traffic light group coordination");
            runtime.spawn_background(self.clone().run(clock));
        }
    }

    /// One coordination step: push the current group states to every
    /// member, then flip both groups
    pub fn step(&self) {
        let mut state = self.inner.borrow_mut();
        let (north_south, east_west) = (state.north_south, state.east_west);

        for member in &state.members {
            let target = match member.group {
                LightGroup::NorthSouth => north_south,
                LightGroup::EastWest => east_west,
            };
            let mut status = member.status.borrow_mut();
            if status.state != target {
                debug!("{} changed to {}", member.id, target);
            }
            status.state = target;
        }

        state.north_south = north_south.flipped();
        state.east_west = east_west.flipped();
    }

    async fn run(self, clock: SimClock) {
        loop {
            let wait = self
                .inner
                .borrow()
                .pacer
                .as_ref()
                .map(|pacer| pacer.borrow().change_time)
                .unwrap_or(MIN_CHANGE_TIME);
            clock.sleep(wait).await;
            self.step();
        }
    }
}

/// How a light is driven
#[derive(Clone)]
pub enum LightMode {
    Grouped(GroupCoordinator),
    Learning(PolicySettings),
}

/// Construction parameters of a light
#[derive(Debug, Clone, Default)]
pub struct LightOptions {
    /// Explicit group; derived from the name when absent
    pub group: Option<LightGroup>,
    /// Base change time; random in 2..=4 seconds when absent
    pub change_time: Option<f64>,
}

/// Actions of a learning light
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LightAction {
    Keep = 0,
    ForceGreen = 1,
    ForceRed = 2,
}

impl LightAction {
    const COUNT: usize = 3;

    fn from_index(index: usize) -> Self {
        match index {
            1 => LightAction::ForceGreen,
            2 => LightAction::ForceRed,
            _ => LightAction::Keep,
        }
    }
}

pub struct TrafficLightController {
    id: AgentId,
    group: LightGroup,
    status: LightHandle,
    policy: Option<SharedPolicy>,
}

impl TrafficLightController {
    /// Registers a light with the runtime and starts whatever drives it.
    /// Returns the handle to the light's state.
    pub fn launch(
        id: AgentId,
        options: LightOptions,
        mode: LightMode,
        runtime: &AgentRuntime,
        clock: SimClock,
        mut rng: StdRng,
    ) -> Result<LightHandle, MessagingError> {
        let group = options
            .group
            .unwrap_or_else(|| LightGroup::from_name(id.as_str()));
        let base = options
            .change_time
            .unwrap_or_else(|| rng.random_range(2..=4) as f64);
        let change_time =
            (base + rng.random_range(-CHANGE_TIME_JITTER..=CHANGE_TIME_JITTER)).max(MIN_CHANGE_TIME);

        let status = Rc::new(RefCell::new(LightStatus {
            state: group.initial_state(),
            change_time,
            red_queries: 0,
        }));

        let policy = match &mode {
            LightMode::Grouped(_) => None,
            LightMode::Learning(settings) => {
                Some(QLearningPolicy::new(LightAction::COUNT, *settings, rng).shared())
            }
        };

        runtime.register(
            id.clone(),
            TrafficLightController {
                id: id.clone(),
                group,
                status: status.clone(),
                policy: policy.clone(),
            },
        )?;

        match (mode, policy) {
            (LightMode::Grouped(coordinator), _) => {
                coordinator.join(id.clone(), group, status.clone(), runtime, clock);
            }
            (LightMode::Learning(_), Some(policy)) => {
                runtime.spawn_background(learning_loop(status.clone(), policy, clock));
            }
            (LightMode::Learning(_), None) => {}
        }

        info!(
            "Traffic light {} joined {} (change time {:.2}s)",
            id, group, change_time
        );
        Ok(status)
    }
}

/// One decision per simulated second: pick keep/force-green/force-red,
/// apply it when legal, and learn from the queue seen while red
async fn learning_loop(status: LightHandle, policy: SharedPolicy, clock: SimClock) {
    let mut green_steps: u32 = 0;
    loop {
        clock.sleep(DECISION_INTERVAL).await;

        let mut status = status.borrow_mut();
        let mut policy = policy.borrow_mut();
        let queue = std::mem::take(&mut status.red_queries) as f64;
        let action = LightAction::from_index(policy.choose());

        match (action, status.state) {
            (LightAction::ForceGreen, SignalState::Red) => {
                status.state = SignalState::Green;
                green_steps = 0;
            }
            (LightAction::ForceRed, SignalState::Green) => status.state = SignalState::Red,
            (_, SignalState::Green) => green_steps += 1,
            (_, SignalState::Red) => {}
        }

        let reward = match status.state {
            SignalState::Red => -queue,
            SignalState::Green => queue - green_steps as f64,
        };
        policy.update(action as usize, reward);
    }
}

impl Agent for TrafficLightController {
    async fn handle(&mut self, command: Command, message: &Message, _: &AgentRuntime) -> Reply {
        match command {
            Command::RequestState => {
                let mut status = self.status.borrow_mut();
                if status.state == SignalState::Red {
                    status.red_queries += 1;
                }
                Reply::Signal(status.state)
            }
            Command::RequestGroup => Reply::Group {
                group: self.group,
                state: self.status.borrow().state,
            },
            Command::UpdateTiming(time) => {
                if time > 0.0 {
                    self.status.borrow_mut().change_time = time;
                    info!("{} change time updated to {} seconds", self.id, time);
                    Reply::Ack(format!("Timing updated to {}", time))
                } else {
                    Reply::Invalid("Invalid timing value".to_string())
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
