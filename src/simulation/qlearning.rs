//! Tabular, state-free Q-learning shared by every learning controller
//!
//! Each controller owns one [`QLearningPolicy`] with a handful of discrete
//! actions. The controller decides how to turn its situation into a reward;
//! the policy only keeps the running action values.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;

use super::error::PolicyError;

/// Hyperparameters shared by all learning controllers of a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicySettings {
    pub epsilon: f64,
    /// `None` selects the sample-average rule `1 / visits`
    pub learning_rate: Option<f64>,
}

impl PolicySettings {
    /// Validated settings with a fixed learning rate
    pub fn new(epsilon: f64, learning_rate: f64) -> Result<Self, PolicyError> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(PolicyError::InvalidEpsilon(epsilon));
        }
        if !(learning_rate > 0.0 && learning_rate <= 1.0) {
            return Err(PolicyError::InvalidLearningRate(learning_rate));
        }
        Ok(Self {
            epsilon,
            learning_rate: Some(learning_rate),
        })
    }
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            learning_rate: Some(0.1),
        }
    }
}

/// Diagnostic snapshot answered to `request_rl_stats`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStats {
    pub q_values: Vec<f64>,
    pub visits: Vec<u64>,
    pub steps: u64,
    pub epsilon: f64,
    pub learning_rate: Option<f64>,
}

/// A policy shared between a controller's mailbox and its decision loop
pub type SharedPolicy = Rc<RefCell<QLearningPolicy>>;

#[derive(Debug, Clone)]
pub struct QLearningPolicy {
    values: Vec<f64>,
    visits: Vec<u64>,
    steps: u64,
    epsilon: f64,
    learning_rate: Option<f64>,
    rng: StdRng,
}

impl QLearningPolicy {
    pub fn new(action_count: usize, settings: PolicySettings, rng: StdRng) -> Self {
        Self {
            values: vec![0.0; action_count],
            visits: vec![0; action_count],
            steps: 0,
            epsilon: settings.epsilon.clamp(0.0, 1.0),
            learning_rate: settings.learning_rate,
            rng,
        }
    }

    pub fn shared(self) -> SharedPolicy {
        Rc::new(RefCell::new(self))
    }

    pub fn action_count(&self) -> usize {
        self.values.len()
    }

    /// Epsilon-greedy choice with an explicit exploration rate. Ties between
    /// equal values go to the lowest action index.
    pub fn choose_action(&mut self, epsilon: f64) -> usize {
        if self.values.is_empty() {
            return 0;
        }
        if self.rng.random_bool(epsilon.clamp(0.0, 1.0)) {
            return self.rng.random_range(0..self.values.len());
        }
        self.best_action()
    }

    /// Epsilon-greedy choice with the configured exploration rate
    pub fn choose(&mut self) -> usize {
        self.choose_action(self.epsilon)
    }

    /// Greedy action, lowest index on ties
    pub fn best_action(&self) -> usize {
        self.values
            .iter()
            .enumerate()
            .rev()
            .max_by_key(|(_, value)| OrderedFloat(**value))
            .map(|(action, _)| action)
            .unwrap_or(0)
    }

    /// `Q[a] += alpha * (reward - Q[a])`
    pub fn update(&mut self, action: usize, reward: f64) {
        let Some(value) = self.values.get_mut(action) else {
            return;
        };
        self.visits[action] += 1;
        self.steps += 1;

        let alpha = self
            .learning_rate
            .unwrap_or(1.0 / self.visits[action] as f64);
        *value += alpha * (reward - *value);
        debug!(
            "Q-update action={} reward={:.2} q={:.3} alpha={:.3}",
            action, reward, *value, alpha
        );
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<(), PolicyError> {
        if !(0.0..=1.0).contains(&epsilon) {
            return Err(PolicyError::InvalidEpsilon(epsilon));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<(), PolicyError> {
        if !(learning_rate > 0.0 && learning_rate <= 1.0) {
            return Err(PolicyError::InvalidLearningRate(learning_rate));
        }
        self.learning_rate = Some(learning_rate);
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn q_value(&self, action: usize) -> Option<f64> {
        self.values.get(action).copied()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Gives the owning controller access to the same random stream
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            q_values: self.values.clone(),
            visits: self.visits.clone(),
            steps: self.steps,
            epsilon: self.epsilon,
            learning_rate: self.learning_rate,
        }
    }
}
