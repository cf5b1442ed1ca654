//! Error taxonomy for the simulation engine
//!
//! Admission rejections are not errors; they travel inside a
//! [`Reply`](super::Reply) as a [`Rejection`](super::Rejection).

use std::time::Duration;

use thiserror::Error;

use super::types::AgentId;

/// Malformed or inconsistent scenario documents. Always fatal at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("scenario has no roads")]
    NoRoads,

    #[error("duplicate id {0}")]
    DuplicateId(String),

    #[error("{referrer} references unknown road {road}")]
    UnknownRoad { referrer: String, road: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the request/response layer between agents
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("agent {0} is not registered")]
    UnknownAgent(AgentId),

    #[error("agent {0} is already registered")]
    AlreadyRegistered(AgentId),

    #[error("mailbox of agent {0} is closed")]
    MailboxClosed(AgentId),

    #[error("request to agent {target} timed out after {after:?}")]
    Timeout { target: AgentId, after: Duration },
}

/// Rejected hyperparameter overrides
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("epsilon must lie in [0, 1], got {0}")]
    InvalidEpsilon(f64),

    #[error("learning rate must lie in (0, 1], got {0}")]
    InvalidLearningRate(f64),
}

/// Umbrella error for building and running a simulation
#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
}

/// A message body that does not name a known command
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unrecognised command {0:?}")]
    Unknown(String),

    #[error("invalid {command} parameter {value:?}")]
    BadParameter { command: &'static str, value: String },
}
