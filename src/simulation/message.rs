//! Message envelope, command vocabulary and replies
//!
//! Agents exchange a minimal envelope carrying a free-text `content`. The
//! text is decoded once at the mailbox into a [`Command`]; handlers only
//! ever see the typed variant. Replies are typed as well and render to the
//! same text vocabulary for logs and external callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::qlearning::PolicyStats;
use super::traffic_light::{LightGroup, SignalState};
use super::types::AgentId;
use super::vehicle::{MoveOutcome, VehicleSnapshot};

/// The envelope exchanged at every agent boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub source: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl Message {
    pub fn new(content: impl Into<String>, source: impl Into<AgentId>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            message_id: None,
            timestamp: None,
        }
    }

    /// Envelope carrying the canonical text of `command`
    pub fn command(command: &Command, source: impl Into<AgentId>) -> Self {
        Self::new(command.to_string(), source)
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Closed command vocabulary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Move,
    Park,
    Unpark,
    Exit,
    ExitNotification,
    RequestState,
    RequestGroup,
    RequestRlStats,
    UpdateTiming(f64),
    UpdateEpsilon(f64),
    UpdateLearning(f64),
}

impl Command {
    /// Case-insensitive substring decoding. Longer keywords are tried first
    /// so `unpark` never reads as `park` and `exit_notification` never
    /// reads as `exit`.
    pub fn decode(content: &str) -> Result<Self, DecodeError> {
        let text = content.to_lowercase();

        if text.contains("request_rl_stats") {
            return Ok(Command::RequestRlStats);
        }
        if text.contains("request_state") {
            return Ok(Command::RequestState);
        }
        if text.contains("request_group") {
            return Ok(Command::RequestGroup);
        }
        if let Some(value) = parameter(&text, "update_timing") {
            return parse_value("update_timing", value).map(Command::UpdateTiming);
        }
        if let Some(value) = parameter(&text, "update_epsilon") {
            return parse_value("update_epsilon", value).map(Command::UpdateEpsilon);
        }
        if let Some(value) = parameter(&text, "update_learning") {
            return parse_value("update_learning", value).map(Command::UpdateLearning);
        }
        if text.contains("exit_notification") {
            return Ok(Command::ExitNotification);
        }
        if text.contains("unpark") {
            return Ok(Command::Unpark);
        }
        if text.contains("move") {
            return Ok(Command::Move);
        }
        if text.contains("park") {
            return Ok(Command::Park);
        }
        if text.contains("exit") {
            return Ok(Command::Exit);
        }

        Err(DecodeError::Unknown(content.to_string()))
    }
}

/// Text following `key`, with an optional `=` stripped. `Some("")` when the
/// keyword is present without a value.
fn parameter<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = text[start..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();
    Some(rest.split_whitespace().next().unwrap_or(""))
}

fn parse_value(command: &'static str, value: &str) -> Result<f64, DecodeError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DecodeError::BadParameter {
            command,
            value: value.to_string(),
        })
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::decode(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move => f.write_str("move"),
            Command::Park => f.write_str("park"),
            Command::Unpark => f.write_str("unpark"),
            Command::Exit => f.write_str("exit"),
            Command::ExitNotification => f.write_str("exit_notification"),
            Command::RequestState => f.write_str("request_state"),
            Command::RequestGroup => f.write_str("request_group"),
            Command::RequestRlStats => f.write_str("request_rl_stats"),
            Command::UpdateTiming(value) => write!(f, "update_timing={}", value),
            Command::UpdateEpsilon(value) => write!(f, "update_epsilon={}", value),
            Command::UpdateLearning(value) => write!(f, "update_learning={}", value),
        }
    }
}

/// Negative admission answers. These are normal outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    ParkingFull { occupancy: u32, capacity: u32 },
    StillParking,
    AlreadyExiting,
    AlreadyPresent,
    NotParkedHere,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::ParkingFull {
                occupancy,
                capacity,
            } => write!(f, "parking is full ({}/{})", occupancy, capacity),
            Rejection::StillParking => f.write_str("vehicle is still parking"),
            Rejection::AlreadyExiting => f.write_str("vehicle is already exiting"),
            Rejection::AlreadyPresent => f.write_str("vehicle is already in this parking area"),
            Rejection::NotParkedHere => f.write_str("vehicle is not parked here"),
        }
    }
}

/// Typed answer to a [`Command`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Signal(SignalState),
    Crossing { occupied: bool, queue: usize },
    ParkingStatus { occupancy: u32, capacity: u32 },
    ParkAccepted { parking_time: u32 },
    ExitAccepted { exit_time: u32 },
    Rejected(Rejection),
    Group { group: LightGroup, state: SignalState },
    RlStats(PolicyStats),
    Moved(MoveOutcome),
    VehicleStatus(VehicleSnapshot),
    Ack(String),
    Invalid(String),
}

impl Reply {
    pub fn invalid_command() -> Self {
        Reply::Invalid("Invalid command received".to_string())
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Reply::ParkAccepted { .. } | Reply::ExitAccepted { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Reply::Rejected(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Signal(state) => write!(f, "{}", state),
            Reply::Crossing { occupied, queue } => {
                let status = if *occupied { "occupied" } else { "free" };
                write!(f, "{} queue={}", status, queue)
            }
            Reply::ParkingStatus {
                occupancy,
                capacity,
            } => {
                let status = if occupancy >= capacity {
                    "full"
                } else {
                    "available"
                };
                write!(f, "{} ({}/{})", status, occupancy, capacity)
            }
            Reply::ParkAccepted { parking_time } => {
                write!(f, "accepted: parking_time={}", parking_time)
            }
            Reply::ExitAccepted { exit_time } => write!(f, "accepted: exit_time={}", exit_time),
            Reply::Rejected(rejection) => write!(f, "rejected: {}", rejection),
            Reply::Group { group, state } => write!(f, "Group: {}, State: {}", group, state),
            Reply::RlStats(stats) => match serde_json::to_string(stats) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{:?}", stats),
            },
            Reply::Moved(outcome) => write!(f, "{}", outcome),
            Reply::VehicleStatus(snapshot) => write!(f, "{}", snapshot),
            Reply::Ack(text) | Reply::Invalid(text) => f.write_str(text),
        }
    }
}
