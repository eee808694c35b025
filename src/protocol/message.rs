use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::Position;

/// Commands understood by the rotator controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Slew both axes to the given position
    Move(Position),
    /// Halt both axes immediately
    Stop,
    /// Report the current position
    Status,
}

impl Command {
    /// Command byte carried in the `K` field of the frame
    pub fn code(&self) -> u8 {
        match self {
            Command::Move(_) => super::CMD_SET,
            Command::Stop => super::CMD_STOP,
            Command::Status => super::CMD_STATUS,
        }
    }

    /// Whether the controller answers this command with a status frame
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Command::Move(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move(position) => write!(f, "move to {}", position),
            Command::Stop => write!(f, "stop"),
            Command::Status => write!(f, "status"),
        }
    }
}
