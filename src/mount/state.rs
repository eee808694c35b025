use serde::{Deserialize, Serialize};

use crate::core::{ErrorRecord, ObserverLocation, Position, TrackingTarget};

/// Whether a rotator link is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connection {
    Disconnected,
    /// Connected over the named transport
    Connected { port: String },
}

/// What the mount is doing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Motion {
    Idle,
    /// Slewing to a commanded position
    Moving(Position),
    /// Following a celestial target
    Tracking(TrackingTarget),
}

/// Externally visible state, derived from connection, motion and fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountPhase {
    Disconnected,
    Idle,
    Moving,
    Tracking,
    Error,
}

/// Authoritative model of the mount
#[derive(Debug, Clone, PartialEq)]
pub struct MountState {
    pub connection: Connection,
    pub motion: Motion,
    /// Set by a failed hardware exchange; cleared by a successful stop or move
    pub faulted: bool,
    pub last_error: Option<ErrorRecord>,
    /// Last position read back from the rotator or confirmed reached
    pub last_known_position: Position,
    /// Last position written to the rotator
    pub last_commanded: Option<Position>,
    /// Where the active move or tracking session wants the mount
    pub target_position: Option<Position>,
}

impl Default for MountState {
    fn default() -> Self {
        MountState {
            connection: Connection::Disconnected,
            motion: Motion::Idle,
            faulted: false,
            last_error: None,
            last_known_position: Position::HOME,
            last_commanded: None,
            target_position: None,
        }
    }
}

impl MountState {
    pub fn is_connected(&self) -> bool {
        matches!(self.connection, Connection::Connected { .. })
    }

    /// Phase as the caller sees it
    pub fn phase(&self) -> MountPhase {
        if !self.is_connected() {
            return MountPhase::Disconnected;
        }
        if self.faulted {
            return MountPhase::Error;
        }
        match self.motion {
            Motion::Idle => MountPhase::Idle,
            Motion::Moving(_) => MountPhase::Moving,
            Motion::Tracking(_) => MountPhase::Tracking,
        }
    }

    /// Drops any motion, keeping connection and position
    pub fn go_idle(&mut self) {
        self.motion = Motion::Idle;
        self.target_position = None;
    }

    /// Leaves the connected state
    ///
    /// Everything but the last known position is reset; the rotator does not
    /// move while nobody is talking to it.
    pub fn reset(&mut self) {
        *self = MountState {
            last_known_position: self.last_known_position,
            ..MountState::default()
        };
    }
}

/// Point-in-time copy of the mount state handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSnapshot {
    pub phase: MountPhase,
    pub connection: Connection,
    pub motion: Motion,
    pub last_error: Option<ErrorRecord>,
    pub last_known_position: Position,
    pub last_commanded: Option<Position>,
    pub target_position: Option<Position>,
    pub emergency_stop: bool,
    pub observer: ObserverLocation,
}

impl MountSnapshot {
    pub(super) fn capture(state: &MountState, emergency_stop: bool, observer: ObserverLocation) -> Self {
        MountSnapshot {
            phase: state.phase(),
            connection: state.connection.clone(),
            motion: state.motion.clone(),
            last_error: state.last_error.clone(),
            last_known_position: state.last_known_position,
            last_commanded: state.last_commanded,
            target_position: state.target_position,
            emergency_stop,
            observer,
        }
    }
}
