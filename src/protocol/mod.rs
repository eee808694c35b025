//! SPID rotator protocol implementation module
//!
//! The controller speaks the Rot2Prog framing: 13-byte command frames and
//! 12-byte status frames, both opened by `'W'` and closed by a space, with
//! azimuth and elevation carried as four decimal digits of
//! `pulses_per_degree * (360 + angle)`.
//!
//! ```text
//! command: 57 H1 H2 H3 H4 PH V1 V2 V3 V4 PV  K 20   (digits as ASCII)
//! status:  57 H1 H2 H3 H4 PH V1 V2 V3 V4 PV 20      (digits as 0..9)
//! ```

pub mod codec;
pub mod message;

pub use self::codec::{SpidCodec, StatusFramer};
pub use self::message::Command;

/// First byte of every frame ('W')
pub const START_MARKER: u8 = 0x57;

/// Last byte of every frame (' ')
pub const END_MARKER: u8 = 0x20;

/// Length of a command frame
pub const COMMAND_FRAME_LEN: usize = 13;

/// Length of a status frame
pub const STATUS_FRAME_LEN: usize = 12;

/// Stop command byte
pub const CMD_STOP: u8 = 0x0F;

/// Status query command byte
pub const CMD_STATUS: u8 = 0x1F;

/// Set position command byte
pub const CMD_SET: u8 = 0x2F;

/// Offset added to every angle so negative values stay representable
pub const ANGLE_OFFSET: f64 = 360.0;
