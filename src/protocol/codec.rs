use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::{Axis, DecodeError, Error, Position, Resolution, Result, MAX_WIRE_COUNT};
use super::message::Command;
use super::{
    ANGLE_OFFSET, CMD_SET, CMD_STATUS, CMD_STOP, COMMAND_FRAME_LEN, END_MARKER, START_MARKER,
    STATUS_FRAME_LEN,
};

/// Rot2Prog frame codec for encoding commands and decoding status frames
#[derive(Debug, Clone, Copy, Default)]
pub struct SpidCodec {
    resolution: Resolution,
}

impl SpidCodec {
    /// Creates a codec emitting the given resolution
    pub fn new(resolution: Resolution) -> Self {
        SpidCodec { resolution }
    }

    /// Resolution written into outgoing frames
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Encodes any command into its wire frame
    pub fn encode_command(&self, command: &Command) -> Result<Bytes> {
        match command {
            Command::Move(position) => self.encode_move(position),
            Command::Stop => Ok(self.encode_stop()),
            Command::Status => Ok(self.encode_status_query()),
        }
    }

    /// Encodes a set-position frame
    ///
    /// Fails if an angle cannot be represented in the four-digit fields; the
    /// safety guard is expected to have screened the position already.
    pub fn encode_move(&self, position: &Position) -> Result<Bytes> {
        let az = to_count(position.azimuth(), self.resolution.azimuth, Axis::Azimuth)?;
        let el = to_count(position.elevation(), self.resolution.elevation, Axis::Elevation)?;

        let mut frame = BytesMut::with_capacity(COMMAND_FRAME_LEN);
        frame.put_u8(START_MARKER);
        frame.put_slice(&ascii_digits(az));
        frame.put_u8(self.resolution.azimuth);
        frame.put_slice(&ascii_digits(el));
        frame.put_u8(self.resolution.elevation);
        frame.put_u8(CMD_SET);
        frame.put_u8(END_MARKER);
        Ok(frame.freeze())
    }

    /// Encodes a stop frame
    pub fn encode_stop(&self) -> Bytes {
        empty_command(CMD_STOP)
    }

    /// Encodes a status query frame
    pub fn encode_status_query(&self) -> Bytes {
        empty_command(CMD_STATUS)
    }

    /// Decodes a status frame into a position
    ///
    /// The frame must be complete; a truncated, over-long or marker-damaged
    /// frame is refused as a whole and values are never clamped.
    pub fn decode_status(&self, frame: &[u8]) -> std::result::Result<Position, DecodeError> {
        if frame.len() != STATUS_FRAME_LEN {
            return Err(DecodeError::WrongLength {
                expected: STATUS_FRAME_LEN,
                actual: frame.len(),
            });
        }
        check_markers(frame)?;

        let az_count = raw_count(frame, 1)?;
        let el_count = raw_count(frame, 6)?;
        let azimuth = from_count(az_count, frame[5], Axis::Azimuth)?;
        let elevation = from_count(el_count, frame[10], Axis::Elevation)?;
        to_position(azimuth, elevation)
    }

    /// Encodes a status frame reporting `position`, as the controller would
    pub fn encode_status(&self, position: &Position) -> Result<Bytes> {
        let az = to_count(position.azimuth(), self.resolution.azimuth, Axis::Azimuth)?;
        let el = to_count(position.elevation(), self.resolution.elevation, Axis::Elevation)?;

        let mut frame = BytesMut::with_capacity(STATUS_FRAME_LEN);
        frame.put_u8(START_MARKER);
        frame.put_slice(&raw_digits(az));
        frame.put_u8(self.resolution.azimuth);
        frame.put_slice(&raw_digits(el));
        frame.put_u8(self.resolution.elevation);
        frame.put_u8(END_MARKER);
        Ok(frame.freeze())
    }

    /// Decodes a command frame, as the controller would
    pub fn decode_command(&self, frame: &[u8]) -> std::result::Result<Command, DecodeError> {
        if frame.len() != COMMAND_FRAME_LEN {
            return Err(DecodeError::WrongLength {
                expected: COMMAND_FRAME_LEN,
                actual: frame.len(),
            });
        }
        check_markers(frame)?;

        match frame[11] {
            CMD_STOP => Ok(Command::Stop),
            CMD_STATUS => Ok(Command::Status),
            CMD_SET => {
                let az_count = ascii_count(frame, 1)?;
                let el_count = ascii_count(frame, 6)?;
                let azimuth = from_count(az_count, frame[5], Axis::Azimuth)?;
                let elevation = from_count(el_count, frame[10], Axis::Elevation)?;
                Ok(Command::Move(to_position(azimuth, elevation)?))
            }
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

impl Encoder<Command> for SpidCodec {
    type Error = Error;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<()> {
        let frame = self.encode_command(&item)?;
        dst.reserve(frame.len());
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

/// Splits a byte stream into status frames
///
/// Frames are fixed length, so the framer only waits for enough bytes. A
/// buffer that does not open with the start marker is discarded and reported
/// rather than scanned for a later marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusFramer;

impl Decoder for StatusFramer {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };

        if first != START_MARKER {
            src.clear();
            return Err(DecodeError::BadStartMarker(first).into());
        }

        if src.len() < STATUS_FRAME_LEN {
            // Need more data to read full frame
            return Ok(None);
        }

        Ok(Some(src.split_to(STATUS_FRAME_LEN).freeze()))
    }
}

fn empty_command(code: u8) -> Bytes {
    let mut frame = BytesMut::with_capacity(COMMAND_FRAME_LEN);
    frame.put_u8(START_MARKER);
    frame.put_bytes(0, 10);
    frame.put_u8(code);
    frame.put_u8(END_MARKER);
    frame.freeze()
}

fn check_markers(frame: &[u8]) -> std::result::Result<(), DecodeError> {
    if frame[0] != START_MARKER {
        return Err(DecodeError::BadStartMarker(frame[0]));
    }
    let last = frame[frame.len() - 1];
    if last != END_MARKER {
        return Err(DecodeError::BadEndMarker(last));
    }
    Ok(())
}

fn to_count(angle: f64, pulses_per_degree: u8, axis: Axis) -> Result<u32> {
    let scaled = ((angle + ANGLE_OFFSET) * f64::from(pulses_per_degree)).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > f64::from(MAX_WIRE_COUNT) {
        return Err(Error::encode(format!(
            "{} {}° not representable at {} pulses/°",
            axis, angle, pulses_per_degree
        )));
    }
    Ok(scaled as u32)
}

fn from_count(count: u32, pulses_per_degree: u8, axis: Axis) -> std::result::Result<f64, DecodeError> {
    if pulses_per_degree == 0 {
        return Err(DecodeError::ZeroResolution(axis));
    }
    Ok(f64::from(count) / f64::from(pulses_per_degree) - ANGLE_OFFSET)
}

fn to_position(azimuth: f64, elevation: f64) -> std::result::Result<Position, DecodeError> {
    if !(0.0..=360.0).contains(&azimuth) {
        return Err(DecodeError::OutOfRange { axis: Axis::Azimuth, value: azimuth });
    }
    if !(-90.0..=90.0).contains(&elevation) {
        return Err(DecodeError::OutOfRange { axis: Axis::Elevation, value: elevation });
    }
    Position::wrapped(azimuth, elevation)
        .map_err(|_| DecodeError::OutOfRange { axis: Axis::Azimuth, value: azimuth })
}

fn raw_digits(count: u32) -> [u8; 4] {
    [
        (count / 1000 % 10) as u8,
        (count / 100 % 10) as u8,
        (count / 10 % 10) as u8,
        (count % 10) as u8,
    ]
}

fn ascii_digits(count: u32) -> [u8; 4] {
    raw_digits(count).map(|d| b'0' + d)
}

fn raw_count(frame: &[u8], start: usize) -> std::result::Result<u32, DecodeError> {
    frame[start..start + 4]
        .iter()
        .enumerate()
        .try_fold(0u32, |acc, (offset, &value)| {
            if value > 9 {
                return Err(DecodeError::InvalidDigit { index: start + offset, value });
            }
            Ok(acc * 10 + u32::from(value))
        })
}

fn ascii_count(frame: &[u8], start: usize) -> std::result::Result<u32, DecodeError> {
    frame[start..start + 4]
        .iter()
        .enumerate()
        .try_fold(0u32, |acc, (offset, &value)| {
            if !value.is_ascii_digit() {
                return Err(DecodeError::InvalidDigit { index: start + offset, value });
            }
            Ok(acc * 10 + u32::from(value - b'0'))
        })
}
