//! Transport module
//!
//! This module owns the byte link to the rotator controller. A [`Transport`]
//! moves whole frames; [`Link`] layers the codec and the bounded retry policy
//! on top so the mount engine deals in commands and positions only.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;
use tracing::{debug, info, warn};

use crate::core::{ConnectionConfig, EngineConfig, Error, Position, Result, DEFAULT_PORT};
use crate::protocol::{Command, SpidCodec};

pub mod serial;
pub mod simulator;

pub use self::serial::SerialTransport;
pub use self::simulator::{SimulatedRotator, SimulatorHandle};

/// Line speeds accepted by [`open`]
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    600, 1_200, 2_400, 4_800, 9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800,
];

/// Frame-level link to a rotator controller
///
/// Every call is bounded in time: an unresponsive device surfaces a timeout
/// instead of blocking the caller.
#[async_trait]
pub trait Transport: Send {
    /// Writes one complete frame
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Reads one complete status frame, waiting at most `timeout`
    async fn read_frame(&mut self, timeout: Duration) -> Result<Bytes>;

    /// Drops any buffered input, used to resynchronise before a retry
    async fn discard_input(&mut self) -> Result<()>;

    /// Releases the underlying device
    async fn close(&mut self) -> Result<()>;

    /// Short human readable name of the link
    fn describe(&self) -> String;
}

/// Opens the transport selected by `connection`
pub async fn open(connection: &ConnectionConfig, config: &EngineConfig) -> Result<Box<dyn Transport>> {
    if connection.use_simulator {
        info!("Opening simulated rotator");
        let rotator = SimulatedRotator::new(config.resolution, config.simulator.clone());
        return Ok(Box::new(rotator));
    }

    if !SUPPORTED_BAUD_RATES.contains(&connection.baud_rate) {
        return Err(Error::connect(format!(
            "unsupported baud rate {}",
            connection.baud_rate
        )));
    }

    let port = match &connection.port {
        Some(port) => port.clone(),
        None => detect_port(),
    };
    info!("Opening serial port {} at {} baud", port, connection.baud_rate);

    let transport = SerialTransport::open(&port, connection.baud_rate, config.io_timeout)?;
    Ok(Box::new(transport))
}

/// Names of the serial ports present on this machine
pub fn list_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::transport(format!("Failed to enumerate serial ports: {}", e)))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Picks the most likely rotator port
///
/// USB serial adapters win over built-in ports; with nothing found the
/// conventional first USB adapter name is returned.
pub fn detect_port() -> String {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Port enumeration failed, using {}: {}", DEFAULT_PORT, e);
            return DEFAULT_PORT.to_string();
        }
    };

    let usb = ports
        .iter()
        .find(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)));

    match usb.or_else(|| ports.first()) {
        Some(port) => {
            debug!("Auto-detected port {}", port.port_name);
            port.port_name.clone()
        }
        None => DEFAULT_PORT.to_string(),
    }
}

/// Outcome of a retried exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    /// Succeeded without a retry
    FirstTry(T),
    /// Succeeded after `attempts` tries in total
    Recovered { value: T, attempts: u32 },
}

impl<T> Attempt<T> {
    /// The successful value
    pub fn into_inner(self) -> T {
        match self {
            Attempt::FirstTry(value) | Attempt::Recovered { value, .. } => value,
        }
    }

    /// Whether at least one retry was needed
    pub fn was_retried(&self) -> bool {
        matches!(self, Attempt::Recovered { .. })
    }
}

/// Open transport paired with the codec and retry policy
pub struct Link {
    transport: Box<dyn Transport>,
    codec: SpidCodec,
    io_timeout: Duration,
    retries: u32,
    send_buffer: BytesMut,
}

impl Link {
    /// Wraps an open transport
    pub fn new(transport: Box<dyn Transport>, codec: SpidCodec, io_timeout: Duration, retries: u32) -> Self {
        Link {
            transport,
            codec,
            io_timeout,
            retries,
            send_buffer: BytesMut::with_capacity(crate::protocol::COMMAND_FRAME_LEN),
        }
    }

    /// Name of the underlying transport
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Sends a command and decodes the reply, if the command has one
    ///
    /// Transient failures are retried up to the configured count, discarding
    /// pending input first. Non-transient failures surface at once.
    pub async fn execute(&mut self, command: &Command) -> Result<Attempt<Option<Position>>> {
        let max_attempts = self.retries + 1;
        let mut attempt = 1;

        loop {
            match self.exchange(command).await {
                Ok(reply) if attempt == 1 => return Ok(Attempt::FirstTry(reply)),
                Ok(reply) => {
                    info!("{} succeeded on attempt {}", command, attempt);
                    return Ok(Attempt::Recovered { value: reply, attempts: attempt });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!("{} failed on attempt {}, retrying: {}", command, attempt, e);
                    if let Err(e) = self.transport.discard_input().await {
                        warn!("Failed to discard input before retry: {}", e);
                    }
                    attempt += 1;
                }
                Err(e) if attempt > 1 => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exchange(&mut self, command: &Command) -> Result<Option<Position>> {
        self.send_buffer.clear();
        self.codec.encode(*command, &mut self.send_buffer)?;
        debug!("-> {} {:02X?}", command, &self.send_buffer[..]);
        self.transport.write_frame(&self.send_buffer).await?;

        if !command.expects_reply() {
            return Ok(None);
        }

        let frame = self.transport.read_frame(self.io_timeout).await?;
        debug!("<- {:02X?}", &frame[..]);
        let position = self.codec.decode_status(&frame)?;
        Ok(Some(position))
    }

    /// Closes the transport
    pub async fn close(mut self) -> Result<()> {
        self.transport.close().await
    }
}
