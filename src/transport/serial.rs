use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::protocol::{StatusFramer, STATUS_FRAME_LEN};
use super::Transport;

/// Rotator controller attached to a serial port
///
/// The `serialport` API is blocking, so every call runs on the blocking pool
/// and is additionally bounded by a tokio timeout.
pub struct SerialTransport {
    /// Device path, kept for logging
    path: String,
    /// Port shared with in-flight blocking calls
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    /// Bound on writes
    write_timeout: Duration,
    /// Bytes received but not yet framed
    rx_buffer: BytesMut,
    framer: StatusFramer,
}

impl SerialTransport {
    /// Opens a serial device at 8N1 without flow control
    pub fn open(path: &str, baud_rate: u32, io_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(io_timeout)
            .open()
            .map_err(|e| Error::connect(format!("Failed to open {}: {}", path, e)))?;

        Ok(SerialTransport {
            path: path.to_string(),
            port: Arc::new(Mutex::new(port)),
            write_timeout: io_timeout,
            rx_buffer: BytesMut::with_capacity(4 * STATUS_FRAME_LEN),
            framer: StatusFramer,
        })
    }

    async fn blocking<T, F>(&self, operation: &'static str, limit: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialPort) -> io::Result<T> + Send + 'static,
    {
        let port = Arc::clone(&self.port);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| Error::transport("serial port lock poisoned"))?;
            match f(guard.as_mut()) {
                Ok(value) => Ok(value),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::timeout(operation, limit)),
                Err(e) => Err(Error::Io(e)),
            }
        });

        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::transport(format!("serial worker failed: {}", e))),
            Err(_) => Err(Error::timeout(operation, limit)),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let data = frame.to_vec();
        self.blocking("write frame", self.write_timeout, move |port| {
            port.write_all(&data)?;
            port.flush()
        })
        .await
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(frame) = self.framer.decode(&mut self.rx_buffer)? {
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::timeout("read status frame", timeout));
            }

            let chunk = self
                .blocking("read status frame", remaining, move |port| {
                    port.set_timeout(remaining)?;
                    let mut buf = [0u8; 64];
                    let n = port.read(&mut buf)?;
                    Ok(buf[..n].to_vec())
                })
                .await?;

            if chunk.is_empty() {
                return Err(Error::transport("serial port returned end of stream"));
            }
            self.rx_buffer.extend_from_slice(&chunk);
        }
    }

    async fn discard_input(&mut self) -> Result<()> {
        self.rx_buffer.clear();
        self.blocking("discard input", self.write_timeout, |port| {
            port.clear(ClearBuffer::Input).map_err(io::Error::from)
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        debug!("Closing serial port {}", self.path);
        self.rx_buffer.clear();
        if let Err(e) = self
            .blocking("close", self.write_timeout, |port| {
                port.clear(ClearBuffer::All).map_err(io::Error::from)
            })
            .await
        {
            warn!("Failed to flush {} on close: {}", self.path, e);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_open_missing_device() {
        let err = SerialTransport::open("/dev/does-not-exist-spid", 115_200, Duration::from_millis(100))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(err.to_string().contains("/dev/does-not-exist-spid"));
    }
}
