use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

use crate::core::{Error, Position, Resolution, Result, SimulatorConfig};
use crate::protocol::{Command, SpidCodec, END_MARKER};
use super::Transport;

/// In-memory rotator speaking the controller's wire protocol
///
/// Commanded moves slew both axes independently at a fixed rate, or complete
/// instantly when no rate is configured. Azimuth travels linearly between the
/// end stops and never crosses north. Time comes from `tokio::time`, so
/// paused-clock tests observe slewing deterministically.
pub struct SimulatedRotator {
    codec: SpidCodec,
    shared: Arc<Mutex<RotatorState>>,
    replies: VecDeque<Bytes>,
}

/// Cloneable view into a [`SimulatedRotator`] for tests and diagnostics
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<Mutex<RotatorState>>,
}

#[derive(Debug)]
struct RotatorState {
    /// Position when the current move began
    origin: Position,
    /// Active move target
    target: Option<Position>,
    /// When the current move began
    started: Instant,
    slew_rate: Option<f64>,
    log: Vec<Command>,
    faults: Faults,
    open: bool,
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: u32,
    drop_replies: u32,
    corrupt_replies: u32,
}

impl RotatorState {
    fn current(&self, now: Instant) -> Position {
        let Some(target) = self.target else {
            return self.origin;
        };
        let Some(rate) = self.slew_rate else {
            return target;
        };

        let travel = rate * now.saturating_duration_since(self.started).as_secs_f64();
        let azimuth = approach(self.origin.azimuth(), target.azimuth(), travel);
        let elevation = approach(self.origin.elevation(), target.elevation(), travel);
        // Both values lie between two valid positions
        Position::new(azimuth, elevation).unwrap_or(target)
    }

    /// Freezes the current position as the origin of the next move
    fn settle(&mut self, now: Instant) {
        self.origin = self.current(now);
        self.started = now;
    }
}

fn approach(from: f64, to: f64, travel: f64) -> f64 {
    if (to - from).abs() <= travel {
        to
    } else if to > from {
        from + travel
    } else {
        from - travel
    }
}

impl SimulatedRotator {
    /// Creates a rotator at `config.initial_position`
    pub fn new(resolution: Resolution, config: SimulatorConfig) -> Self {
        let state = RotatorState {
            origin: config.initial_position,
            target: None,
            started: Instant::now(),
            slew_rate: config.slew_rate_deg_per_s,
            log: Vec::new(),
            faults: Faults::default(),
            open: true,
        };

        SimulatedRotator {
            codec: SpidCodec::new(resolution),
            shared: Arc::new(Mutex::new(state)),
            replies: VecDeque::new(),
        }
    }

    /// Handle sharing this rotator's state
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, RotatorState>> {
        self.shared
            .lock()
            .map_err(|_| Error::transport("simulator state poisoned"))
    }
}

#[async_trait]
impl Transport for SimulatedRotator {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let command = self.codec.decode_command(frame)?;
        let now = Instant::now();

        let reply = {
            let mut state = self.state()?;
            if !state.open {
                return Err(Error::transport("simulator is closed"));
            }
            if state.faults.fail_writes > 0 {
                state.faults.fail_writes -= 1;
                return Err(Error::transport("injected write failure"));
            }

            state.log.push(command);
            let reported = match command {
                Command::Move(target) => {
                    state.settle(now);
                    state.target = Some(target);
                    None
                }
                Command::Stop => {
                    state.settle(now);
                    state.target = None;
                    Some(state.origin)
                }
                Command::Status => Some(state.current(now)),
            };
            reported.map(|position| (position, state.faults.take_reply_fault()))
        };

        if let Some((position, fault)) = reply {
            let frame = self.codec.encode_status(&position)?;
            match fault {
                ReplyFault::Drop => debug!("Simulator dropping reply to {}", command),
                ReplyFault::Corrupt => {
                    let mut bytes = frame.to_vec();
                    if let Some(last) = bytes.last_mut() {
                        *last = !END_MARKER;
                    }
                    self.replies.push_back(Bytes::from(bytes));
                }
                ReplyFault::None => self.replies.push_back(frame),
            }
        }
        Ok(())
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<Bytes> {
        if let Some(frame) = self.replies.pop_front() {
            return Ok(frame);
        }
        tokio::time::sleep(timeout).await;
        Err(Error::timeout("read status frame", timeout))
    }

    async fn discard_input(&mut self) -> Result<()> {
        self.replies.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.replies.clear();
        self.state()?.open = false;
        Ok(())
    }

    fn describe(&self) -> String {
        "simulator".to_string()
    }
}

enum ReplyFault {
    None,
    Drop,
    Corrupt,
}

impl Faults {
    fn take_reply_fault(&mut self) -> ReplyFault {
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            ReplyFault::Drop
        } else if self.corrupt_replies > 0 {
            self.corrupt_replies -= 1;
            ReplyFault::Corrupt
        } else {
            ReplyFault::None
        }
    }
}

impl SimulatorHandle {
    fn with<T>(&self, f: impl FnOnce(&mut RotatorState) -> T) -> T {
        let mut state = match self.shared.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    /// Where the rotator physically points right now
    pub fn position(&self) -> Position {
        self.with(|s| s.current(Instant::now()))
    }

    /// Whether a commanded move is still under way
    pub fn is_moving(&self) -> bool {
        self.with(|s| {
            let now = Instant::now();
            s.target.map_or(false, |t| s.current(now) != t)
        })
    }

    /// Every command received, in arrival order
    pub fn command_log(&self) -> Vec<Command> {
        self.with(|s| s.log.clone())
    }

    /// Forgets the command log
    pub fn clear_log(&self) {
        self.with(|s| s.log.clear())
    }

    /// Makes the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.with(|s| s.faults.fail_writes = count)
    }

    /// Swallows the next `count` replies
    pub fn drop_next_replies(&self, count: u32) {
        self.with(|s| s.faults.drop_replies = count)
    }

    /// Damages the end marker of the next `count` replies
    pub fn corrupt_next_replies(&self, count: u32) {
        self.with(|s| s.faults.corrupt_replies = count)
    }

    /// Changes the slew rate for moves commanded from now on
    pub fn set_slew_rate(&self, rate: Option<f64>) {
        self.with(|s| {
            s.settle(Instant::now());
            s.slew_rate = rate;
        })
    }

    /// Whether the transport is still open
    pub fn is_open(&self) -> bool {
        self.with(|s| s.open)
    }
}
