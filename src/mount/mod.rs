//! Mount module
//!
//! [`MountEngine`] is the single owner of the rotator link and the only
//! writer of [`MountState`]. Public operations are serialised against each
//! other; background work (settling after a move, tracking) runs as one
//! cancellable task at a time.
//!
//! Locking order is transitions, then link, then state. The state lock is
//! never held while waiting for the link, and no lock is held while waiting
//! for a background task to finish. Emergency stop skips the transitions lock
//! so it cannot be held up by a slow operation.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::core::{
    Axis, ConnectionConfig, EngineConfig, Error, ErrorKind, ErrorRecord, ObserverLocation, Position,
    Rejection, Result, TrackingTarget,
};
use crate::ephemeris::{EphemerisEngine, Observation};
use crate::protocol::{Command, SpidCodec};
use crate::transport::{self, Link, Transport};

pub mod clock;
pub mod safety;
mod settle;
pub mod state;
mod tracking;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::safety::SafetyGuard;
pub use self::state::{Connection, Motion, MountPhase, MountSnapshot, MountState};

/// Whether an error came from talking to the rotator
fn is_hardware_failure(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::Decode)
}

/// The one background task the engine may be running
struct Background {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Background {
    async fn join(self) {
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("Background task panicked: {}", e);
            }
        }
    }
}

/// State shared between the engine handle and its background tasks
struct Shared {
    config: EngineConfig,
    codec: SpidCodec,
    ephemeris: EphemerisEngine,
    safety: SafetyGuard,
    clock: Arc<dyn Clock>,
    observer: RwLock<ObserverLocation>,
    state: Mutex<MountState>,
    link: Mutex<Option<Link>>,
    /// Held for the duration of every public transition
    transitions: Mutex<()>,
    background: StdMutex<Option<Background>>,
}

impl Shared {
    /// Executes one command over the link
    ///
    /// Moves are screened by the safety guard again while the link is held,
    /// and nothing is written once `token` is cancelled.
    async fn send(&self, command: Command, token: Option<&CancellationToken>) -> Result<Option<Position>> {
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(Error::NotConnected)?;

        if token.map_or(false, CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        if let Command::Move(target) = &command {
            self.safety.check(target)?;
        }

        Ok(link.execute(&command).await?.into_inner())
    }

    /// Applies `f` to the state unless `token` was cancelled; returns whether it ran
    async fn update_unless_cancelled(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut MountState),
    ) -> bool {
        let mut state = self.state.lock().await;
        if token.is_cancelled() {
            return false;
        }
        f(&mut state);
        true
    }

    fn observer(&self) -> ObserverLocation {
        self.observer.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, e: &Error) -> ErrorRecord {
        e.record(self.clock.now())
    }

    /// Removes the background task, signalling it to stop
    fn take_background(&self) -> Option<Background> {
        let task = self.background.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = &task {
            task.token.cancel();
        }
        task
    }

    fn spawn_background<F>(self: &Arc<Self>, span: tracing::Span, task: impl FnOnce(Arc<Self>, CancellationToken) -> F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(task(Arc::clone(self), token.clone()).instrument(span));
        let replaced = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Background { token: token.clone(), handle });
        if let Some(old) = replaced {
            old.token.cancel();
        }
        // An emergency stop that found the slot empty must still stop this task
        if self.safety.is_engaged() {
            token.cancel();
        }
    }

    /// Records a failed motion command
    async fn fail_motion(&self, e: &Error) {
        let record = self.record(e);
        let mut state = self.state.lock().await;
        state.go_idle();
        state.last_error = Some(record);
        if is_hardware_failure(e) {
            state.faulted = true;
            error!("Rotator entered error state: {}", e);
        } else {
            warn!("Motion command failed: {}", e);
        }
    }
}

/// Controls one rotator
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct MountEngine {
    inner: Arc<Shared>,
}

impl MountEngine {
    /// Creates an engine using the wall clock
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an engine reading time from `clock`
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let shared = Shared {
            codec: SpidCodec::new(config.resolution),
            ephemeris: EphemerisEngine::new(),
            safety: SafetyGuard::new(config.limits),
            clock,
            observer: RwLock::new(config.observer.clone()),
            state: Mutex::new(MountState::default()),
            link: Mutex::new(None),
            transitions: Mutex::new(()),
            background: StdMutex::new(None),
            config,
        };

        Ok(MountEngine {
            inner: Arc::new(shared),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Opens the link described by `connection` and reads the start position
    pub async fn connect(&self, connection: ConnectionConfig) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;
        self.ensure_disconnected().await?;

        let transport = transport::open(&connection, &self.inner.config).await?;
        self.attach(transport).await
    }

    /// Connects over an already open transport
    pub async fn connect_transport(&self, transport: Box<dyn Transport>) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;
        self.ensure_disconnected().await?;
        self.attach(transport).await
    }

    async fn ensure_disconnected(&self) -> Result<()> {
        match self.inner.link.lock().await.as_ref() {
            Some(link) => Err(Error::AlreadyConnected(link.describe())),
            None => Ok(()),
        }
    }

    async fn attach(&self, transport: Box<dyn Transport>) -> Result<()> {
        let config = &self.inner.config;
        let port = transport.describe();
        let mut link = Link::new(transport, self.inner.codec, config.io_timeout, config.io_retries);

        let handshake = link
            .execute(&Command::Status)
            .await
            .and_then(|attempt| {
                attempt
                    .into_inner()
                    .ok_or_else(|| Error::transport("status query produced no reply"))
            });

        let position = match handshake {
            Ok(position) => position,
            Err(e) => {
                if let Err(close) = link.close().await {
                    warn!("Failed to close {} after handshake failure: {}", port, close);
                }
                return Err(Error::connect(format!("no answer from rotator on {}: {}", port, e)));
            }
        };

        *self.inner.link.lock().await = Some(link);
        *self.inner.state.lock().await = MountState {
            connection: Connection::Connected { port: port.clone() },
            last_known_position: position,
            ..MountState::default()
        };

        info!("Connected to {}, rotator at {}", port, position);
        Ok(())
    }

    /// Closes the link, cancelling any background work
    ///
    /// Always succeeds; close failures are logged.
    pub async fn disconnect(&self) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;

        if let Some(task) = self.inner.take_background() {
            task.join().await;
        }

        let link = self.inner.link.lock().await.take();
        let Some(link) = link else {
            debug!("Disconnect while already disconnected");
            return Ok(());
        };

        let port = link.describe();
        if let Err(e) = link.close().await {
            warn!("Failed to close {}: {}", port, e);
        }
        self.inner.state.lock().await.reset();

        info!("Disconnected from {}", port);
        Ok(())
    }

    /// Fails unless connected; optionally also unless healthy
    async fn require_connected(&self, allow_faulted: bool) -> Result<()> {
        let state = self.inner.state.lock().await;
        if !state.is_connected() {
            return Err(Error::NotConnected);
        }
        if state.faulted && !allow_faulted {
            let detail = state
                .last_error
                .as_ref()
                .map(|record| record.detail.clone())
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(Error::faulted(detail));
        }
        Ok(())
    }

    /// Slews to `target`
    ///
    /// Returns once the move is on the wire; the mount reports Moving until
    /// the rotator confirms the position or the settle timeout passes.
    pub async fn set_position(&self, target: Position) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;
        self.move_to(target).await
    }

    async fn move_to(&self, target: Position) -> Result<()> {
        self.require_connected(true).await?;
        if let Err(e) = self.inner.safety.check(&target) {
            warn!("Refusing move to {}: {}", target, e);
            return Err(e);
        }

        if let Some(task) = self.inner.take_background() {
            task.join().await;
        }

        if let Err(e) = self.inner.send(Command::Move(target), None).await {
            self.inner.fail_motion(&e).await;
            return Err(e);
        }

        {
            let mut state = self.inner.state.lock().await;
            if self.inner.safety.is_engaged() {
                state.go_idle();
                return Err(Error::RejectedPosition(Rejection::EmergencyStop));
            }
            state.motion = Motion::Moving(target);
            state.faulted = false;
            state.last_commanded = Some(target);
            state.target_position = Some(target);
        }

        info!("Moving to {}", target);
        let span = info_span!("settle", %target);
        self.inner
            .spawn_background(span, move |shared, token| settle::watch(shared, target, token));
        Ok(())
    }

    /// Moves one axis by `delta` degrees relative to where the mount is
    ///
    /// Azimuth wraps around the circle; elevation is clamped to the limits.
    /// Returns the commanded position.
    pub async fn jog(&self, axis: Axis, delta: f64) -> Result<Position> {
        if !delta.is_finite() {
            return Err(Error::invalid_position(format!("jog of {} degrees", delta)));
        }
        let _transition = self.inner.transitions.lock().await;

        let base = {
            let state = self.inner.state.lock().await;
            match state.motion {
                Motion::Moving(target) => target,
                _ => state.last_known_position,
            }
        };

        let target = match axis {
            Axis::Azimuth => Position::wrapped(base.azimuth() + delta, base.elevation())?,
            Axis::Elevation => Position::new(
                base.azimuth(),
                self.inner.safety.clamp_elevation(base.elevation() + delta),
            )?,
        };

        self.move_to(target).await?;
        Ok(target)
    }

    /// Halts the rotator, ending any move or tracking session
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;
        self.require_connected(true).await?;

        let task = self.inner.take_background();
        let result = self.inner.send(Command::Stop, None).await;
        if let Some(task) = task {
            task.join().await;
        }

        match result {
            Ok(reply) => {
                let mut state = self.inner.state.lock().await;
                state.go_idle();
                state.faulted = false;
                if let Some(position) = reply {
                    state.last_known_position = position;
                }
                info!("Stopped at {}", state.last_known_position);
                Ok(())
            }
            Err(e) => {
                self.inner.fail_motion(&e).await;
                Err(e)
            }
        }
    }

    /// Raises the emergency stop and halts the rotator
    ///
    /// Every later move or tracking tick is rejected until
    /// [`clear_emergency_stop`](Self::clear_emergency_stop). Works while
    /// disconnected, where it only raises the flag.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.inner.safety.engage();
        let task = self.inner.take_background();

        let result = match self.inner.send(Command::Stop, None).await {
            Err(Error::NotConnected) => Ok(None),
            other => other,
        };
        if let Some(task) = task {
            task.join().await;
        }

        let record = result.as_ref().err().map(|e| self.inner.record(e));
        let mut state = self.inner.state.lock().await;
        if state.is_connected() {
            state.go_idle();
            match &result {
                Ok(reply) => {
                    state.faulted = false;
                    if let Some(position) = reply {
                        state.last_known_position = *position;
                    }
                }
                Err(e) => {
                    error!("Emergency stop could not reach the rotator: {}", e);
                    state.faulted = true;
                    state.last_error = record;
                }
            }
        }

        result.map(|_| ())
    }

    /// Lowers the emergency stop
    pub fn clear_emergency_stop(&self) {
        if self.inner.safety.release() {
            info!("Emergency stop cleared");
        }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.inner.safety.is_engaged()
    }

    /// Starts following `target`, replacing any move or earlier session
    ///
    /// The target is resolved once up front: an unknown target or one outside
    /// the limits is refused without touching the mount.
    pub async fn start_tracking(&self, target: TrackingTarget) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;
        self.require_connected(false).await?;

        let observer = self.inner.observer();
        let initial = self
            .inner
            .ephemeris
            .resolve(&target, &observer, self.inner.clock.now())?;
        self.inner.safety.check(&initial)?;

        if let Some(task) = self.inner.take_background() {
            task.join().await;
        }

        {
            let mut state = self.inner.state.lock().await;
            // Raised while the previous task was winding down
            if self.inner.safety.is_engaged() {
                return Err(Error::RejectedPosition(Rejection::EmergencyStop));
            }
            state.motion = Motion::Tracking(target.clone());
            state.target_position = Some(initial);
        }

        info!("Tracking {} from {}", target, initial);
        let span = info_span!("tracking", %target);
        self.inner
            .spawn_background(span, move |shared, token| tracking::run(shared, target, token));
        Ok(())
    }

    /// Ends the tracking session, leaving the mount where it was last sent
    pub async fn stop_tracking(&self) -> Result<()> {
        let _transition = self.inner.transitions.lock().await;

        let tracking = matches!(self.inner.state.lock().await.motion, Motion::Tracking(_));
        if !tracking {
            debug!("Not tracking");
            return Ok(());
        }

        if let Some(task) = self.inner.take_background() {
            task.join().await;
        }
        self.inner.state.lock().await.go_idle();
        info!("Tracking stopped");
        Ok(())
    }

    /// Where `target` stands for the current observer right now
    pub fn locate(&self, target: &TrackingTarget) -> Result<Observation> {
        self.inner
            .ephemeris
            .observe(target, &self.inner.observer(), self.inner.clock.now())
    }

    /// Copy of the current state
    pub async fn get_state(&self) -> MountSnapshot {
        let state = self.inner.state.lock().await;
        MountSnapshot::capture(&state, self.inner.safety.is_engaged(), self.inner.observer())
    }

    pub fn get_observer(&self) -> ObserverLocation {
        self.inner.observer()
    }

    /// Replaces the observer; the next tracking tick uses the new location
    pub fn set_observer(&self, observer: ObserverLocation) -> Result<()> {
        observer.validate()?;
        info!(
            "Observer set to {} ({:.4}, {:.4})",
            observer.name, observer.latitude, observer.longitude
        );
        *self.inner.observer.write().unwrap_or_else(PoisonError::into_inner) = observer;
        Ok(())
    }

    /// Serial ports present on this machine
    pub fn list_ports(&self) -> Result<Vec<String>> {
        transport::list_ports()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SimulatorConfig;
    use crate::transport::{SimulatedRotator, SimulatorHandle};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    /// Simulator whose writes take `delay`, leaving a frame in flight
    struct SlowWrites {
        rotator: SimulatedRotator,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowWrites {
        async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
            sleep(self.delay).await;
            self.rotator.write_frame(frame).await
        }

        async fn read_frame(&mut self, timeout: Duration) -> Result<Bytes> {
            self.rotator.read_frame(timeout).await
        }

        async fn discard_input(&mut self) -> Result<()> {
            self.rotator.discard_input().await
        }

        async fn close(&mut self) -> Result<()> {
            self.rotator.close().await
        }

        fn describe(&self) -> String {
            self.rotator.describe()
        }
    }

    async fn connected_slow(delay: Duration) -> (MountEngine, SimulatorHandle) {
        let config = instant_config();
        let clock = FixedClock::new(solstice());
        let engine = MountEngine::with_clock(config.clone(), Arc::new(clock)).unwrap();
        let rotator = SimulatedRotator::new(config.resolution, config.simulator.clone());
        let handle = rotator.handle();
        engine
            .connect_transport(Box::new(SlowWrites { rotator, delay }))
            .await
            .unwrap();
        (engine, handle)
    }

    fn solstice() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 21, 10, 0, 0).unwrap()
    }

    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 21, 22, 0, 0).unwrap()
    }

    fn instant_config() -> EngineConfig {
        EngineConfig {
            simulator: SimulatorConfig {
                slew_rate_deg_per_s: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn connected(config: EngineConfig) -> (MountEngine, SimulatorHandle, FixedClock) {
        let clock = FixedClock::new(solstice());
        let engine = MountEngine::with_clock(config.clone(), Arc::new(clock.clone())).unwrap();
        let rotator = SimulatedRotator::new(config.resolution, config.simulator.clone());
        let handle = rotator.handle();
        engine.connect_transport(Box::new(rotator)).await.unwrap();
        (engine, handle, clock)
    }

    async fn wait_for_phase(engine: &MountEngine, phase: MountPhase, within: Duration) -> MountSnapshot {
        let deadline = Instant::now() + within;
        loop {
            let snapshot = engine.get_state().await;
            if snapshot.phase == phase {
                return snapshot;
            }
            assert!(
                Instant::now() < deadline,
                "still {:?} after {:?}",
                snapshot.phase,
                within
            );
            sleep(Duration::from_millis(100)).await;
        }
    }

    fn kinds(log: &[Command]) -> Vec<&'static str> {
        log.iter()
            .map(|c| match c {
                Command::Move(_) => "move",
                Command::Stop => "stop",
                Command::Status => "status",
            })
            .collect()
    }

    fn pos(az: f64, el: f64) -> Position {
        Position::new(az, el).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulator_move_settles() {
        let engine = MountEngine::new(EngineConfig::default()).unwrap();
        assert_ok!(engine.connect(ConnectionConfig::simulator()).await);
        assert_eq!(engine.get_state().await.phase, MountPhase::Idle);

        let target = pos(180.0, 45.0);
        assert_ok!(engine.set_position(target).await);
        let moving = engine.get_state().await;
        assert_eq!(moving.phase, MountPhase::Moving);
        assert_eq!(moving.motion, Motion::Moving(target));
        assert_eq!(moving.last_known_position, Position::HOME);

        let settled = wait_for_phase(&engine, MountPhase::Idle, engine.config().settle_timeout).await;
        assert_eq!(settled.last_known_position, target);
        assert_eq!(settled.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_fails() {
        let (engine, _, _) = connected(instant_config()).await;
        let err = assert_err!(engine.connect(ConnectionConfig::simulator()).await);
        assert!(matches!(err, Error::AlreadyConnected(ref port) if port == "simulator"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_connection() {
        let engine = MountEngine::new(instant_config()).unwrap();
        assert_eq!(
            engine.set_position(pos(10.0, 10.0)).await.unwrap_err().kind(),
            ErrorKind::NotConnected
        );
        assert_eq!(engine.stop().await.unwrap_err().kind(), ErrorKind::NotConnected);
        assert_eq!(
            engine.start_tracking(TrackingTarget::Sun).await.unwrap_err().kind(),
            ErrorKind::NotConnected
        );
        assert_ok!(engine.disconnect().await);
        assert_ok!(engine.stop_tracking().await);
        assert_eq!(engine.get_state().await.phase, MountPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_failure_stays_disconnected() {
        let config = instant_config();
        let engine = MountEngine::new(config.clone()).unwrap();
        let rotator = SimulatedRotator::new(config.resolution, config.simulator.clone());
        let handle = rotator.handle();
        handle.drop_next_replies(2);

        let err = assert_err!(engine.connect_transport(Box::new(rotator)).await);
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(engine.get_state().await.phase, MountPhase::Disconnected);
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_position_writes_nothing() {
        let (engine, handle, _) = connected(instant_config()).await;
        let before = engine.get_state().await;
        let log_before = handle.command_log();

        let err = assert_err!(engine.set_position(pos(10.0, -5.0)).await);
        assert!(matches!(err, Error::RejectedPosition(Rejection::OutsideLimits { .. })));
        assert_eq!(handle.command_log(), log_before);
        assert_eq!(engine.get_state().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_sun_from_krakow() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Tracking);
        assert_eq!(state.motion, Motion::Tracking(TrackingTarget::Sun));
        let aim = state.target_position.unwrap();
        // Independent NOAA reference for this instant: az 158.96°, el 62.13°
        assert!((aim.azimuth() - 158.96).abs() < 0.5, "{}", aim);
        assert!((aim.elevation() - 62.13).abs() < 0.5, "{}", aim);
        assert!(handle.position().max_axis_delta(&aim) <= 0.1);
        assert!(state.last_known_position.max_axis_delta(&aim) <= 0.1);

        assert_ok!(engine.stop_tracking().await);
        let halted = handle.command_log().len();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.command_log().len(), halted);

        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.last_commanded, Some(aim));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_skips_small_moves() {
        let (engine, handle, clock) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        // Frozen clock: the Sun does not move, so ticks only poll status
        sleep(Duration::from_secs(20)).await;
        let log = handle.command_log();
        assert_eq!(kinds(&log).iter().filter(|k| **k == "move").count(), 1);

        // Ten minutes later the Sun has moved well past the threshold
        clock.advance(chrono::Duration::minutes(10));
        sleep(Duration::from_secs(5)).await;
        let log = handle.command_log();
        assert_eq!(kinds(&log).iter().filter(|k| **k == "move").count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_tracking() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        assert_ok!(engine.disconnect().await);
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Disconnected);
        assert_eq!(state.motion, Motion::Idle);
        assert_eq!(state.connection, Connection::Disconnected);
        assert!(!handle.is_open());

        let log = handle.command_log().len();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.command_log().len(), log);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_planet_leaves_state_unchanged() {
        let (engine, handle, _) = connected(instant_config()).await;
        let before = engine.get_state().await;

        let err = assert_err!(engine.start_tracking(TrackingTarget::parse("Pluto")).await);
        assert_eq!(err.kind(), ErrorKind::UnresolvedTarget);
        assert_eq!(engine.get_state().await, before);
        assert_eq!(kinds(&handle.command_log()), vec!["status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_below_horizon_refused() {
        let (engine, _, clock) = connected(instant_config()).await;
        clock.set(night());
        let err = assert_err!(engine.start_tracking(TrackingTarget::Sun).await);
        assert!(matches!(err, Error::RejectedPosition(Rejection::OutsideLimits { .. })));
        assert_eq!(engine.get_state().await.phase, MountPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracking_ends_when_target_sets() {
        let (engine, _, clock) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        clock.set(night());
        let state = wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(10)).await;
        assert_eq!(state.motion, Motion::Idle);
        let record = state.last_error.unwrap();
        assert_eq!(record.kind, ErrorKind::RejectedPosition);
        assert_eq!(record.at, night());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_tracking_runs_one_loop() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        let polaris = TrackingTarget::parse("Polaris");
        assert_ok!(engine.start_tracking(polaris.clone()).await);
        sleep(Duration::from_secs(1)).await;

        let log = handle.command_log();
        assert_eq!(kinds(&log), vec!["status", "move", "status", "move", "status"]);

        let aim = engine.locate(&polaris).unwrap().position;
        match log[3] {
            Command::Move(sent) => assert!(sent.max_axis_delta(&aim) <= 0.1),
            other => panic!("expected a move, got {}", other),
        }
        assert_eq!(engine.get_state().await.motion, Motion::Tracking(polaris));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_blocks_motion() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        assert_ok!(engine.emergency_stop().await);
        assert!(engine.is_emergency_stopped());
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert!(state.emergency_stop);
        assert_eq!(handle.command_log().last(), Some(&Command::Stop));

        let log = handle.command_log();
        let err = assert_err!(engine.set_position(pos(90.0, 10.0)).await);
        assert!(matches!(err, Error::RejectedPosition(Rejection::EmergencyStop)));
        let err = assert_err!(engine.start_tracking(TrackingTarget::Sun).await);
        assert!(matches!(err, Error::RejectedPosition(Rejection::EmergencyStop)));
        let err = assert_err!(engine.jog(Axis::Azimuth, 5.0).await);
        assert!(matches!(err, Error::RejectedPosition(Rejection::EmergencyStop)));
        sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.command_log(), log);

        // Stop is still allowed
        assert_ok!(engine.stop().await);

        engine.clear_emergency_stop();
        assert_ok!(engine.set_position(pos(90.0, 10.0)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_while_disconnected() {
        let engine = MountEngine::new(instant_config()).unwrap();
        assert_ok!(engine.emergency_stop().await);
        assert!(engine.is_emergency_stopped());
        assert_eq!(engine.get_state().await.phase, MountPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_dropped_reply() {
        let (engine, handle, _) = connected(instant_config()).await;
        handle.drop_next_replies(1);

        assert_ok!(engine.stop().await);
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.last_error, None);
        assert_eq!(kinds(&handle.command_log()), vec!["status", "stop", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failure_enters_error_state() {
        let (engine, handle, _) = connected(instant_config()).await;
        handle.drop_next_replies(2);

        let err = assert_err!(engine.stop().await);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Error);
        assert_eq!(state.last_error.unwrap().kind, ErrorKind::Timeout);

        let err = assert_err!(engine.start_tracking(TrackingTarget::Sun).await);
        assert_eq!(err.kind(), ErrorKind::Faulted);

        // An explicit stop that gets through clears the error
        assert_ok!(engine.stop().await);
        assert_eq!(engine.get_state().await.phase, MountPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_during_move() {
        let (engine, handle, _) = connected(instant_config()).await;
        handle.fail_next_writes(2);

        let err = assert_err!(engine.set_position(pos(90.0, 10.0)).await);
        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Error);
        assert_eq!(state.last_commanded, None);

        // Retrying the move is a way out of the error state
        assert_ok!(engine.set_position(pos(90.0, 10.0)).await);
        let state = wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(5)).await;
        assert_eq!(state.last_known_position, pos(90.0, 10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_timeout() {
        let config = EngineConfig {
            settle_timeout: Duration::from_secs(10),
            simulator: SimulatorConfig {
                slew_rate_deg_per_s: Some(1.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, handle, _) = connected(config).await;

        assert_ok!(engine.set_position(pos(180.0, 45.0)).await);
        let state = wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(30)).await;
        assert_eq!(state.last_error.unwrap().kind, ErrorKind::MotionTimeout);
        assert_eq!(handle.command_log().last(), Some(&Command::Stop));
        assert!(!handle.is_moving());
        // Position comes from the stop reply, never assumed
        assert!(state.last_known_position.azimuth() < 20.0);
        assert!(state.last_known_position.max_axis_delta(&handle.position()) <= 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_tracking() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;

        assert_ok!(engine.stop().await);
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.motion, Motion::Idle);
        assert_eq!(state.target_position, None);
        assert_eq!(handle.command_log().last(), Some(&Command::Stop));

        let sent = handle.command_log().len();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.command_log().len(), sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_goes_ahead_of_tracking_tick() {
        let (engine, handle) = connected_slow(Duration::from_secs(1)).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        // First tick's move is still on its way to the rotator
        sleep(Duration::from_millis(500)).await;

        assert_ok!(engine.stop().await);
        assert_eq!(kinds(&handle.command_log()), vec!["status", "move", "stop"]);
        assert_eq!(engine.get_state().await.phase, MountPhase::Idle);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(kinds(&handle.command_log()), vec!["status", "move", "stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_moving() {
        let (engine, handle, _) = connected(instant_config()).await;
        handle.set_slew_rate(Some(2.0));

        let target = pos(100.0, 20.0);
        assert_ok!(engine.set_position(target).await);
        sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.get_state().await.phase, MountPhase::Moving);

        assert_ok!(engine.stop().await);
        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.motion, Motion::Idle);
        assert!(!handle.is_moving());

        let halted = handle.position();
        assert!((halted.azimuth() - 6.0).abs() < 0.2, "{}", halted);
        assert!(state.last_known_position.max_axis_delta(&halted) <= 0.1);
        assert!(state.last_known_position.max_axis_delta(&target) > 1.0);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.position(), halted);
        assert_eq!(engine.get_state().await.last_known_position, state.last_known_position);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_stop_racing_start_tracking() {
        let (engine, handle, _) = connected(instant_config()).await;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_secs(1)).await;
        handle.clear_log();

        let (started, stopped) = tokio::join!(
            engine.start_tracking(TrackingTarget::Sun),
            engine.emergency_stop()
        );
        assert_ok!(stopped);
        let err = assert_err!(started);
        assert!(matches!(err, Error::RejectedPosition(Rejection::EmergencyStop)));

        sleep(Duration::from_secs(30)).await;
        let state = engine.get_state().await;
        assert!(state.emergency_stop);
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.motion, Motion::Idle);
        assert_eq!(handle.command_log(), vec![Command::Stop]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tracking_keeps_move_already_sent() {
        let (engine, handle) = connected_slow(Duration::from_secs(1)).await;
        let aim = engine.locate(&TrackingTarget::Sun).unwrap().position;
        assert_ok!(engine.start_tracking(TrackingTarget::Sun).await);
        sleep(Duration::from_millis(500)).await;

        // Cancelled while the move is being written
        assert_ok!(engine.stop_tracking().await);
        assert_eq!(kinds(&handle.command_log()), vec!["status", "move"]);

        let state = engine.get_state().await;
        assert_eq!(state.phase, MountPhase::Idle);
        assert_eq!(state.last_commanded, Some(aim));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_move_replaces_old() {
        let config = EngineConfig {
            simulator: SimulatorConfig {
                slew_rate_deg_per_s: Some(2.0),
                ..Default::default()
            },
            ..Default::default()
        };
        let (engine, _, _) = connected(config).await;

        assert_ok!(engine.set_position(pos(100.0, 20.0)).await);
        sleep(Duration::from_secs(2)).await;
        assert_ok!(engine.set_position(pos(10.0, 10.0)).await);
        assert_eq!(engine.get_state().await.motion, Motion::Moving(pos(10.0, 10.0)));

        let state = wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(60)).await;
        assert_eq!(state.last_known_position, pos(10.0, 10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jog() {
        let (engine, _, _) = connected(instant_config()).await;

        let target = assert_ok!(engine.jog(Axis::Azimuth, -10.0).await);
        assert!((target.azimuth() - 350.0).abs() < 1e-9);
        wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(5)).await;

        let target = assert_ok!(engine.jog(Axis::Elevation, 120.0).await);
        assert_eq!(target.elevation(), 90.0);
        let state = wait_for_phase(&engine, MountPhase::Idle, Duration::from_secs(5)).await;
        assert_eq!(state.last_known_position, target);

        assert!(engine.jog(Axis::Azimuth, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_observer_replacement() {
        let engine = MountEngine::new(instant_config()).unwrap();
        assert_eq!(engine.get_observer(), ObserverLocation::default());

        let torun = ObserverLocation::new(53.0956, 18.5641, 70.0, "Toruń").unwrap();
        assert_ok!(engine.set_observer(torun.clone()));
        assert_eq!(engine.get_observer(), torun);
        assert_eq!(engine.get_state().await.observer, torun);

        let bad = ObserverLocation {
            latitude: 123.0,
            ..torun.clone()
        };
        assert_eq!(engine.set_observer(bad).unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(engine.get_observer(), torun);
    }

    #[tokio::test]
    async fn test_locate_uses_engine_clock() {
        let clock = FixedClock::new(solstice());
        let engine = MountEngine::with_clock(instant_config(), Arc::new(clock)).unwrap();
        let observation = engine.locate(&TrackingTarget::Sun).unwrap();
        assert_eq!(observation.at, solstice());
        assert!(observation.visible);
        assert!((observation.position.azimuth() - 158.96).abs() < 0.5);
    }

    #[test]
    fn test_invalid_config_refused() {
        let config = EngineConfig {
            io_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(MountEngine::new(config).err().map(|e| e.kind()), Some(ErrorKind::Config));
    }
}
