//! Tracking scheduler
//!
//! One session per [`TrackingTarget`]: every tick resolves the target at the
//! engine clock's now, screens it through the safety guard and commands a
//! move when the target has drifted far enough from the last command. A
//! status query after each tick keeps the last known position fresh.

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::core::{Error, Position, TrackingTarget};
use crate::protocol::Command;
use super::Shared;

/// Runs a tracking session until cancelled or a tick fails
pub(super) async fn run(shared: Arc<Shared>, target: TrackingTarget, token: CancellationToken) {
    let settings = shared.config.tracking.clone();
    let mut ticker = interval(settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent: Option<Position> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Tracking cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let observer = shared.observer();
        let position = match shared.ephemeris.resolve(&target, &observer, shared.clock.now()) {
            Ok(position) => position,
            Err(e) => return end_session(&shared, &token, e).await,
        };

        if let Err(e) = shared.safety.check(&position) {
            return end_session(&shared, &token, e).await;
        }

        if !shared
            .update_unless_cancelled(&token, |state| state.target_position = Some(position))
            .await
        {
            return;
        }

        let drift = last_sent.map(|sent| sent.max_axis_delta(&position));
        if drift.map_or(true, |d| d > settings.min_movement_deg) {
            match shared.send(Command::Move(position), Some(&token)).await {
                Ok(_) => {
                    debug!("Tracking {} -> {}", target, position);
                    last_sent = Some(position);
                    // The frame is on the wire even if the session was cancelled meanwhile
                    shared.state.lock().await.last_commanded = Some(position);
                }
                Err(Error::Cancelled) => return,
                Err(e) => return end_session(&shared, &token, e).await,
            }
        } else {
            debug!("{} moved {:.3}°, below threshold", target, drift.unwrap_or_default());
        }

        match shared.send(Command::Status, Some(&token)).await {
            Ok(Some(reported)) => {
                shared
                    .update_unless_cancelled(&token, |state| state.last_known_position = reported)
                    .await;
            }
            Ok(None) => {}
            Err(Error::Cancelled) => return,
            Err(e) => return end_session(&shared, &token, e).await,
        }
    }
}

/// Ends the session after a failed tick
///
/// Hardware and ephemeris failures fault the mount; a safety rejection only
/// returns it to idle.
async fn end_session(shared: &Shared, token: &CancellationToken, e: Error) {
    let fault = !matches!(e, Error::RejectedPosition(_));
    if fault {
        error!("Tracking failed: {}", e);
    } else {
        warn!("Tracking stopped: {}", e);
    }

    let record = shared.record(&e);
    shared
        .update_unless_cancelled(token, |state| {
            state.go_idle();
            state.faulted |= fault;
            state.last_error = Some(record);
        })
        .await;
}
