use std::sync::Arc;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{Error, Position};
use crate::protocol::Command;
use super::{is_hardware_failure, Shared};

/// Slack on top of one resolution step when comparing against the target
const SETTLE_EPSILON: f64 = 1e-6;

/// Polls status until the mount reaches `target` or the settle timeout passes
pub(super) async fn watch(shared: Arc<Shared>, target: Position, token: CancellationToken) {
    let tolerance = shared.config.resolution.step() + SETTLE_EPSILON;
    let settle_timeout = shared.config.settle_timeout;
    let deadline = Instant::now() + settle_timeout;

    let mut poll = interval(shared.config.status_poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Settle watch cancelled");
                return;
            }
            _ = poll.tick() => {}
        }

        if Instant::now() >= deadline {
            give_up(&shared, &token, target, settle_timeout).await;
            return;
        }

        match shared.send(Command::Status, Some(&token)).await {
            Ok(Some(position)) => {
                let reached = position.max_axis_delta(&target) <= tolerance;
                let applied = shared
                    .update_unless_cancelled(&token, |state| {
                        if reached {
                            state.last_known_position = target;
                            state.go_idle();
                        } else {
                            state.last_known_position = position;
                        }
                    })
                    .await;

                if !applied {
                    return;
                }
                if reached {
                    info!("Reached {}", target);
                    return;
                }
                debug!("At {}, heading for {}", position, target);
            }
            Ok(None) => {}
            Err(Error::Cancelled) => return,
            Err(e) => {
                let record = shared.record(&e);
                let fault = is_hardware_failure(&e);
                if fault {
                    error!("Lost the rotator while moving to {}: {}", target, e);
                } else {
                    warn!("Abandoning move to {}: {}", target, e);
                }
                shared
                    .update_unless_cancelled(&token, |state| {
                        state.go_idle();
                        state.faulted |= fault;
                        state.last_error = Some(record);
                    })
                    .await;
                return;
            }
        }
    }
}

async fn give_up(shared: &Shared, token: &CancellationToken, target: Position, after: std::time::Duration) {
    warn!("{} not reached within {:?}, stopping", target, after);
    let stopped_at = match shared.send(Command::Stop, Some(token)).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Stop after motion timeout failed: {}", e);
            None
        }
    };

    let record = shared.record(&Error::MotionTimeout { after });
    shared
        .update_unless_cancelled(token, |state| {
            state.go_idle();
            state.last_error = Some(record);
            if let Some(position) = stopped_at {
                state.last_known_position = position;
            }
        })
        .await;
}
