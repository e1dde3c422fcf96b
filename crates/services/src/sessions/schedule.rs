//! Timer tasks feeding commands back into the session actor.
//!
//! Every task holds a weak sender and stops once the actor is gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::actor::Command;
use crate::capabilities::DisplayController;

/// Sends `make()` every `period`, first after one full period.
pub(crate) fn every<F>(
    tasks: &mut JoinSet<()>,
    period: Duration,
    tx: mpsc::WeakSender<Command>,
    make: F,
) where
    F: Fn() -> Command + Send + 'static,
{
    tasks.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(tx) = tx.upgrade() else { break };
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    });
}

/// Sends `command` once after `delay`.
pub(crate) fn after(
    tasks: &mut JoinSet<()>,
    delay: Duration,
    tx: mpsc::WeakSender<Command>,
    command: Command,
) {
    tasks.spawn(async move {
        time::sleep(delay).await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(command).await;
        }
    });
}

/// Reports the display's fullscreen status every `period`.
pub(crate) fn poll_fullscreen(
    tasks: &mut JoinSet<()>,
    period: Duration,
    display: Arc<dyn DisplayController>,
    tx: mpsc::WeakSender<Command>,
) {
    tasks.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let fullscreen = display.is_fullscreen().await;
            let Some(tx) = tx.upgrade() else { break };
            if tx.send(Command::FullscreenPolled { fullscreen }).await.is_err() {
                break;
            }
        }
    });
}

/// Asks the display for fullscreen and reports the outcome.
pub(crate) fn request_fullscreen(
    tasks: &mut JoinSet<()>,
    display: Arc<dyn DisplayController>,
    tx: mpsc::WeakSender<Command>,
) {
    tasks.spawn(async move {
        let outcome = display.request_fullscreen().await;
        if let Some(tx) = tx.upgrade() {
            let _ = tx.send(Command::ReacquireFinished(outcome)).await;
        }
    });
}

/// Non-blocking send for perception updates. A full queue drops the update,
/// which the next frame supersedes; only a closed actor returns false.
pub(crate) fn offer(tx: &mpsc::WeakSender<Command>, command: Command) -> bool {
    let Some(tx) = tx.upgrade() else {
        return false;
    };
    match tx.try_send(command) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("[proctor] command queue full, dropping perception update");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
