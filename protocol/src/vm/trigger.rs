//! Build notifications from the VM to its host.
//!
//! The VM never builds a block on its own. When the mempool gains work it
//! calls [`BuildTrigger::trigger_build`]; the host reacts to the resulting
//! [`EngineMessage`] by calling `Vm::build_block`.
//!
//! [`TimedTrigger`] coalesces bursts: any number of triggers inside one
//! `build_interval` produce a single message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Messages the VM sends to the consensus host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMessage {
    /// The mempool holds transactions; a build may succeed.
    PendingTxs,
}

/// Something the VM can poke when a build may be worthwhile.
pub trait BuildTrigger: Send + Sync {
    fn trigger_build(&self);
}

/// Forwards every trigger straight to the engine channel. A full channel
/// already carries a pending notification, so the extra one is dropped.
pub struct ManualTrigger {
    engine: mpsc::Sender<EngineMessage>,
}

impl ManualTrigger {
    pub fn new(engine: mpsc::Sender<EngineMessage>) -> Self {
        Self { engine }
    }
}

impl BuildTrigger for ManualTrigger {
    fn trigger_build(&self) {
        match self.engine.try_send(EngineMessage::PendingTxs) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => debug!("engine notification already pending"),
            Err(mpsc::error::TrySendError::Closed(_)) => warn!("engine channel closed"),
        }
    }
}

/// Rate-limited trigger. Call [`TimedTrigger::run`] on a task; triggers
/// before that are remembered, not lost.
pub struct TimedTrigger {
    engine: mpsc::Sender<EngineMessage>,
    notify: Notify,
    build_interval: Duration,
}

impl TimedTrigger {
    pub fn new(engine: mpsc::Sender<EngineMessage>, build_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            engine,
            notify: Notify::new(),
            build_interval,
        })
    }

    /// Forwards triggers to the engine, at most once per `build_interval`,
    /// until `shutdown` flips or the engine channel closes.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.build_interval, "build trigger starting");
        let mut last_sent: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    info!("build trigger shutting down");
                    return;
                }
            }

            if let Some(last) = last_sent {
                let next = last + self.build_interval;
                if Instant::now() < next {
                    tokio::select! {
                        _ = tokio::time::sleep_until(next) => {}
                        _ = shutdown.changed() => {
                            info!("build trigger shutting down");
                            return;
                        }
                    }
                }
            }

            match self.engine.try_send(EngineMessage::PendingTxs) {
                Ok(()) => last_sent = Some(Instant::now()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("engine notification already pending");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("engine channel closed, build trigger exiting");
                    return;
                }
            }
        }
    }
}

impl BuildTrigger for TimedTrigger {
    fn trigger_build(&self) {
        self.notify.notify_one();
    }
}

/// Ignores every trigger.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrigger;

impl BuildTrigger for NoopTrigger {
    fn trigger_build(&self) {}
}
