//! Per-target reconciliation loops.
//!
//! Every target gets its own task. A task sleeps a random skew once, then
//! runs a pass on every tick of the target's schedule. Shutdown is only
//! observed between passes, so an in-flight pass always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::{Result, SyncError};
use crate::method::PassOutcome;
use crate::target::Target;
use crate::SyncContext;

/// Random delay in `[0, bound_ms]`.
pub fn skew(bound_ms: u64) -> Duration {
    if bound_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=bound_ms))
}

/// Drive `target` until `shutdown` fires or its sender is dropped.
pub async fn run_target(
    target: Arc<Target>,
    ctx: Arc<SyncContext>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let delay = skew(target.config().skew_ms);
    debug!("Target {} starting after {:?} skew", target.name(), delay);
    tokio::select! {
        _ = sleep(delay) => {}
        _ = shutdown.recv() => {
            info!("Target {} stopped before first pass", target.name());
            return;
        }
    }

    let mut ticker = interval(target.config().schedule());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => break,
        }

        // Failures are reported through the event sink; the next tick retries
        // from the unchanged cursor.
        if let Ok(outcome) = target.process(&ctx).await {
            debug!("Target {} pass finished: {:?}", target.name(), outcome);
        }
    }

    info!("Target {} stopped", target.name());
}

/// Owns the targets of one agent process.
pub struct Scheduler {
    ctx: Arc<SyncContext>,
    targets: Vec<Arc<Target>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<SyncContext>, targets: Vec<Target>) -> Self {
        Self {
            ctx,
            targets: targets.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    /// Spawn one independent loop per target.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        self.targets
            .iter()
            .map(|target| {
                info!(
                    "Starting target {} ({} method, every {:?})",
                    target.name(),
                    target.method().kind(),
                    target.config().schedule()
                );
                tokio::spawn(run_target(
                    Arc::clone(target),
                    Arc::clone(&self.ctx),
                    shutdown.subscribe(),
                ))
            })
            .collect()
    }

    /// Run a single pass of every target concurrently, without skew.
    /// Results are returned in target order; a pass that panicked is
    /// reported as [`SyncError::Aborted`].
    pub async fn run_once(&self) -> Vec<(String, Result<PassOutcome>)> {
        let handles: Vec<_> = self
            .targets
            .iter()
            .map(|target| {
                let target = Arc::clone(target);
                let ctx = Arc::clone(&self.ctx);
                tokio::spawn(async move { target.process(&ctx).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (target, handle) in self.targets.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Target {} pass aborted: {}", target.name(), e);
                    Err(SyncError::Aborted(e.to_string()))
                }
            };
            results.push((target.name().to_string(), result));
        }
        results
    }
}
