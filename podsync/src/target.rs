//! Reconciliation targets.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::changes::Revision;
use crate::config::TargetConfig;
use crate::error::Result;
use crate::method::{self, Method, PassOutcome};
use crate::SyncContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPhase {
    /// No pass has succeeded yet; the next pass seeds from the empty repository.
    Uninitialized,
    /// The seeding pass is running.
    Seeding,
    /// Passes diff the cursor against the branch head.
    Steady,
}

/// Mutable state of a target, only reachable through its lock.
#[derive(Debug)]
pub struct TargetState {
    pub phase: TargetPhase,
    /// Last revision whose change set applied without error.
    pub last_applied: Option<Revision>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            phase: TargetPhase::Uninitialized,
            last_applied: None,
        }
    }
}

/// A configured repository/branch/path together with its method and cursor.
pub struct Target {
    config: TargetConfig,
    method: Arc<dyn Method>,
    state: Mutex<TargetState>,
}

impl Target {
    /// Build a target with the method its configuration selects.
    pub fn new(config: TargetConfig) -> Self {
        let method = method::from_config(&config.method);
        Self::with_method(config, method)
    }

    pub fn with_method(config: TargetConfig, method: Arc<dyn Method>) -> Self {
        Self {
            config,
            method,
            state: Mutex::new(TargetState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn method(&self) -> &Arc<dyn Method> {
        &self.method
    }

    /// Acquire the target's lock. Held for the duration of a pass.
    pub async fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().await
    }

    /// Current cursor. Waits for an in-flight pass to finish.
    pub async fn last_applied(&self) -> Option<Revision> {
        self.state.lock().await.last_applied.clone()
    }

    pub async fn phase(&self) -> TargetPhase {
        self.state.lock().await.phase
    }

    /// Run one pass with the target's method.
    pub async fn process(&self, ctx: &SyncContext) -> Result<PassOutcome> {
        self.method.process(self, ctx).await
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.config.name)
            .field("method", &self.method.kind())
            .finish()
    }
}
