//! Reconciliation methods.
//!
//! A method handles one workload-definition format. It turns file changes
//! into container lifecycle operations in three steps (check, retire,
//! deploy). The pass bookkeeping (seeding, incremental diffing, cursor
//! advancement) is shared by every method through the provided
//! [`Method::apply`] and [`Method::process`].

pub mod raw;

pub use raw::Raw;

use std::sync::Arc;

use async_trait::async_trait;

use crate::changes::{Change, ChangeFilter, Revision};
use crate::config::{MethodConfig, TargetConfig};
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::target::{Target, TargetPhase};
use crate::SyncContext;

/// Result of one successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// First pass: the full catalog at `revision` was applied.
    Seeded { revision: Revision, changes: usize },
    /// Incremental pass from `from` to `to`.
    Applied {
        from: Revision,
        to: Revision,
        changes: usize,
    },
    /// The branch head equals the cursor.
    UpToDate { revision: Revision },
}

#[async_trait]
pub trait Method: Send + Sync {
    /// Identifier of the method, as used in configuration.
    fn kind(&self) -> &'static str;

    /// File extensions this method reconciles.
    fn tags(&self) -> &'static [&'static str];

    /// Validate one change without touching containers: read and decode its
    /// new content, decode its previous content and resolve what the new
    /// content needs.
    async fn check_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
        to: &Revision,
    ) -> Result<()>;

    /// Tear down whatever the previous content of `change` deployed.
    async fn retire_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
    ) -> Result<()>;

    /// Deploy the new content of `change`, read at revision `to`. Not called
    /// for tombstones.
    async fn apply_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
        to: &Revision,
    ) -> Result<()>;

    /// Diff `from` (None = empty repository) to `to` and apply the change set.
    ///
    /// Every change is checked first, then every previous workload is
    /// retired, then new content is deployed in path order. Removals thus
    /// never run after a deployment of the same pass, even when a workload
    /// moves between files. Stops at the first failure; earlier steps stay
    /// applied. Returns the number of changes.
    async fn apply(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        from: Option<&Revision>,
        to: &Revision,
    ) -> Result<usize> {
        let filter = ChangeFilter::new(&target.target_path, &target.glob, self.tags())?;
        let change_set = ctx.vcs.diff(target, from, to, &filter).await?;

        ctx.events.emit(SyncEvent::PassStarted {
            target: target.name.clone(),
            from: from.cloned(),
            to: to.clone(),
            changes: change_set.len(),
        });

        for change in change_set.iter() {
            self.check_change(target, ctx, change, to)
                .await
                .map_err(|e| change_failed(ctx, target, change, e))?;
        }

        for change in change_set.iter().filter(|c| c.previous.is_some()) {
            self.retire_change(target, ctx, change)
                .await
                .map_err(|e| change_failed(ctx, target, change, e))?;
            if change.is_tombstone() {
                change_applied(ctx, target, change);
            }
        }

        for change in change_set.iter().filter(|c| !c.is_tombstone()) {
            self.apply_change(target, ctx, change, to)
                .await
                .map_err(|e| change_failed(ctx, target, change, e))?;
            change_applied(ctx, target, change);
        }

        Ok(change_set.len())
    }

    /// Run one scheduled pass for `target` while holding its lock.
    ///
    /// The first successful pass seeds the host from the empty repository;
    /// later passes diff the cursor against the branch head. The cursor only
    /// moves after the whole change set applied cleanly.
    async fn process(&self, target: &Target, ctx: &SyncContext) -> Result<PassOutcome> {
        let mut state = target.lock().await;
        let config = target.config();
        let seeding = state.phase != TargetPhase::Steady;
        if seeding {
            state.phase = TargetPhase::Seeding;
        }

        let result: Result<PassOutcome> = async {
            ctx.vcs.prepare(config).await?;
            let head = ctx.vcs.resolve_head(config).await?;

            if seeding {
                let changes = self.apply(config, ctx, None, &head).await?;
                return Ok(PassOutcome::Seeded {
                    revision: head,
                    changes,
                });
            }

            match state.last_applied.clone() {
                Some(current) if current == head => Ok(PassOutcome::UpToDate { revision: head }),
                current => {
                    let changes = self.apply(config, ctx, current.as_ref(), &head).await?;
                    Ok(PassOutcome::Applied {
                        from: current.unwrap_or_else(|| head.clone()),
                        to: head,
                        changes,
                    })
                }
            }
        }
        .await;

        match &result {
            Ok(PassOutcome::UpToDate { revision }) => {
                ctx.events.emit(SyncEvent::PassSkipped {
                    target: config.name.clone(),
                    revision: revision.clone(),
                });
            }
            Ok(PassOutcome::Seeded { revision, .. }) | Ok(PassOutcome::Applied { to: revision, .. }) => {
                state.last_applied = Some(revision.clone());
                state.phase = TargetPhase::Steady;
                ctx.events.emit(SyncEvent::CursorAdvanced {
                    target: config.name.clone(),
                    revision: revision.clone(),
                });
            }
            Err(e) => {
                if seeding {
                    state.phase = TargetPhase::Uninitialized;
                }
                ctx.events.emit(SyncEvent::PassFailed {
                    target: config.name.clone(),
                    seeding,
                    error: e.to_string(),
                });
            }
        }

        result
    }
}

fn change_applied(ctx: &SyncContext, target: &TargetConfig, change: &Change) {
    ctx.events.emit(SyncEvent::ChangeApplied {
        target: target.name.clone(),
        path: change.path.clone(),
        kind: change.kind,
    });
}

fn change_failed(
    ctx: &SyncContext,
    target: &TargetConfig,
    change: &Change,
    error: SyncError,
) -> SyncError {
    ctx.events.emit(SyncEvent::ChangeFailed {
        target: target.name.clone(),
        path: change.path.clone(),
        had_previous: change.previous.is_some(),
        error: error.to_string(),
    });
    error
}

/// Build the method a target is configured with.
pub fn from_config(config: &MethodConfig) -> Arc<dyn Method> {
    match config {
        MethodConfig::Raw { pull_image } => Arc::new(Raw::new(*pull_image)),
    }
}
