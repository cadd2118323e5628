//! Structured reconciliation events.
//!
//! Components never log through a global; they emit [`SyncEvent`]s into the
//! [`EventSink`] carried by the sync context. The production sink forwards to
//! `tracing` under the `audit` target.

use crate::changes::{ChangeKind, Revision};

/// Something worth recording about a target's reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    PassStarted {
        target: String,
        from: Option<Revision>,
        to: Revision,
        changes: usize,
    },
    PassSkipped {
        target: String,
        revision: Revision,
    },
    PassFailed {
        target: String,
        seeding: bool,
        error: String,
    },
    CursorAdvanced {
        target: String,
        revision: Revision,
    },
    ChangeApplied {
        target: String,
        path: String,
        kind: ChangeKind,
    },
    ChangeFailed {
        target: String,
        path: String,
        had_previous: bool,
        error: String,
    },
    ImagePulled {
        target: String,
        image: String,
    },
    ContainerRemoved {
        target: String,
        name: String,
    },
    ContainerStarted {
        target: String,
        name: String,
        id: String,
    },
}

impl SyncEvent {
    /// Name of the target the event belongs to.
    pub fn target(&self) -> &str {
        match self {
            SyncEvent::PassStarted { target, .. }
            | SyncEvent::PassSkipped { target, .. }
            | SyncEvent::PassFailed { target, .. }
            | SyncEvent::CursorAdvanced { target, .. }
            | SyncEvent::ChangeApplied { target, .. }
            | SyncEvent::ChangeFailed { target, .. }
            | SyncEvent::ImagePulled { target, .. }
            | SyncEvent::ContainerRemoved { target, .. }
            | SyncEvent::ContainerStarted { target, .. } => target,
        }
    }
}

/// Receiver of reconciliation events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SyncEvent);
}

/// Sink that writes every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SyncEvent) {
        match event {
            SyncEvent::PassStarted {
                target,
                from,
                to,
                changes,
            } => {
                let from = from.as_ref().map(Revision::short).unwrap_or("empty");
                tracing::info!(target: "audit", sync_target = %target, from, to = to.short(), changes, "Reconciling");
            }
            SyncEvent::PassSkipped { target, revision } => {
                tracing::debug!(target: "audit", sync_target = %target, revision = revision.short(), "Already at latest revision");
            }
            SyncEvent::PassFailed {
                target,
                seeding,
                error,
            } => {
                tracing::error!(target: "audit", sync_target = %target, seeding, %error, "Reconciliation pass failed");
            }
            SyncEvent::CursorAdvanced { target, revision } => {
                tracing::info!(target: "audit", sync_target = %target, revision = revision.short(), "Applied revision");
            }
            SyncEvent::ChangeApplied { target, path, kind } => {
                tracing::info!(target: "audit", sync_target = %target, %path, %kind, "Change applied");
            }
            SyncEvent::ChangeFailed {
                target,
                path,
                had_previous,
                error,
            } => {
                tracing::error!(target: "audit", sync_target = %target, %path, had_previous, %error, "Change failed");
            }
            SyncEvent::ImagePulled { target, image } => {
                tracing::info!(target: "audit", sync_target = %target, %image, "Image pulled");
            }
            SyncEvent::ContainerRemoved { target, name } => {
                tracing::info!(target: "audit", sync_target = %target, container = %name, "Container removed");
            }
            SyncEvent::ContainerStarted { target, name, id } => {
                tracing::info!(target: "audit", sync_target = %target, container = %name, %id, "Container started");
            }
        }
    }
}

/// Sink that drops everything (for testing).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SyncEvent) {}
}
