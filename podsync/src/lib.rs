//! podsync - GitOps agent for a single container host.
//!
//! Tracks git repositories of pod definitions and converges the local
//! container runtime to the latest committed state.
//!
//! ## Architecture
//!
//! - **Targets**: one repository/branch/path each, with a lock and a cursor
//!   (the last applied revision)
//! - **Scheduler**: one loop per target, with a random start skew
//! - **Methods**: per-format handlers turning file changes into container
//!   lifecycle calls (`raw` JSON/YAML pods)
//! - **Collaborators**: [`vcs::VersionControlProvider`] (git) and
//!   [`runtime::ContainerRuntime`] (podman), plus an [`events::EventSink`]

pub mod changes;
pub mod config;
pub mod error;
pub mod events;
pub mod method;
pub mod runtime;
pub mod scheduler;
pub mod target;
pub mod vcs;

use std::sync::Arc;

use crate::events::EventSink;
use crate::runtime::ContainerRuntime;
use crate::vcs::VersionControlProvider;

pub use crate::changes::{Change, ChangeKind, ChangeSet, Revision};
pub use crate::error::{Result, RuntimeError, SyncError};
pub use crate::method::{Method, PassOutcome};
pub use crate::scheduler::Scheduler;
pub use crate::target::{Target, TargetPhase};

/// Collaborators shared by every target of a process.
#[derive(Clone)]
pub struct SyncContext {
    pub vcs: Arc<dyn VersionControlProvider>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub events: Arc<dyn EventSink>,
}

impl SyncContext {
    pub fn new(
        vcs: Arc<dyn VersionControlProvider>,
        runtime: Arc<dyn ContainerRuntime>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            vcs,
            runtime,
            events,
        }
    }
}
