//! Error types for podsync.

use thiserror::Error;

/// Errors raised by a container runtime collaborator.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime could not be reached or the command could not be spawned.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The runtime answered with a failure.
    #[error("{0}")]
    Daemon(String),

    /// The runtime answered with output we could not understand.
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl RuntimeError {
    /// The message reported by the runtime, without a prefix.
    pub fn message(&self) -> String {
        match self {
            RuntimeError::Daemon(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors that abort a change or a whole reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A file could not be read at a revision.
    #[error("failed to read {path} at {revision}: {message}")]
    Read {
        path: String,
        revision: String,
        message: String,
    },

    /// A workload definition is not valid JSON or YAML.
    #[error("unable to decode {format}: {message}")]
    Decode {
        format: &'static str,
        message: String,
    },

    /// The image of a workload could not be found or pulled.
    #[error("failed to resolve image {image}: {source}")]
    ImageResolution {
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// A container lifecycle call failed.
    #[error("{operation} failed for container {name}: {source}")]
    RuntimeCall {
        operation: &'static str,
        name: String,
        #[source]
        source: RuntimeError,
    },

    /// Revision resolution or diff computation failed.
    #[error("diff failed: {0}")]
    Diff(String),

    /// A pass ended without producing a result (its task panicked or was
    /// cancelled).
    #[error("pass aborted: {0}")]
    Aborted(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn runtime(operation: &'static str, name: &str, source: RuntimeError) -> Self {
        SyncError::RuntimeCall {
            operation,
            name: name.to_string(),
            source,
        }
    }
}

impl From<git2::Error> for SyncError {
    fn from(e: git2::Error) -> Self {
        SyncError::Diff(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
