//! Container runtime capability.
//!
//! The engine drives container lifecycle exclusively through
//! [`ContainerRuntime`]. [`PodmanRuntime`] implements it on top of the
//! podman CLI.

mod podman;

pub use podman::PodmanRuntime;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::RuntimeError;

/// Port published from the host into a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: String,
    pub container_port: u16,
    pub host_port: u16,
    /// Number of consecutive ports, 0 and 1 both mean a single port.
    pub range: u16,
    pub protocol: String,
}

/// Filesystem mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mount {
    pub destination: String,
    pub mount_type: String,
    pub source: String,
    pub options: Vec<String>,
}

/// Named volume attached to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedVolume {
    pub name: String,
    pub dest: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    No,
    OnFailure,
    Always,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Always => write!(f, "always"),
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub image: String,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub port_mappings: Vec<PortMapping>,
    pub volumes: Vec<NamedVolume>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub restart_policy: RestartPolicy,
}

/// Entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
}

/// Detail of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
}

/// Container lifecycle operations, addressed by container name.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers (running or not) whose name is exactly `name`.
    async fn list(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Inspect a container. `Ok(None)` means it does not exist.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    /// Create a container and return its id.
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// Whether the image is present in local storage.
    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError>;

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError>;
}
