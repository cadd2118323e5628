//! Raw method - deploys single containers from JSON or YAML pod files.
//!
//! Example `app.json`:
//!
//! ```json
//! {"Image": "docker.io/mmumshad/simple-webapp-color:latest",
//!  "Name": "colors",
//!  "Env": {"color": "blue"},
//!  "Ports": [{"host_ip": "", "container_port": 8080, "host_port": 8080, "range": 0, "protocol": ""}],
//!  "CapAdd": [],
//!  "CapDrop": []}
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use super::Method;
use crate::changes::{Change, Revision};
use crate::config::TargetConfig;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::runtime::{CreateRequest, Mount, NamedVolume, PortMapping, RestartPolicy};
use crate::SyncContext;

pub const RAW_METHOD: &str = "raw";

/// Extensions of files the raw method reconciles.
pub const RAW_TAGS: &[&str] = &[".json", ".yaml", ".yml"];

/// Error text some podman versions return for a removal that succeeded.
pub const MALFORMED_EMPTY_RESPONSE: &str = "unexpected end of JSON input";

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPort {
    pub host_ip: String,
    pub container_port: u16,
    pub host_port: u16,
    pub range: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMount {
    pub destination: String,
    #[serde(rename = "type")]
    pub mount_type: String,
    pub source: String,
    #[serde(deserialize_with = "null_as_default")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawVolume {
    pub name: String,
    pub dest: String,
    #[serde(deserialize_with = "null_as_default")]
    pub options: Vec<String>,
}

/// A raw pod definition as stored in the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawPod {
    pub image: String,
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub env: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub ports: Vec<RawPort>,
    #[serde(deserialize_with = "null_as_default")]
    pub mounts: Vec<RawMount>,
    #[serde(deserialize_with = "null_as_default")]
    pub volumes: Vec<RawVolume>,
    #[serde(deserialize_with = "null_as_default")]
    pub cap_add: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub cap_drop: Vec<String>,
}

impl RawPod {
    /// Parse a pod file. Content starting with `{` is JSON, anything else YAML.
    pub fn from_bytes(content: &[u8]) -> Result<Self> {
        let content = content.trim_ascii();
        match content.first() {
            None => Err(SyncError::Decode {
                format: "pod definition",
                message: "document is empty".to_string(),
            }),
            Some(b'{') => serde_json::from_slice(content).map_err(|e| SyncError::Decode {
                format: "json",
                message: e.to_string(),
            }),
            Some(_) => serde_yaml::from_slice(content).map_err(|e| SyncError::Decode {
                format: "yaml",
                message: e.to_string(),
            }),
        }
    }

    /// Container creation request for this pod. The runtime restarts the
    /// container on its own; the agent only intervenes on repository changes.
    pub fn to_create_request(&self) -> CreateRequest {
        CreateRequest {
            image: self.image.clone(),
            name: self.name.clone(),
            env: self.env.clone(),
            mounts: self
                .mounts
                .iter()
                .map(|m| Mount {
                    destination: m.destination.clone(),
                    mount_type: m.mount_type.clone(),
                    source: m.source.clone(),
                    options: m.options.clone(),
                })
                .collect(),
            port_mappings: self
                .ports
                .iter()
                .map(|p| PortMapping {
                    host_ip: p.host_ip.clone(),
                    container_port: p.container_port,
                    host_port: p.host_port,
                    range: p.range,
                    protocol: p.protocol.clone(),
                })
                .collect(),
            volumes: self
                .volumes
                .iter()
                .map(|v| NamedVolume {
                    name: v.name.clone(),
                    dest: v.dest.clone(),
                    options: v.options.clone(),
                })
                .collect(),
            cap_add: self.cap_add.clone(),
            cap_drop: self.cap_drop.clone(),
            restart_policy: RestartPolicy::Always,
        }
    }
}

/// Raw pod method.
#[derive(Debug, Clone, Default)]
pub struct Raw {
    /// Pull images on every apply, even when present locally.
    pull_image: bool,
}

impl Raw {
    pub fn new(pull_image: bool) -> Self {
        Self { pull_image }
    }

    async fn ensure_image(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        image: &str,
    ) -> Result<()> {
        let present = if self.pull_image {
            false
        } else {
            ctx.runtime
                .image_exists(image)
                .await
                .map_err(|source| SyncError::ImageResolution {
                    image: image.to_string(),
                    source,
                })?
        };

        if present {
            debug!("Image {} present locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);
        ctx.runtime
            .pull_image(image)
            .await
            .map_err(|source| SyncError::ImageResolution {
                image: image.to_string(),
                source,
            })?;
        ctx.events.emit(SyncEvent::ImagePulled {
            target: target.name.clone(),
            image: image.to_string(),
        });
        Ok(())
    }

    /// Stop and force-remove the container named `name`, if there is one.
    async fn remove_container(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        name: &str,
    ) -> Result<()> {
        let containers = ctx
            .runtime
            .list(name)
            .await
            .map_err(|e| SyncError::runtime("list", name, e))?;

        if containers.is_empty() {
            info!("Container {} not found", name);
            return Ok(());
        }

        ctx.runtime
            .stop(name)
            .await
            .map_err(|e| SyncError::runtime("stop", name, e))?;

        match ctx.runtime.remove(name, true).await {
            Ok(()) => {}
            Err(e) if e.message() == MALFORMED_EMPTY_RESPONSE => {
                debug!("Ignoring malformed empty response removing {}", name);
            }
            Err(e) => return Err(SyncError::runtime("remove", name, e)),
        }

        ctx.events.emit(SyncEvent::ContainerRemoved {
            target: target.name.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn read_pod(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
        to: &Revision,
    ) -> Result<RawPod> {
        let content = ctx.vcs.read_file(target, to, &change.path).await?;
        RawPod::from_bytes(&content)
    }

    /// Remove a container that already carries `name` before recreating it.
    async fn remove_existing(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        name: &str,
    ) -> Result<()> {
        match ctx.runtime.inspect(name).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => {
                info!(
                    "A container named {} already exists. Removing it before redeploy.",
                    name
                );
                self.remove_container(target, ctx, name).await
            }
            Err(e) => {
                warn!("Failed to inspect container {}: {}", name, e);
                self.remove_container(target, ctx, name).await
            }
        }
    }
}

#[async_trait]
impl Method for Raw {
    fn kind(&self) -> &'static str {
        RAW_METHOD
    }

    fn tags(&self) -> &'static [&'static str] {
        RAW_TAGS
    }

    async fn check_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
        to: &Revision,
    ) -> Result<()> {
        debug!("Checking {} change {}", change.kind, change.path);

        if let Some(previous) = &change.previous {
            RawPod::from_bytes(previous)?;
        }
        if change.is_tombstone() {
            return Ok(());
        }

        let pod = self.read_pod(target, ctx, change, to).await?;
        self.ensure_image(target, ctx, &pod.image).await
    }

    async fn retire_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
    ) -> Result<()> {
        let Some(previous) = &change.previous else {
            return Ok(());
        };
        let previous = RawPod::from_bytes(previous)?;
        info!(
            "Retiring container {} ({} change {})",
            previous.name, change.kind, change.path
        );
        self.remove_container(target, ctx, &previous.name).await
    }

    async fn apply_change(
        &self,
        target: &TargetConfig,
        ctx: &SyncContext,
        change: &Change,
        to: &Revision,
    ) -> Result<()> {
        if change.is_tombstone() {
            return Ok(());
        }
        let pod = self.read_pod(target, ctx, change, to).await?;
        info!("Deploying container {} from {}", pod.name, change.path);

        self.remove_existing(target, ctx, &pod.name).await?;

        let request = pod.to_create_request();
        let id = ctx
            .runtime
            .create(&request)
            .await
            .map_err(|e| SyncError::runtime("create", &pod.name, e))?;
        info!("Container {} created", pod.name);

        ctx.runtime
            .start(&id)
            .await
            .map_err(|e| SyncError::runtime("start", &pod.name, e))?;
        ctx.events.emit(SyncEvent::ContainerStarted {
            target: target.name.clone(),
            name: pod.name.clone(),
            id,
        });

        Ok(())
    }
}
