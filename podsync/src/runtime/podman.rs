//! ContainerRuntime backed by the podman CLI.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error};

use super::{
    ContainerInfo, ContainerRuntime, ContainerSummary, CreateRequest, Mount, NamedVolume,
    PortMapping,
};
use crate::error::RuntimeError;

/// Drives containers through `podman` subcommands.
pub struct PodmanRuntime {
    podman_path: PathBuf,
}

impl PodmanRuntime {
    pub fn new(podman_path: impl Into<PathBuf>) -> Self {
        Self {
            podman_path: podman_path.into(),
        }
    }

    /// Run a podman command and return its stdout.
    async fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        debug!("Executing {} {}", self.podman_path.display(), args.join(" "));

        let output = Command::new(&self.podman_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let err_msg = if stderr.is_empty() {
                format!("podman {} exited with {}", args[0], output.status)
            } else {
                stderr
            };
            error!("podman {}: {}", args[0], err_msg);
            return Err(RuntimeError::Daemon(err_msg));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "ImageName", default)]
    image_name: String,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

/// `--filter` value matching exactly the container named `name`.
pub(crate) fn name_filter(name: &str) -> String {
    format!("name=^{}$", regex::escape(name))
}

fn is_no_such_container(msg: &str) -> bool {
    msg.to_ascii_lowercase().contains("no such container")
}

/// `-p` argument value for a port mapping.
pub(crate) fn port_arg(port: &PortMapping) -> String {
    let span = port.range.max(1) - 1;
    let host = if port.host_port == 0 {
        String::new()
    } else if span == 0 {
        port.host_port.to_string()
    } else {
        format!("{}-{}", port.host_port, port.host_port.saturating_add(span))
    };
    let container = if span == 0 {
        port.container_port.to_string()
    } else {
        format!(
            "{}-{}",
            port.container_port,
            port.container_port.saturating_add(span)
        )
    };

    let mut arg = match (port.host_ip.is_empty(), host.is_empty()) {
        (true, true) => container,
        (true, false) => format!("{host}:{container}"),
        (false, _) => format!("{}:{host}:{container}", port.host_ip),
    };
    if !port.protocol.is_empty() {
        arg.push('/');
        arg.push_str(&port.protocol.to_ascii_lowercase());
    }
    arg
}

/// `--mount` argument value.
pub(crate) fn mount_arg(mount: &Mount) -> String {
    let mount_type = if mount.mount_type.is_empty() {
        "bind"
    } else {
        mount.mount_type.as_str()
    };
    let mut parts = vec![format!("type={mount_type}")];
    if !mount.source.is_empty() {
        parts.push(format!("source={}", mount.source));
    }
    parts.push(format!("destination={}", mount.destination));
    parts.extend(mount.options.iter().cloned());
    parts.join(",")
}

/// `-v` argument value for a named volume.
pub(crate) fn volume_arg(volume: &NamedVolume) -> String {
    if volume.options.is_empty() {
        format!("{}:{}", volume.name, volume.dest)
    } else {
        format!("{}:{}:{}", volume.name, volume.dest, volume.options.join(","))
    }
}

/// Full `podman create` argument list.
pub(crate) fn create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        request.name.clone(),
        "--restart".to_string(),
        request.restart_policy.to_string(),
    ];
    for (key, value) in &request.env {
        args.push("--env".to_string());
        args.push(format!("{key}={value}"));
    }
    for port in &request.port_mappings {
        args.push("--publish".to_string());
        args.push(port_arg(port));
    }
    for mount in &request.mounts {
        args.push("--mount".to_string());
        args.push(mount_arg(mount));
    }
    for volume in &request.volumes {
        args.push("--volume".to_string());
        args.push(volume_arg(volume));
    }
    for cap in &request.cap_add {
        args.push("--cap-add".to_string());
        args.push(cap.clone());
    }
    for cap in &request.cap_drop {
        args.push("--cap-drop".to_string());
        args.push(cap.clone());
    }
    args.push(request.image.clone());
    args
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn list(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let stdout = self
            .run(&[
                "ps".to_string(),
                "--all".to_string(),
                "--filter".to_string(),
                name_filter(name),
                "--format".to_string(),
                "json".to_string(),
            ])
            .await?;
        if stdout.trim().is_empty() {
            return Ok(vec![]);
        }

        let entries: Vec<PsEntry> = serde_json::from_str(&stdout)
            .map_err(|e| RuntimeError::InvalidResponse(format!("podman ps: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|e| ContainerSummary {
                id: e.id,
                names: e.names,
                image: e.image,
                state: e.state,
            })
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let result = self
            .run(&[
                "container".to_string(),
                "inspect".to_string(),
                "--format".to_string(),
                "json".to_string(),
                name.to_string(),
            ])
            .await;

        let stdout = match result {
            Ok(stdout) => stdout,
            Err(RuntimeError::Daemon(msg)) if is_no_such_container(&msg) => return Ok(None),
            Err(e) => return Err(e),
        };

        let entries: Vec<InspectEntry> = serde_json::from_str(&stdout)
            .map_err(|e| RuntimeError::InvalidResponse(format!("podman inspect: {e}")))?;
        Ok(entries.into_iter().next().map(|e| ContainerInfo {
            id: e.id,
            name: e.name,
            image: e.image_name,
            running: e.state.running,
        }))
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let stdout = self.run(&create_args(request)).await?;
        let id = stdout.trim().lines().last().unwrap_or_default().to_string();
        if id.is_empty() {
            return Err(RuntimeError::InvalidResponse(
                "podman create returned no container id".to_string(),
            ));
        }
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.run(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["stop".to_string(), name.to_string()]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        self.run(&args).await?;
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        let status = Command::new(&self.podman_path)
            .args(["image", "exists", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        // exit code 1 means "not present", anything else non-zero is a failure
        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(RuntimeError::Daemon(format!(
                "podman image exists exited with {status}"
            ))),
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        self.run(&[
            "pull".to_string(),
            "--quiet".to_string(),
            reference.to_string(),
        ])
        .await?;
        Ok(())
    }
}
