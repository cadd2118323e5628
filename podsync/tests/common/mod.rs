//! In-memory collaborators for podsync integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use podsync::changes::{Change, ChangeFilter, ChangeSet, Revision};
use podsync::config::{MethodConfig, TargetConfig};
use podsync::events::{EventSink, SyncEvent};
use podsync::runtime::{ContainerInfo, ContainerRuntime, ContainerSummary, CreateRequest};
use podsync::vcs::VersionControlProvider;
use podsync::{RuntimeError, SyncContext, SyncError};

pub fn target_config(name: &str) -> TargetConfig {
    TargetConfig {
        name: name.to_string(),
        url: format!("https://git.example.com/{name}.git"),
        branch: "main".to_string(),
        target_path: "raw".to_string(),
        glob: "**".to_string(),
        schedule_secs: 1,
        skew_ms: 0,
        method: MethodConfig::Raw { pull_image: false },
    }
}

pub fn pod_json(name: &str, image: &str) -> String {
    format!(
        r#"{{"Image": "{image}", "Name": "{name}", "Env": {{"MODE": "test"}}, "Ports": [], "CapAdd": [], "CapDrop": []}}"#
    )
}

pub struct Harness {
    pub vcs: Arc<FakeVcs>,
    pub runtime: Arc<FakeRuntime>,
    pub events: Arc<RecordingSink>,
    pub ctx: Arc<SyncContext>,
}

impl Harness {
    pub fn new() -> Self {
        let vcs = Arc::new(FakeVcs::default());
        let runtime = Arc::new(FakeRuntime::default());
        let events = Arc::new(RecordingSink::default());
        let ctx = Arc::new(SyncContext::new(
            vcs.clone(),
            runtime.clone(),
            events.clone(),
        ));
        Self {
            vcs,
            runtime,
            events,
            ctx,
        }
    }
}

// === Events ===

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// === Version control ===

#[derive(Default)]
struct FakeRepo {
    /// Snapshot of every commit, oldest first.
    commits: Vec<BTreeMap<String, Vec<u8>>>,
    delay: Option<Duration>,
    fail_diff: bool,
}

impl FakeRepo {
    fn snapshot(&self, revision: &Revision) -> Result<&BTreeMap<String, Vec<u8>>, SyncError> {
        revision
            .as_str()
            .strip_prefix("rev-")
            .and_then(|i| i.parse::<usize>().ok())
            .and_then(|i| self.commits.get(i))
            .ok_or_else(|| SyncError::Diff(format!("unknown revision {revision}")))
    }
}

/// Repositories keyed by target name. Revisions are `rev-<n>`.
#[derive(Default)]
pub struct FakeVcs {
    repos: Mutex<HashMap<String, FakeRepo>>,
}

impl FakeVcs {
    /// Commit on top of the target's head and return the new revision.
    pub fn commit(&self, target: &str, writes: &[(&str, &str)], deletes: &[&str]) -> Revision {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.entry(target.to_string()).or_default();
        let mut files = repo.commits.last().cloned().unwrap_or_default();
        for (path, content) in writes {
            files.insert(path.to_string(), content.as_bytes().to_vec());
        }
        for path in deletes {
            files.remove(*path);
        }
        repo.commits.push(files);
        Revision::new(format!("rev-{}", repo.commits.len() - 1))
    }

    pub fn set_delay(&self, target: &str, delay: Duration) {
        let mut repos = self.repos.lock().unwrap();
        repos.entry(target.to_string()).or_default().delay = Some(delay);
    }

    pub fn set_fail_diff(&self, target: &str, fail: bool) {
        let mut repos = self.repos.lock().unwrap();
        repos.entry(target.to_string()).or_default().fail_diff = fail;
    }
}

#[async_trait]
impl VersionControlProvider for FakeVcs {
    async fn prepare(&self, target: &TargetConfig) -> podsync::Result<()> {
        let delay = {
            let repos = self.repos.lock().unwrap();
            repos.get(&target.name).and_then(|r| r.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn resolve_head(&self, target: &TargetConfig) -> podsync::Result<Revision> {
        let repos = self.repos.lock().unwrap();
        match repos.get(&target.name) {
            Some(repo) if !repo.commits.is_empty() => {
                Ok(Revision::new(format!("rev-{}", repo.commits.len() - 1)))
            }
            _ => Err(SyncError::Diff(format!("branch {} not found", target.branch))),
        }
    }

    async fn diff(
        &self,
        target: &TargetConfig,
        from: Option<&Revision>,
        to: &Revision,
        filter: &ChangeFilter,
    ) -> podsync::Result<ChangeSet> {
        let repos = self.repos.lock().unwrap();
        let repo = repos
            .get(&target.name)
            .ok_or_else(|| SyncError::Diff("no repository".to_string()))?;
        if repo.fail_diff {
            return Err(SyncError::Diff("object database corrupted".to_string()));
        }

        let empty = BTreeMap::new();
        let old = match from {
            Some(rev) => repo.snapshot(rev)?,
            None => &empty,
        };
        let new = repo.snapshot(to)?;

        let mut changes = Vec::new();
        for (path, content) in new {
            if !filter.matches(path) {
                continue;
            }
            match old.get(path) {
                None => changes.push(Change::added(path.clone())),
                Some(previous) if previous != content => {
                    changes.push(Change::modified(path.clone(), previous.clone()))
                }
                Some(_) => {}
            }
        }
        for (path, previous) in old {
            if filter.matches(path) && !new.contains_key(path) {
                changes.push(Change::deleted(path.clone(), previous.clone()));
            }
        }

        Ok(ChangeSet::new(from.cloned(), to.clone(), changes))
    }

    async fn read_file(
        &self,
        target: &TargetConfig,
        revision: &Revision,
        path: &str,
    ) -> podsync::Result<Vec<u8>> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(&target.name)
            .and_then(|repo| repo.snapshot(revision).ok())
            .and_then(|files| files.get(path).cloned())
            .ok_or_else(|| SyncError::Read {
                path: path.to_string(),
                revision: revision.to_string(),
                message: "no such file".to_string(),
            })
    }
}

// === Container runtime ===

/// Runtime call, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    List(String),
    Inspect(String),
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    ImageExists(String),
    Pull(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub running: bool,
}

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<String, FakeContainer>,
    images: HashSet<String>,
    ops: Vec<Op>,
    /// (operation, name) -> error message
    failures: HashMap<(&'static str, String), String>,
    malformed_remove: bool,
    next_id: u64,
}

impl RuntimeState {
    fn check(&self, op: &'static str, name: &str) -> Result<(), RuntimeError> {
        match self.failures.get(&(op, name.to_string())) {
            Some(msg) => Err(RuntimeError::Daemon(msg.clone())),
            None => Ok(()),
        }
    }
}

/// Runtime keeping containers in memory. Creating a name that is taken fails
/// like a real runtime does.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.values().cloned().collect()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().unwrap().images.insert(image.to_string());
    }

    /// Container created outside of podsync.
    pub fn add_container(&self, name: &str, image: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                name: name.to_string(),
                image: image.to_string(),
                env: BTreeMap::new(),
                running: true,
            },
        );
    }

    /// Remove a container behind podsync's back.
    pub fn remove_manually(&self, name: &str) {
        self.state.lock().unwrap().containers.remove(name);
    }

    pub fn fail(&self, op: &'static str, name: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op, name.to_string()), message.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Make successful removals report a malformed empty response.
    pub fn set_malformed_remove(&self, enabled: bool) {
        self.state.lock().unwrap().malformed_remove = enabled;
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, name: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::List(name.to_string()));
        state.check("list", name)?;
        Ok(state
            .containers
            .get(name)
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: c.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .into_iter()
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Inspect(name.to_string()));
        state.check("inspect", name)?;
        Ok(state.containers.get(name).map(|c| ContainerInfo {
            id: c.id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            running: c.running,
        }))
    }

    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Create(request.name.clone()));
        state.check("create", &request.name)?;
        if state.containers.contains_key(&request.name) {
            return Err(RuntimeError::Daemon(format!(
                "the container name \"{}\" is already in use",
                request.name
            )));
        }
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            request.name.clone(),
            FakeContainer {
                id: id.clone(),
                name: request.name.clone(),
                image: request.image.clone(),
                env: request.env.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .containers
            .values()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
            .ok_or_else(|| RuntimeError::Daemon(format!("no such container {id}")))?;
        state.ops.push(Op::Start(name.clone()));
        state.check("start", &name)?;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = true;
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Stop(name.to_string()));
        state.check("stop", name)?;
        match state.containers.get_mut(name) {
            Some(container) => {
                container.running = false;
                Ok(())
            }
            None => Err(RuntimeError::Daemon(format!("no such container {name}"))),
        }
    }

    async fn remove(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Remove(name.to_string()));
        state.check("remove", name)?;
        if state.containers.remove(name).is_none() {
            return Err(RuntimeError::Daemon(format!("no such container {name}")));
        }
        if state.malformed_remove {
            return Err(RuntimeError::Daemon(
                "unexpected end of JSON input".to_string(),
            ));
        }
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::ImageExists(reference.to_string()));
        Ok(state.images.contains(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Pull(reference.to_string()));
        state.check("pull", reference)?;
        state.images.insert(reference.to_string());
        Ok(())
    }
}

/// Position of the first op equal to `op`.
pub fn position(ops: &[Op], op: &Op) -> usize {
    ops.iter()
        .position(|o| o == op)
        .unwrap_or_else(|| panic!("{op:?} not found in {ops:?}"))
}

/// Position of the last op equal to `op`.
pub fn last_position(ops: &[Op], op: &Op) -> usize {
    ops.iter()
        .rposition(|o| o == op)
        .unwrap_or_else(|| panic!("{op:?} not found in {ops:?}"))
}
