//! podsync: GitOps agent for a container host.
//!
//! This daemon runs on each container host and:
//! - Clones or fetches every configured target repository
//! - Seeds the host with all pod definitions on the first pass
//! - Applies added, modified and deleted definitions on every later pass
//! - Keeps a per-target cursor so failed passes are retried from the same revision

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podsync::config::Config;
use podsync::events::TracingEventSink;
use podsync::runtime::PodmanRuntime;
use podsync::vcs::GitProvider;
use podsync::{Scheduler, SyncContext, Target};

/// podsync GitOps agent
#[derive(Parser, Debug)]
#[command(name = "podsync", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "/etc/podsync/config.yaml")]
    config: PathBuf,

    /// Directory holding the local repository clones
    #[arg(long, default_value = "/var/lib/podsync/repos")]
    repos_dir: PathBuf,

    /// podman binary
    #[arg(long, default_value = "podman")]
    podman: PathBuf,

    /// Personal access token for HTTPS repositories
    #[arg(long, env = "PODSYNC_PAT", hide_env_values = true)]
    pat: Option<String>,

    /// Run a single pass for every target and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podsync=info,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if config.targets.is_empty() {
        warn!("No targets configured in {}", args.config.display());
    }

    tokio::fs::create_dir_all(&args.repos_dir)
        .await
        .with_context(|| format!("Failed to create {}", args.repos_dir.display()))?;

    info!("Starting podsync with {} targets", config.targets.len());

    let ctx = Arc::new(SyncContext::new(
        Arc::new(GitProvider::new(args.repos_dir.clone(), args.pat.clone())),
        Arc::new(PodmanRuntime::new(args.podman.clone())),
        Arc::new(TracingEventSink),
    ));
    let targets = config.targets.into_iter().map(Target::new).collect();
    let scheduler = Scheduler::new(ctx, targets);

    if args.once {
        let mut failed = 0;
        for (name, result) in scheduler.run_once().await {
            match result {
                Ok(outcome) => info!("Target {}: {:?}", name, outcome),
                Err(e) => {
                    error!("Target {} failed: {}", name, e);
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            anyhow::bail!("{} target(s) failed", failed);
        }
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let handles = scheduler.spawn(&shutdown_tx);

    wait_for_signal().await;
    info!("Shutdown requested, waiting for in-flight passes");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    info!("podsync stopped");

    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
