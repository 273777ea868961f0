//! Application orchestrator: wires the queue components together and runs
//! the agent commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use treesync_connectivity::{ConnectivityGate, GateConfig, HttpProbe};
use treesync_protocol::targets_from_json;
use treesync_queue::{Coordinator, DispatchReport, Dispatcher, JobSummary, QueueError};
use treesync_store::{JobId, JobStore};
use treesync_transfer::{HttpUploader, OriginalsMirror};

use crate::config::Config;

/// Runs the dispatch loop until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let dispatcher = Arc::new(build_dispatcher(&config).await?);
    let cancel = CancellationToken::new();

    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("SIGINT received, shutting down");
                signal.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for SIGINT: {e}"),
        }
    });

    tracing::info!(
        instance = dispatcher.coordinator().instance_id(),
        interval_secs = config.interval().as_secs(),
        queue = %config.queue_dir.display(),
        repos = config.repos.len(),
        "agent ready"
    );
    dispatch_loop(dispatcher, config.interval(), cancel).await;
    Ok(())
}

/// Runs a single dispatch cycle and prints each job's outcome.
pub async fn once(config: Config) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(&config).await?;
    let report = dispatcher.run_cycle().await?;
    for (id, outcome) in &report.outcomes {
        println!("{id}  {outcome}");
    }
    log_cycle(&Ok(report));
    Ok(())
}

/// Prints one line per queued job.
pub async fn status(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let jobs = treesync_queue::queue_status(&store).await?;
    if jobs.is_empty() {
        println!("queue is empty");
        return Ok(());
    }

    println!(
        "{:<22}  {:>5}  {:>8}  {:<24}  REPO",
        "JOB", "FILES", "ATTEMPTS", "LEASE"
    );
    for job in &jobs {
        println!("{}", format_summary(job, config.max_retries));
    }
    Ok(())
}

/// Gives a retained job a fresh set of attempts.
pub async fn requeue(config: Config, job_id: &str) -> anyhow::Result<()> {
    let id: JobId = job_id.parse()?;
    let store = open_store(&config).await?;
    let instance_id = format!("{}-cli", config.name);
    let new_id =
        treesync_queue::requeue(&store, &id, &instance_id, config.lease_timeout()).await?;
    println!("{new_id}");
    Ok(())
}

/// Queues one job from a JSON manifest.
pub async fn enqueue(
    config: Config,
    repo: PathBuf,
    branch: String,
    manifest: &Path,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(manifest)
        .await
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let targets = targets_from_json(&bytes)
        .with_context(|| format!("parsing manifest {}", manifest.display()))?;

    let mirror = OriginalsMirror::new(config.originals_dir.clone());
    let mut unstaged = 0usize;
    for rel in targets.keys() {
        if !mirror.contains(&repo, &branch, rel).await {
            unstaged += 1;
        }
    }
    if unstaged > 0 {
        tracing::warn!(
            unstaged,
            "manifest names files missing from the originals mirror; they will be pruned"
        );
    }

    let store = open_store(&config).await?;
    let id = treesync_queue::enqueue(&store, repo, branch, targets).await?;
    println!("{id}");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<JobStore> {
    JobStore::open(config.queue_dir.clone())
        .await
        .with_context(|| format!("opening queue directory {}", config.queue_dir.display()))
}

async fn build_dispatcher(config: &Config) -> anyhow::Result<Dispatcher> {
    let store = open_store(config).await?;

    let client = reqwest::Client::builder()
        .timeout(config.upload_timeout())
        .build()?;
    let probe = HttpProbe::new(
        client.clone(),
        config.probe_url.clone(),
        config.probe_timeout(),
    );
    let gate = ConnectivityGate::new(
        Arc::new(probe),
        GateConfig {
            cooldown: config.network_cooldown(),
        },
    );

    let coordinator =
        Coordinator::with_instance_id(format!("{}-{}", config.name, uuid::Uuid::new_v4()));

    Ok(Dispatcher::new(
        Arc::new(store),
        OriginalsMirror::new(config.originals_dir.clone()),
        Arc::new(HttpUploader::new(client)),
        Arc::new(gate),
        Arc::new(config.repo_registry()),
        Arc::new(coordinator),
        config.queue_config(),
    ))
}

/// Starts a cycle on every tick until `cancel` fires.
///
/// Cycles run as their own tasks so a slow one never delays the timer; the
/// coordinator keeps overlapping cycles off each other's jobs. Cycles still
/// running at shutdown are dropped and redo their current chunk on the
/// next start.
async fn dispatch_loop(dispatcher: Arc<Dispatcher>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                while let Some(finished) = cycles.try_join_next() {
                    if let Err(e) = finished {
                        tracing::error!("dispatch cycle panicked: {e}");
                    }
                }
                let dispatcher = Arc::clone(&dispatcher);
                cycles.spawn(async move {
                    log_cycle(&dispatcher.run_cycle().await);
                });
            }
        }
    }

    if !cycles.is_empty() {
        tracing::info!(
            running = cycles.len(),
            jobs = dispatcher.coordinator().in_flight(),
            "abandoning in-flight dispatch cycles"
        );
    }
    cycles.shutdown().await;
}

fn log_cycle(result: &Result<DispatchReport, QueueError>) {
    match result {
        Ok(report) if report.outcomes.is_empty() => {}
        Ok(report) => tracing::info!(
            jobs = report.outcomes.len(),
            completed = report.completed(),
            split = report.split(),
            dropped = report.dropped(),
            skipped = report.skipped(),
            drained = report.queue_emptied,
            "dispatch cycle finished"
        ),
        Err(e) => tracing::error!("dispatch cycle failed: {e}"),
    }
}

fn format_summary(job: &JobSummary, max_retries: u32) -> String {
    let Some(repo) = &job.repo_path else {
        return format!("{:<22}  unreadable record", job.id.as_str());
    };
    let lease = job.locked_by.as_deref().unwrap_or("-");
    let retained = if job.attempt_count >= max_retries {
        " (retained)"
    } else {
        ""
    };
    format!(
        "{:<22}  {:>5}  {:>8}  {:<24}  {}@{}{}",
        job.id.as_str(),
        job.entries,
        job.attempt_count,
        lease,
        repo.display(),
        job.branch.as_deref().unwrap_or(""),
        retained
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoEntry;
    use tempfile::TempDir;
    use treesync_protocol::Targets;

    const REPO: &str = "/work/site";

    fn test_config(dir: &Path) -> Config {
        Config {
            name: "test".into(),
            queue_dir: dir.join("queue"),
            originals_dir: dir.join("originals"),
            probe_url: "http://127.0.0.1:9/".into(),
            probe_timeout_secs: 1,
            repos: vec![RepoEntry {
                path: REPO.into(),
                connected: true,
            }],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn loop_dispatches_immediately_and_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let mirror = OriginalsMirror::new(config.originals_dir.clone());
        let staged = mirror
            .source_path(Path::new(REPO), "main", "docs/removed.md")
            .unwrap();
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(&staged, b"old").unwrap();

        let store = open_store(&config).await.unwrap();
        let targets: Targets = [("docs/removed.md".to_string(), None)].into();
        treesync_queue::enqueue(&store, REPO, "main", targets)
            .await
            .unwrap();

        let dispatcher = Arc::new(build_dispatcher(&config).await.unwrap());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(
            dispatcher,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            while !store.list().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "local-only job was not dispatched");
        assert!(!staged.exists());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop")
            .expect("no panic");
    }

    #[tokio::test]
    async fn enqueue_reads_manifest() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let manifest = dir.path().join("batch.json");
        std::fs::write(
            &manifest,
            br#"{"index.html": {"url": "https://bucket.example/up", "fields": {"key": "k"}}, "gone.txt": null}"#,
        )
        .unwrap();

        enqueue(config.clone(), REPO.into(), "main".into(), &manifest)
            .await
            .unwrap();

        let store = open_store(&config).await.unwrap();
        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 1);
        let record = store.read(&ids[0]).await.unwrap();
        assert_eq!(record.len(), 2);
        assert!(record.targets()["gone.txt"].is_none());
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let manifest = dir.path().join("empty.json");
        std::fs::write(&manifest, b"{}").unwrap();

        assert!(
            enqueue(config, REPO.into(), "main".into(), &manifest)
                .await
                .is_err()
        );
    }

    #[test]
    fn summary_marks_retained_and_unreadable_jobs() {
        let id = JobId::parse("1700000000000-0000abcd").unwrap();
        let retained = JobSummary {
            id: id.clone(),
            repo_path: Some(REPO.into()),
            branch: Some("main".into()),
            entries: 3,
            attempt_count: 10,
            locked_by: None,
            locked_at: None,
        };
        let line = format_summary(&retained, 10);
        assert!(line.starts_with("1700000000000-0000abcd"));
        assert!(line.ends_with("/work/site@main (retained)"));

        let broken = JobSummary {
            repo_path: None,
            branch: None,
            entries: 0,
            attempt_count: 0,
            ..retained
        };
        assert!(format_summary(&broken, 10).ends_with("unreadable record"));
    }
}
