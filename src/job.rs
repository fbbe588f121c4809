use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::command_locator::CommandLocator;
use crate::events::{JsonLines, LogObserver, RunObserver, Tee};
use crate::failsafe::AbortHandle;
use crate::fixture::{DryRunDriver, FixtureLocator};
use crate::loader;
use crate::models::{JobStatus, JobView, RunRequest};
use crate::policy::{self, Policy};
use crate::runner::{RunController, RunReport};
use crate::table::ActionTable;
use crate::vault::Vault;

/// Loads, validates and vets everything a request names, without running it.
pub fn prepare(req: &RunRequest) -> Result<(Policy, ActionTable, Vault)> {
    let policy = policy::load(req.policy_path.as_deref())?;
    let table = loader::load(&req.script_path, &policy)?;
    let vault = Vault::from_env();
    vault.check_table(&table)?;
    Ok((policy, table, vault))
}

type Observer = Box<dyn RunObserver + Send>;

fn observer(req: &RunRequest) -> Result<Observer> {
    Ok(match &req.events_path {
        Some(path) => Box::new(Tee(LogObserver, JsonLines::create(path)?)),
        None => Box::new(LogObserver),
    })
}

/// Runs a request to completion on the calling thread.
pub fn run_script(req: &RunRequest, abort: AbortHandle) -> Result<RunReport> {
    let (policy, table, vault) = prepare(req)?;
    let observer = observer(req)?;
    if req.dry_run {
        let locator = match &req.fixture_path {
            Some(p) => FixtureLocator::from_file(p)?,
            None => FixtureLocator::default(),
        };
        let run = if req.fast {
            policy.run.clone().without_waits()
        } else {
            policy.run.clone()
        };
        let driver = DryRunDriver::new(abort.clone(), req.fast);
        let mut ctl = RunController::new(locator, driver)
            .with_abort(abort)
            .with_vault(vault)
            .with_observer(observer);
        return Ok(ctl.run(&table, &run));
    }
    if policy.locator.command.is_empty() {
        bail!("no locator.command configured in the policy; use --dry-run with a fixture or configure a matcher");
    }
    let locator = CommandLocator::new(&policy.locator.command)?;
    run_live(locator, &policy, &table, vault, abort, observer)
}

#[cfg(feature = "desktop")]
fn run_live(
    locator: CommandLocator,
    policy: &Policy,
    table: &ActionTable,
    vault: Vault,
    abort: AbortHandle,
    observer: Observer,
) -> Result<RunReport> {
    use crate::desktop::{DesktopDriver, DesktopProbe};
    use crate::failsafe::watch_corner;

    let driver = DesktopDriver::new(&policy.desktop, abort.clone())?;
    let _watch = policy
        .run
        .failsafe
        .then(|| watch_corner(DesktopProbe::new, abort.clone(), policy.run.failsafe_corner_px));
    let mut ctl = RunController::new(locator, driver)
        .with_abort(abort)
        .with_vault(vault)
        .with_observer(observer);
    Ok(ctl.run(table, &policy.run))
}

#[cfg(not(feature = "desktop"))]
fn run_live(
    _locator: CommandLocator,
    _policy: &Policy,
    _table: &ActionTable,
    _vault: Vault,
    _abort: AbortHandle,
    _observer: Observer,
) -> Result<RunReport> {
    bail!("built without the `desktop` feature; only --dry-run is available")
}

/// Finished jobs kept for `GET /job/:id`; older ones are forgotten.
const KEEP_FINISHED: usize = 256;

#[derive(Clone)]
struct JobEntry {
    status: JobStatus,
    report: Option<RunReport>,
    error: Option<String>,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, JobEntry>,
    finished: VecDeque<String>,
}

impl Jobs {
    fn finish(&mut self, id: &str, keep: usize) {
        self.finished.push_back(id.to_string());
        while self.finished.len() > keep {
            if let Some(old) = self.finished.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

/// Queue of runs with a single worker: at most one run touches the screen at a time.
pub struct JobManager {
    map: Arc<RwLock<Jobs>>,
    sender: mpsc::Sender<(String, RunRequest)>,
}

impl JobManager {
    /// Must be called inside a tokio runtime.
    pub fn new() -> Self {
        Self::keeping(KEEP_FINISHED)
    }

    fn keeping(keep: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<(String, RunRequest)>(100);
        let map: Arc<RwLock<Jobs>> = Arc::new(RwLock::new(Jobs::default()));
        let map_clone = map.clone();

        tokio::spawn(async move {
            while let Some((id, req)) = rx.recv().await {
                if let Some(entry) = map_clone.write().await.entries.get_mut(&id) {
                    entry.status = JobStatus::Running;
                }
                log::info!("job {id}: running {}", req.script_path.display());
                let res = tokio::task::spawn_blocking(move || run_script(&req, AbortHandle::new()))
                    .await
                    .map_err(|e| anyhow!("run panicked: {e}"))
                    .and_then(|r| r);

                let mut jobs = map_clone.write().await;
                let Some(entry) = jobs.entries.get_mut(&id) else { continue };
                match res {
                    Ok(report) => {
                        entry.status = if report.success() {
                            JobStatus::Success
                        } else {
                            JobStatus::Failed
                        };
                        log::info!("job {id}: {}", report.status);
                        entry.report = Some(report);
                    }
                    Err(e) => {
                        log::error!("job {id}: {e:#}");
                        entry.status = JobStatus::Error;
                        entry.error = Some(format!("{e:#}"));
                    }
                }
                jobs.finish(&id, keep);
            }
        });

        Self { map, sender: tx }
    }

    pub async fn enqueue(&self, req: RunRequest) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.map.write().await.entries.insert(
            id.clone(),
            JobEntry {
                status: JobStatus::Pending,
                report: None,
                error: None,
            },
        );
        if self.sender.send((id.clone(), req)).await.is_err() {
            self.map.write().await.entries.remove(&id);
            bail!("job worker has stopped");
        }
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<JobView> {
        self.map.read().await.entries.get(id).map(|e| JobView {
            job_id: id.to_string(),
            status: e.status,
            report: e.report.clone(),
            error: e.error.clone(),
        })
    }
}
