//! Shared job state: the job table and the active-source reservations.
//!
//! Both maps live behind one mutex so that "is this source already being
//! downloaded?" and "reserve it" happen atomically. A single condvar is
//! signalled on every change; paused workers and `wait_for` callers block on it.

use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::artifact_store::ArtifactStore;
use crate::assembler::AssemblyHeader;
use crate::error::JobError;
use crate::planner::ItemPlan;
use crate::providers::ItemProvider;

const LOG_CAPACITY: usize = 50;

/// What the worker has observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Paused,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_live(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Paused)
    }
}

/// What the caller wants. Applied by the worker at its next item boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
}

impl FromStr for ControlAction {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(ControlAction::Pause),
            "resume" => Ok(ControlAction::Resume),
            other => Err(JobError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "url")]
    pub source_id: String,
    pub status: JobStatus,
    pub control: Control,
    #[serde(rename = "current")]
    pub processed_count: usize,
    pub total: usize,
    pub percent: u8,
    #[serde(rename = "success")]
    pub success_count: usize,
    #[serde(rename = "fail")]
    pub fail_count: usize,
    pub has_failed: bool,
    #[serde(rename = "log")]
    pub last_status_text: String,
    /// Merged output file name, relative to the download directory.
    #[serde(rename = "filename")]
    pub output_name: Option<String>,
    pub logs: Vec<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Job {
    fn new(id: String, source_id: String) -> Self {
        let now = Local::now();
        Job {
            id,
            source_id,
            status: JobStatus::Running,
            control: Control::Running,
            processed_count: 0,
            total: 0,
            percent: 0,
            success_count: 0,
            fail_count: 0,
            has_failed: false,
            last_status_text: "Task initialized...".to_string(),
            output_name: None,
            logs: vec!["Task initialized...".to_string()],
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the status line unless it repeats the current one.
    pub fn note(&mut self, msg: impl Into<String>) -> bool {
        let msg = msg.into();
        if msg == self.last_status_text {
            return false;
        }
        info!("[{}] {}", short_id(&self.id), msg);
        self.logs.push(msg.clone());
        if self.logs.len() > LOG_CAPACITY {
            self.logs.remove(0);
        }
        self.last_status_text = msg;
        true
    }

    pub(crate) fn set_processed(&mut self, processed: usize) {
        self.processed_count = self.processed_count.max(processed);
        self.percent = if self.total > 0 {
            (self.processed_count * 100 / self.total).min(100) as u8
        } else {
            0
        };
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Everything a worker needs to fetch and assemble, retained for retries.
pub(crate) struct JobContext {
    pub provider: Arc<dyn ItemProvider>,
    pub store: Arc<ArtifactStore>,
    pub header: AssemblyHeader,
    pub output_path: PathBuf,
}

pub(crate) struct JobEntry {
    pub job: Job,
    pub plan: Option<ItemPlan>,
    pub failures: BTreeSet<usize>,
    pub succeeded: BTreeSet<usize>,
    pub context: Option<Arc<JobContext>>,
    pub retrying: bool,
}

impl JobEntry {
    /// Counters are derived from set membership, so repeated outcomes for
    /// one item never double count.
    pub fn sync_counts(&mut self) {
        self.job.fail_count = self.failures.len();
        self.job.success_count = self.succeeded.len();
        self.job.has_failed = !self.failures.is_empty();
    }
}

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, JobEntry>,
    /// source id -> job id holding its source-lock
    active_sources: HashMap<String, String>,
}

impl RegistryState {
    fn release(&mut self, source_id: &str, job_id: &str) {
        if self.active_sources.get(source_id).map(String::as_str) == Some(job_id) {
            self.active_sources.remove(source_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// A live job already holds the source.
    Existing(String),
    Created(String),
}

#[derive(Default)]
pub struct JobRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves `source_id` for a new job, or returns the live job holding it.
    pub fn claim(&self, source_id: &str) -> Claim {
        let mut state = self.lock();
        if let Some(existing) = state.active_sources.get(source_id).cloned() {
            let live = state
                .jobs
                .get(&existing)
                .map_or(false, |e| e.job.status.is_live());
            if live {
                return Claim::Existing(existing);
            }
            state.active_sources.remove(source_id);
        }

        let id = Uuid::new_v4().to_string();
        state.active_sources.insert(source_id.to_string(), id.clone());
        state.jobs.insert(
            id.clone(),
            JobEntry {
                job: Job::new(id.clone(), source_id.to_string()),
                plan: None,
                failures: BTreeSet::new(),
                succeeded: BTreeSet::new(),
                context: None,
                retrying: false,
            },
        );
        Claim::Created(id)
    }

    /// Drops the source-lock if `job_id` still holds it.
    pub fn release(&self, source_id: &str, job_id: &str) {
        self.lock().release(source_id, job_id);
    }

    pub fn is_claimed(&self, source_id: &str) -> bool {
        self.lock().active_sources.contains_key(source_id)
    }

    pub fn snapshot(&self, job_id: &str) -> Option<Job> {
        self.lock().jobs.get(job_id).map(|e| e.job.clone())
    }

    pub fn set_control(&self, job_id: &str, action: ControlAction) -> Result<(), JobError> {
        let mut state = self.lock();
        let entry = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        entry.job.control = match action {
            ControlAction::Pause => Control::Paused,
            ControlAction::Resume => Control::Running,
        };
        entry.job.updated_at = Local::now();
        self.changed.notify_all();
        Ok(())
    }

    /// Runs `f` on the entry under the lock and wakes every waiter.
    pub(crate) fn update<R>(&self, job_id: &str, f: impl FnOnce(&mut JobEntry) -> R) -> Option<R> {
        let mut state = self.lock();
        let entry = state.jobs.get_mut(job_id)?;
        let out = f(entry);
        entry.job.updated_at = Local::now();
        self.changed.notify_all();
        Some(out)
    }

    /// `update` that also gives up the job's source-lock in the same critical
    /// section. Waiters never observe a finished job still holding its source.
    pub(crate) fn update_and_release<R>(
        &self,
        job_id: &str,
        source_id: &str,
        f: impl FnOnce(&mut JobEntry) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        let entry = state.jobs.get_mut(job_id)?;
        let out = f(entry);
        entry.job.updated_at = Local::now();
        state.release(source_id, job_id);
        self.changed.notify_all();
        Some(out)
    }

    /// `update` for a pass that restarts a finished job. `f` is told whether
    /// another live job holds the source. When `f` succeeds, the source-lock
    /// is taken for `job_id` in the same critical section.
    pub(crate) fn update_reclaiming<R, E>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut JobEntry, bool) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let source_id = state.jobs.get(job_id)?.job.source_id.clone();
        let held_elsewhere = state.active_sources.get(&source_id).map_or(false, |holder| {
            holder != job_id && state.jobs.get(holder).map_or(false, |e| e.job.status.is_live())
        });

        let entry = state.jobs.get_mut(job_id)?;
        let out = f(entry, held_elsewhere);
        entry.job.updated_at = Local::now();
        if out.is_ok() {
            state.active_sources.insert(source_id, job_id.to_string());
        }
        self.changed.notify_all();
        Some(out)
    }

    pub(crate) fn note(&self, job_id: &str, msg: impl Into<String>) {
        let msg = msg.into();
        self.update(job_id, |e| {
            e.job.note(msg);
        });
    }

    /// Item-boundary checkpoint. When a pause has been requested, marks the
    /// job paused, runs `on_pause` without holding the lock, then sleeps until
    /// the control flag flips back. Returns false if the job is gone.
    pub(crate) fn checkpoint(&self, job_id: &str, on_pause: impl FnOnce()) -> bool {
        let mut state = self.lock();
        let entering_pause = match state.jobs.get_mut(job_id) {
            None => return false,
            Some(e) if e.job.control == Control::Paused && e.job.status != JobStatus::Paused => {
                e.job.status = JobStatus::Paused;
                e.job.note("Task paused, writing partial file...");
                true
            }
            Some(_) => false,
        };

        if entering_pause {
            self.changed.notify_all();
            drop(state);
            on_pause();
            state = self.lock();
        }

        loop {
            let Some(entry) = state.jobs.get_mut(job_id) else {
                return false;
            };
            if entry.job.control == Control::Running {
                if entry.job.status == JobStatus::Paused {
                    entry.job.status = JobStatus::Running;
                    entry.job.note("Task resumed...");
                    self.changed.notify_all();
                }
                return true;
            }
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Latest snapshot once `pred` holds, or when `timeout` runs out.
    pub fn wait_for(&self, job_id: &str, timeout: Duration, pred: impl Fn(&Job) -> bool) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let job = &state.jobs.get(job_id)?.job;
            let now = Instant::now();
            if pred(job) || now >= deadline {
                return Some(job.clone());
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_claim_rejoins_live_job() {
        let registry = JobRegistry::new();
        let first = registry.claim("https://a.test/book");
        let Claim::Created(id) = first.clone() else { panic!("expected new job") };
        assert_eq!(registry.claim("https://a.test/book"), Claim::Existing(id.clone()));
        assert!(registry.is_claimed("https://a.test/book"));

        registry.release("https://a.test/book", &id);
        assert!(!registry.is_claimed("https://a.test/book"));
        assert!(matches!(registry.claim("https://a.test/book"), Claim::Created(other) if other != id));
    }

    #[test]
    fn test_stale_reservation_is_replaced() {
        let registry = JobRegistry::new();
        let Claim::Created(id) = registry.claim("src") else { panic!() };
        registry.update(&id, |e| e.job.status = JobStatus::Error);
        assert!(matches!(registry.claim("src"), Claim::Created(other) if other != id));
    }

    #[test]
    fn test_release_ignores_other_holder() {
        let registry = JobRegistry::new();
        let Claim::Created(_) = registry.claim("src") else { panic!() };
        registry.release("src", "someone-else");
        assert!(registry.is_claimed("src"));
    }

    #[test]
    fn test_reclaim_takes_source_back_for_finished_job() {
        let registry = JobRegistry::new();
        let Claim::Created(id) = registry.claim("src") else { panic!() };
        registry.update_and_release(&id, "src", |e| e.job.status = JobStatus::Done);
        assert!(!registry.is_claimed("src"));

        let out = registry.update_reclaiming(&id, |e, held| -> Result<bool, ()> {
            e.job.status = JobStatus::Running;
            Ok(held)
        });
        assert_eq!(out, Some(Ok(false)));
        assert_eq!(registry.claim("src"), Claim::Existing(id));
    }

    #[test]
    fn test_reclaim_reports_other_live_holder() {
        let registry = JobRegistry::new();
        let Claim::Created(old) = registry.claim("src") else { panic!() };
        registry.update_and_release(&old, "src", |e| e.job.status = JobStatus::Done);
        let Claim::Created(fresh) = registry.claim("src") else { panic!() };

        let out = registry.update_reclaiming(&old, |_, held| if held { Err(()) } else { Ok(()) });
        assert_eq!(out, Some(Err(())));
        assert_eq!(registry.claim("src"), Claim::Existing(fresh));
    }

    #[test]
    fn test_note_suppresses_consecutive_duplicates() {
        let mut job = Job::new("id".into(), "src".into());
        assert!(job.note("Processing: 1"));
        assert!(!job.note("Processing: 1"));
        assert!(job.note("Processing: 2"));
        assert!(job.note("Processing: 1"));
        assert_eq!(job.logs.len(), 4);
    }

    #[test]
    fn test_log_ring_is_bounded() {
        let mut job = Job::new("id".into(), "src".into());
        for i in 0..120 {
            job.note(format!("line {}", i));
        }
        assert_eq!(job.logs.len(), LOG_CAPACITY);
        assert_eq!(job.logs.last().map(String::as_str), Some("line 119"));
    }

    #[test]
    fn test_percent_is_floored() {
        let mut job = Job::new("id".into(), "src".into());
        job.total = 3;
        job.set_processed(1);
        assert_eq!(job.percent, 33);
        job.set_processed(0);
        assert_eq!(job.processed_count, 1);
        job.set_processed(3);
        assert_eq!(job.percent, 100);
    }

    #[test]
    fn test_control_action_parse() {
        assert_eq!("pause".parse::<ControlAction>(), Ok(ControlAction::Pause));
        assert_eq!("resume".parse::<ControlAction>(), Ok(ControlAction::Resume));
        assert_eq!(
            "stop".parse::<ControlAction>(),
            Err(JobError::InvalidAction("stop".into()))
        );
    }

    #[test]
    fn test_checkpoint_blocks_until_resume() {
        let registry = Arc::new(JobRegistry::new());
        let Claim::Created(id) = registry.claim("src") else { panic!() };
        registry.set_control(&id, ControlAction::Pause).unwrap();

        let worker = {
            let registry = registry.clone();
            let id = id.clone();
            thread::spawn(move || {
                let mut paused_hook_ran = false;
                let alive = registry.checkpoint(&id, || paused_hook_ran = true);
                (alive, paused_hook_ran)
            })
        };

        let job = registry.wait_for(&id, Duration::from_secs(5), |j| j.status == JobStatus::Paused).unwrap();
        assert_eq!(job.status, JobStatus::Paused);

        registry.set_control(&id, ControlAction::Resume).unwrap();
        let (alive, hook) = worker.join().unwrap();
        assert!(alive);
        assert!(hook);
        assert_eq!(registry.snapshot(&id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_checkpoint_unknown_job() {
        let registry = JobRegistry::new();
        assert!(!registry.checkpoint("missing", || {}));
    }
}
