use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use log::{error, info, warn};

use crate::artifact_store::{sanitize_filename, ArtifactStore};
use crate::assembler::{self, AssemblyHeader};
use crate::config::Settings;
use crate::delay_manager;
use crate::error::{FetchError, JobError, RetryError};
use crate::planner::Item;
use crate::providers::ProviderRegistry;
use crate::registry::{short_id, Claim, ControlAction, Job, JobContext, JobEntry, JobRegistry, JobStatus};
use crate::retry::RetryCoordinator;

/// Whether a pass walks the whole plan or only re-runs failed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pass {
    /// Skips items already stored, pauses politely after each fetch.
    Full,
    /// Always fetches, no politeness delay, progress counter untouched.
    Retry,
}

/// Accepts download jobs and runs one worker thread per job.
pub struct JobManager {
    registry: Arc<JobRegistry>,
    providers: Arc<ProviderRegistry>,
    settings: Arc<Settings>,
}

impl JobManager {
    pub fn new(settings: Settings, providers: ProviderRegistry) -> Self {
        JobManager {
            registry: Arc::new(JobRegistry::new()),
            providers: Arc::new(providers),
            settings: Arc::new(settings),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Starts a job for `source_id`, or returns the live job already holding it.
    pub fn start_job(&self, source_id: &str) -> Result<String, JobError> {
        let source = source_id.trim();
        if source.is_empty() {
            return Err(JobError::MissingSource);
        }

        let job_id = match self.registry.claim(source) {
            Claim::Existing(id) => {
                info!("Rejoined existing job {} for {}", short_id(&id), source);
                return Ok(id);
            }
            Claim::Created(id) => id,
        };

        let registry = self.registry.clone();
        let providers = self.providers.clone();
        let settings = self.settings.clone();
        let id_clone = job_id.clone();
        let source = source.to_string();

        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(&id_clone, &source, &registry, &providers, &settings)
            }));
            if outcome.is_err() {
                fail_job(&registry, &id_clone, &source, "worker panicked");
            }
        });

        Ok(job_id)
    }

    pub fn progress(&self, job_id: &str) -> Option<Job> {
        self.registry.snapshot(job_id)
    }

    pub fn control(&self, job_id: &str, action: ControlAction) -> Result<(), JobError> {
        self.registry.set_control(job_id, action)
    }

    /// Re-runs only the failed items, then reassembles the whole output.
    /// Returns how many items were queued.
    pub fn retry_failed(&self, job_id: &str) -> Result<usize, RetryError> {
        RetryCoordinator::new(self.registry.clone(), self.settings.clone()).retry(job_id)
    }

    /// Resolves a merged output by file name. Anything that could escape the
    /// download directory is refused.
    pub fn artifact_path(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return None;
        }
        let path = self.settings.download_dir.join(name);
        path.is_file().then_some(path)
    }

    pub fn wait_for(&self, job_id: &str, timeout: Duration, pred: impl Fn(&Job) -> bool) -> Option<Job> {
        self.registry.wait_for(job_id, timeout, pred)
    }

    pub fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> Option<Job> {
        self.wait_for(job_id, timeout, |j| !j.status.is_live())
    }
}

fn run_job(job_id: &str, source: &str, registry: &Arc<JobRegistry>, providers: &ProviderRegistry, settings: &Arc<Settings>) {
    registry.note(job_id, format!("Analyzing page: {}", source));

    let entry = providers.select(source);
    let provider = match entry.build(source, settings) {
        Ok(p) => p,
        Err(e) => return fail_job(registry, job_id, source, &e.to_string()),
    };
    info!("[{}] Using {} provider", short_id(job_id), provider.name());

    let listing = match provider.list_items(source) {
        Ok(l) => l,
        Err(e) => return fail_job(registry, job_id, source, &e.to_string()),
    };

    let store = match ArtifactStore::open(&settings.download_dir, job_id) {
        Ok(s) => s,
        Err(e) => return fail_job(registry, job_id, source, &format!("cannot create item directory: {}", e)),
    };

    let output_name = format!("{}.txt", sanitize_filename(&listing.title));
    let ctx = Arc::new(JobContext {
        provider,
        store: Arc::new(store),
        header: AssemblyHeader { title: listing.title.clone(), source: source.to_string() },
        output_path: settings.download_dir.join(&output_name),
    });
    let items = listing.plan.items().to_vec();
    let probed = listing.plan.probed_count();

    registry.update(job_id, |e| {
        e.job.total = items.len();
        e.job.output_name = Some(output_name.clone());
        e.plan = Some(listing.plan);
        e.context = Some(ctx.clone());
        e.job.note(format!(
            "Found {} chapters ({} probed), saving to {}",
            items.len(),
            probed,
            output_name
        ));
    });

    let worker = JobWorker::new(job_id, registry.clone(), settings.clone(), ctx);
    if !worker.process(&items, Pass::Full) {
        return;
    }
    worker.assemble();
    worker.finish(Some(source));
}

fn fail_job(registry: &JobRegistry, job_id: &str, source: &str, reason: &str) {
    error!("[{}] Job failed: {}", short_id(job_id), reason);
    registry.update_and_release(job_id, source, |e| {
        e.job.status = JobStatus::Error;
        e.job.note(format!("Error: {}", reason));
    });
}

/// Runs fetch passes for one job. Items are processed strictly in order,
/// one at a time, with a pause checkpoint before each.
pub(crate) struct JobWorker {
    job_id: String,
    registry: Arc<JobRegistry>,
    settings: Arc<Settings>,
    ctx: Arc<JobContext>,
}

impl JobWorker {
    pub(crate) fn new(job_id: &str, registry: Arc<JobRegistry>, settings: Arc<Settings>, ctx: Arc<JobContext>) -> Self {
        JobWorker { job_id: job_id.to_string(), registry, settings, ctx }
    }

    fn note(&self, msg: impl Into<String>) {
        self.registry.note(&self.job_id, msg);
    }

    /// Returns false if the job disappeared mid-pass.
    pub(crate) fn process(&self, items: &[Item], pass: Pass) -> bool {
        for item in items {
            let alive = self.registry.checkpoint(&self.job_id, || {
                self.assemble();
                self.note("Paused. Current progress is downloadable.");
            });
            if !alive {
                return false;
            }

            self.process_item(item, pass);

            if pass == Pass::Full {
                self.registry.update(&self.job_id, |e| e.job.set_processed(item.sequence_index + 1));
            }
        }
        true
    }

    fn process_item(&self, item: &Item, pass: Pass) {
        let idx = item.sequence_index;

        if pass == Pass::Full {
            let failed = self
                .registry
                .update(&self.job_id, |e| e.failures.contains(&idx))
                .unwrap_or(false);
            if self.ctx.store.has(idx) && !failed {
                self.record_success(idx, None);
                return;
            }
        }

        self.note(format!("Processing: {}", item.title));
        let outcome = self.ctx.provider.fetch_content(&item.source_url);
        if pass == Pass::Full {
            delay_manager::politeness_delay(&self.settings);
        }

        match outcome {
            Err(FetchError::NotFound { .. }) => {
                self.note(format!("Chapter does not exist (404), skipped: {}", item.title));
            }
            Err(e) => {
                warn!("[{}] {}", short_id(&self.job_id), e);
                self.record_failure(idx, &item.title);
            }
            Ok(content) if !content.is_usable() => {
                self.record_failure(idx, &item.title);
            }
            Ok(content) => match self.ctx.store.write(idx, &content.text) {
                Ok(()) => self.record_success(idx, content.resolved_title),
                Err(e) => {
                    error!("[{}] Cannot store chapter {}: {}", short_id(&self.job_id), idx, e);
                    self.record_failure(idx, &item.title);
                }
            },
        }
    }

    fn record_success(&self, idx: usize, resolved_title: Option<String>) {
        self.registry.update(&self.job_id, |e| {
            e.failures.remove(&idx);
            e.succeeded.insert(idx);
            if let (Some(title), Some(plan)) = (resolved_title, e.plan.as_mut()) {
                plan.resolve_title(idx, title);
            }
            e.sync_counts();
        });
    }

    fn record_failure(&self, idx: usize, title: &str) {
        self.registry.update(&self.job_id, |e| {
            e.failures.insert(idx);
            e.sync_counts();
            e.job.note(format!("Download failed, queued for retry: {}", title));
        });
    }

    /// Best effort: a write failure is logged and the job carries on.
    pub(crate) fn assemble(&self) {
        let Some(plan) = self.registry.update(&self.job_id, |e| e.plan.clone()).flatten() else {
            return;
        };
        self.note("Merging files in chapter order...");
        match assembler::assemble(&self.ctx.header, &plan, &self.ctx.store, &self.ctx.output_path) {
            Ok(()) => self.note("Merge complete."),
            Err(e) => {
                error!("[{}] {}", short_id(&self.job_id), e);
                self.note(format!("Merge failed: {}", e));
            }
        }
    }

    /// Marks the job done and gives up the source-lock when one is held.
    pub(crate) fn finish(&self, release_source: Option<&str>) {
        let settle = |e: &mut JobEntry| {
            e.retrying = false;
            e.job.status = JobStatus::Done;
            e.job.percent = 100;
            e.job.note(format!(
                "Download finished. Success: {}, failed: {}",
                e.job.success_count, e.job.fail_count
            ));
            e.failures.len()
        };
        let remaining = match release_source {
            Some(source) => self.registry.update_and_release(&self.job_id, source, settle),
            None => self.registry.update(&self.job_id, settle),
        }
        .unwrap_or(0);

        if !self.settings.retain_item_artifacts && remaining == 0 {
            if let Err(e) = self.ctx.store.remove_all() {
                warn!("[{}] Could not remove item directory: {}", short_id(&self.job_id), e);
            }
        }
    }
}
