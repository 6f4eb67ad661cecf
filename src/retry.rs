//! Manual retry of failed items against the plan retained at job start.
//!
//! The plan is never re-scraped here: a fresh listing can produce a
//! different id range, and artifacts are addressed by position in the
//! original plan.

use log::{error, info};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::config::Settings;
use crate::error::RetryError;
use crate::job_manager::{JobWorker, Pass};
use crate::planner::Item;
use crate::registry::{short_id, JobRegistry, JobStatus};

pub struct RetryCoordinator {
    registry: Arc<JobRegistry>,
    settings: Arc<Settings>,
}

impl RetryCoordinator {
    pub fn new(registry: Arc<JobRegistry>, settings: Arc<Settings>) -> Self {
        RetryCoordinator { registry, settings }
    }

    /// Takes the current failure set and re-fetches those items on a worker
    /// thread, then reassembles the full plan. Failures found during the pass
    /// land in a fresh set. The job holds its source-lock again until the
    /// pass ends.
    pub fn retry(&self, job_id: &str) -> Result<usize, RetryError> {
        let (items, captured, source, ctx) = self
            .registry
            .update_reclaiming(job_id, |e, held_elsewhere| {
                let (Some(plan), Some(ctx)) = (e.plan.as_ref(), e.context.clone()) else {
                    return Err(RetryError::PlanMissing);
                };
                if e.job.status.is_live() || e.retrying || held_elsewhere {
                    return Err(RetryError::Busy);
                }
                if e.failures.is_empty() {
                    return Err(RetryError::NoFailures);
                }

                let captured = std::mem::take(&mut e.failures);
                let items: Vec<Item> = captured.iter().filter_map(|&i| plan.get(i).cloned()).collect();

                e.retrying = true;
                e.job.status = JobStatus::Running;
                e.sync_counts();
                e.job.note(format!("Retrying {} failed chapters...", items.len()));
                Ok((items, captured, e.job.source_id.clone(), ctx))
            })
            .ok_or_else(|| RetryError::NotFound(job_id.to_string()))??;

        let count = items.len();
        info!("[{}] Retry pass queued for {} items", short_id(job_id), count);

        let worker = JobWorker::new(job_id, self.registry.clone(), self.settings.clone(), ctx);
        let registry = self.registry.clone();
        let job_id = job_id.to_string();
        thread::spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if worker.process(&items, Pass::Retry) {
                    worker.assemble();
                    worker.finish(Some(&source));
                }
            }));
            if outcome.is_err() {
                abandon_pass(&registry, &job_id, &source, captured);
            }
        });

        Ok(count)
    }
}

/// Puts back every captured item the pass did not recover, so a later retry
/// can pick them up again.
fn abandon_pass(registry: &JobRegistry, job_id: &str, source: &str, captured: BTreeSet<usize>) {
    error!("[{}] Retry pass failed: worker panicked", short_id(job_id));
    registry.update_and_release(job_id, source, |e| {
        let unrecovered: Vec<usize> = captured.into_iter().filter(|i| !e.succeeded.contains(i)).collect();
        e.failures.extend(unrecovered);
        e.retrying = false;
        e.job.status = JobStatus::Error;
        e.sync_counts();
        e.job.note("Error: retry worker panicked");
    });
}
