//! Keyword fan-out across independent result providers.
//!
//! Every provider probe runs on a bounded worker pool under one global
//! deadline. Results are merged as each probe completes: first occurrence of
//! a url wins, and the visible list is re-ranked after every merge so it only
//! ever improves. A probe that errors, panics or is blocked contributes
//! nothing; a probe that misses the deadline is abandoned and its late
//! answer dropped.

use log::{info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{ProbeError, SearchError};
use crate::extractor::UNKNOWN;
use crate::planner::normalize_url;
use crate::registry::short_id;
use crate::search_probes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub title: String,
    /// Dedup key, after normalization.
    pub url: String,
    #[serde(rename = "source")]
    pub provider: String,
    pub author: String,
    pub protagonist: String,
    pub latest: String,
    pub snippet: String,
    pub is_completed: bool,
    /// Estimated chapter count; 0 when unknown.
    #[serde(rename = "count")]
    pub estimated_item_count: u32,
    #[serde(rename = "is_captcha")]
    pub is_blocked_marker: bool,
}

impl SearchResult {
    pub fn new(title: impl Into<String>, url: impl Into<String>, provider: impl Into<String>) -> Self {
        SearchResult {
            title: title.into(),
            url: url.into(),
            provider: provider.into(),
            author: UNKNOWN.to_string(),
            protagonist: UNKNOWN.to_string(),
            latest: UNKNOWN.to_string(),
            snippet: String::new(),
            is_completed: false,
            estimated_item_count: 0,
            is_blocked_marker: false,
        }
    }

    /// Placeholder pointing the user at a provider's verification page.
    pub fn blocked_marker(provider: &str, verify_url: &str) -> Self {
        SearchResult {
            snippet: "The search engine is asking for human verification. Open the link, pass the check, then search again.".to_string(),
            latest: "Open in a browser to verify".to_string(),
            is_blocked_marker: true,
            ..SearchResult::new(format!("{} needs manual verification", provider), verify_url, provider)
        }
    }

    fn rank(&self) -> (bool, u32) {
        (self.is_completed, self.estimated_item_count)
    }
}

/// One outbound query to one result source.
pub trait SearchProbe: Send + Sync {
    fn name(&self) -> &str;

    fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, ProbeError>;
}

/// Running dedup + rank over everything merged so far.
#[derive(Debug, Default)]
pub struct ResultMerger {
    seen: HashSet<String>,
    results: Vec<SearchResult>,
}

impl ResultMerger {
    /// Adds never-seen results and re-sorts by (completed, count) descending.
    /// The sort is stable, so ties keep arrival order. Returns how many were new.
    pub fn merge(&mut self, batch: Vec<SearchResult>) -> usize {
        let before = self.results.len();
        for r in batch {
            if self.seen.insert(normalize_url(&r.url)) {
                self.results.push(r);
            }
        }
        self.results.sort_by(|a, b| b.rank().cmp(&a.rank()));
        self.results.len() - before
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<SearchResult> {
        self.results
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    Running,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchJob {
    pub id: String,
    pub keyword: String,
    pub status: SearchStatus,
    pub progress: u8,
    pub logs: Vec<String>,
    pub results: Vec<SearchResult>,
}

impl SearchJob {
    fn log(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        info!("[search {}] {}", short_id(&self.id), msg);
        self.logs.push(msg);
    }
}

#[derive(Default)]
pub struct SearchRegistry {
    jobs: Mutex<HashMap<String, SearchJob>>,
    changed: Condvar,
}

impl SearchRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SearchJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, keyword: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().insert(
            id.clone(),
            SearchJob {
                id: id.clone(),
                keyword: keyword.to_string(),
                status: SearchStatus::Running,
                progress: 0,
                logs: Vec::new(),
                results: Vec::new(),
            },
        );
        id
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut SearchJob)) {
        if let Some(job) = self.lock().get_mut(id) {
            f(job);
        }
        self.changed.notify_all();
    }

    pub fn snapshot(&self, id: &str) -> Option<SearchJob> {
        self.lock().get(id).cloned()
    }

    pub fn wait_for_done(&self, id: &str, timeout: Duration) -> Option<SearchJob> {
        let deadline = Instant::now() + timeout;
        let mut jobs = self.lock();
        loop {
            let job = jobs.get(id)?;
            let now = Instant::now();
            if job.status == SearchStatus::Done || now >= deadline {
                return Some(job.clone());
            }
            jobs = self
                .changed
                .wait_timeout(jobs, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

pub struct SearchAggregator {
    probes: Vec<Arc<dyn SearchProbe>>,
    registry: Arc<SearchRegistry>,
    settings: Arc<Settings>,
}

impl SearchAggregator {
    pub fn new(settings: Settings, probes: Vec<Arc<dyn SearchProbe>>) -> Self {
        SearchAggregator {
            probes,
            registry: Arc::new(SearchRegistry::default()),
            settings: Arc::new(settings),
        }
    }

    /// Baidu, Sogou, Bing and the direct site searches.
    pub fn with_defaults(settings: Settings) -> Self {
        let probes = search_probes::default_probes(&settings);
        Self::new(settings, probes)
    }

    pub fn start_search(&self, keyword: &str) -> Result<String, SearchError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(SearchError::EmptyKeyword);
        }
        let id = self.registry.create(keyword);

        let probes = self.probes.clone();
        let registry = self.registry.clone();
        let settings = self.settings.clone();
        let id_clone = id.clone();
        let keyword = keyword.to_string();
        thread::spawn(move || run_search(&id_clone, &keyword, probes, &registry, &settings));

        Ok(id)
    }

    pub fn search_progress(&self, id: &str) -> Option<SearchJob> {
        self.registry.snapshot(id)
    }

    pub fn wait_for_done(&self, id: &str, timeout: Duration) -> Option<SearchJob> {
        self.registry.wait_for_done(id, timeout)
    }
}

type ProbeOutcome = (String, Result<Vec<SearchResult>, ProbeError>);

fn run_search(
    id: &str,
    keyword: &str,
    probes: Vec<Arc<dyn SearchProbe>>,
    registry: &SearchRegistry,
    settings: &Settings,
) {
    let total = probes.len();
    registry.update(id, |j| j.log(format!("Searching all sources in parallel: {}", keyword)));

    let deadline = Instant::now() + settings.search_deadline;
    let pool = spawn_pool(probes, keyword, settings.search_workers);

    let mut merger = ResultMerger::default();
    let mut completed = 0;
    while completed < total {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (source, outcome) = match pool.rx.recv_timeout(remaining) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Search deadline reached with {}/{} sources done", completed, total);
                registry.update(id, |j| j.log("Some sources timed out and were skipped"));
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        completed += 1;

        let message = match outcome {
            Ok(results) if results.is_empty() => format!("{}: no results", source),
            Ok(results) => format!("{}: contributed {} results", source, merger.merge(results)),
            Err(ProbeError::Blocked { provider, verify_url }) => {
                if settings.blocked_markers {
                    merger.merge(vec![SearchResult::blocked_marker(&provider, &verify_url)]);
                }
                format!("{}: blocked by verification page", source)
            }
            Err(e) => format!("{}: failed ({})", source, e),
        };

        let progress = (completed * 100 / total) as u8;
        let snapshot = merger.results().to_vec();
        registry.update(id, |j| {
            j.progress = j.progress.max(progress);
            j.results = snapshot;
            j.log(message);
        });
    }
    drop(pool);

    let results = merger.into_results();
    registry.update(id, |j| {
        if results.is_empty() {
            j.log("No usable results found.");
        } else {
            j.log(format!("Search finished, {} results.", results.len()));
        }
        j.results = results;
        j.progress = 100;
        j.status = SearchStatus::Done;
    });
}

/// Receiving end of the worker pool. Dropping it abandons every probe still
/// queued; workers finish the probe in hand and stop.
struct ProbePool {
    rx: mpsc::Receiver<ProbeOutcome>,
    abandoned: Arc<AtomicBool>,
}

impl Drop for ProbePool {
    fn drop(&mut self) {
        self.abandoned.store(true, Ordering::Release);
    }
}

/// Runs every probe on at most `workers` threads. The receiver yields one
/// message per finished probe; once the pool is dropped, late answers are
/// discarded.
fn spawn_pool(probes: Vec<Arc<dyn SearchProbe>>, keyword: &str, workers: usize) -> ProbePool {
    let (tx, rx) = mpsc::channel();
    let abandoned = Arc::new(AtomicBool::new(false));
    let workers = workers.max(1).min(probes.len());
    let queue = Arc::new(Mutex::new(probes.into_iter().collect::<VecDeque<_>>()));

    for _ in 0..workers {
        let queue = queue.clone();
        let tx = tx.clone();
        let abandoned = abandoned.clone();
        let keyword = keyword.to_string();
        thread::spawn(move || loop {
            if abandoned.load(Ordering::Acquire) {
                break;
            }
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(probe) = next else { break };
            let name = probe.name().to_string();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| probe.search(&keyword)))
                .unwrap_or_else(|_| Err(ProbeError::Panicked { provider: name.clone() }));
            if tx.send((name, outcome)).is_err() {
                break;
            }
        });
    }
    ProbePool { rx, abandoned }
}
