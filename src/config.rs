//! Runtime settings, read from the environment with sane defaults.

use log::warn;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for per-job item directories and merged outputs.
    pub download_dir: PathBuf,
    /// Lower bound of the randomized pause after each ordinary item fetch.
    pub delay_min: Duration,
    /// Upper bound of the randomized pause after each ordinary item fetch.
    pub delay_max: Duration,
    /// Attempts per request before a fetch is reported as exhausted.
    pub fetch_retries: u32,
    /// Linear backoff unit between attempts (attempt n waits n * backoff).
    pub retry_backoff: Duration,
    pub request_timeout: Duration,
    /// A 200 response shorter than this is treated as a block page and retried.
    pub min_content_bytes: usize,
    /// Widest id range the planner will fill with probes.
    pub max_probe_span: u64,
    pub search_deadline: Duration,
    pub search_workers: usize,
    /// Emit one synthetic result when a search provider is blocked.
    pub blocked_markers: bool,
    /// Keep per-item artifacts after a clean finish.
    pub retain_item_artifacts: bool,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            download_dir: PathBuf::from("downloads"),
            delay_min: Duration::from_millis(500),
            delay_max: Duration::from_millis(1500),
            fetch_retries: 5,
            retry_backoff: Duration::from_secs(3),
            request_timeout: Duration::from_secs(15),
            min_content_bytes: 500,
            max_probe_span: 20_000,
            search_deadline: Duration::from_secs(12),
            search_workers: 5,
            blocked_markers: true,
            retain_item_artifacts: true,
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            download_dir: std::env::var("NOVEL_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            delay_min: env_millis("NOVEL_DELAY_MIN_MS", defaults.delay_min),
            delay_max: env_millis("NOVEL_DELAY_MAX_MS", defaults.delay_max),
            fetch_retries: env_parse("NOVEL_FETCH_RETRIES", defaults.fetch_retries),
            retry_backoff: env_millis("NOVEL_RETRY_BACKOFF_MS", defaults.retry_backoff),
            request_timeout: Duration::from_secs(env_parse(
                "NOVEL_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            min_content_bytes: env_parse("NOVEL_MIN_CONTENT_BYTES", defaults.min_content_bytes),
            max_probe_span: env_parse("NOVEL_MAX_PROBE_SPAN", defaults.max_probe_span),
            search_deadline: Duration::from_secs(env_parse(
                "NOVEL_SEARCH_DEADLINE_SECS",
                defaults.search_deadline.as_secs(),
            )),
            search_workers: env_parse("NOVEL_SEARCH_WORKERS", defaults.search_workers).max(1),
            blocked_markers: env_parse("NOVEL_BLOCKED_MARKERS", defaults.blocked_markers),
            retain_item_artifacts: env_parse("NOVEL_RETAIN_ARTIFACTS", defaults.retain_item_artifacts),
            bind_addr: std::env::var("NOVEL_BIND").unwrap_or(defaults.bind_addr),
        }
    }

    /// Settings with every sleep removed, for tests and dry runs.
    pub fn without_delays(download_dir: impl Into<PathBuf>) -> Self {
        Settings {
            download_dir: download_dir.into(),
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            ..Settings::default()
        }
    }
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring invalid value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(key, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_delays_zeroes_sleeps() {
        let s = Settings::without_delays("/tmp/x");
        assert_eq!(s.delay_min, Duration::ZERO);
        assert_eq!(s.delay_max, Duration::ZERO);
        assert_eq!(s.retry_backoff, Duration::ZERO);
        assert_eq!(s.fetch_retries, Settings::default().fetch_retries);
        assert_eq!(s.download_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("NOVEL_TEST_GARBAGE_KEY", "not-a-number");
        assert_eq!(env_parse("NOVEL_TEST_GARBAGE_KEY", 7u32), 7);
        std::env::set_var("NOVEL_TEST_GARBAGE_KEY", " 42 ");
        assert_eq!(env_parse("NOVEL_TEST_GARBAGE_KEY", 7u32), 42);
    }
}
