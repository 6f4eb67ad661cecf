use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::StatusCode;
use log::warn;

use crate::config::Settings;
use crate::delay_manager;
use crate::error::FetchError;

pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:109.0) Gecko/20100101 Firefox/119.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/118.0",
];

pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    pub status: StatusCode,
    pub body: String,
}

/// Blocking HTTP client shared by the item providers of one job.
///
/// Must be built and dropped off the async server runtime, so providers
/// construct it on the job's worker thread.
pub struct Fetcher {
    client: Client,
    settings: Settings,
}

impl Fetcher {
    pub fn new(settings: &Settings, referer: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        if let Some(r) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
            headers.insert(REFERER, r);
        }

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Fetcher {
            client,
            settings: settings.clone(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// One request, no retry.
    pub fn get(&self, url: &str) -> Result<Page, reqwest::Error> {
        let resp = self.client.get(url)
            .header(USER_AGENT, random_user_agent())
            .send()?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.text()?;
        Ok(Page { url: final_url, status, body })
    }

    /// Bounded retry with linear backoff. 404 is reported at once; 403, 429,
    /// 5xx, transport errors and suspiciously short bodies are retried.
    pub fn get_with_retry(&self, url: &str) -> Result<Page, FetchError> {
        let attempts = self.settings.fetch_retries.max(1);
        for attempt in 0..attempts {
            match self.get(url) {
                Ok(page) if page.status == StatusCode::NOT_FOUND => {
                    return Err(FetchError::NotFound { url: url.to_string() });
                }
                Ok(page) if page.status.is_success() => {
                    if page.body.len() >= self.settings.min_content_bytes {
                        return Ok(page);
                    }
                    warn!("Content too short at {} ({} bytes), possible block page", url, page.body.len());
                }
                Ok(page) => {
                    warn!("Server busy at {} ({}), attempt {}/{}", url, page.status, attempt + 1, attempts);
                }
                Err(e) => {
                    warn!("Network error at {}: {}, attempt {}/{}", url, e, attempt + 1, attempts);
                }
            }
            if attempt + 1 < attempts {
                delay_manager::backoff(&self.settings, attempt);
            }
        }
        Err(FetchError::Exhausted { url: url.to_string(), attempts })
    }
}
