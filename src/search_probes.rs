//! Concrete search sources: three web engines and the direct site searches.
//!
//! Each probe builds its own blocking client inside `search`, so clients live
//! on the fan-out pool threads. Page parsing is kept in free functions that
//! take the raw document.

use log::{info, warn};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use scraper::{ElementRef, Html};
use std::sync::Arc;
use std::thread;
use url::Url;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::ProbeError;
use crate::extractor::{title_matches, Extractor, UNKNOWN};
use crate::fetcher::{random_user_agent, Page};
use crate::providers::{css, element_text, join_url};
use crate::search_engine::{SearchProbe, SearchResult};

/// Engines return plenty of noise; only the top few are worth keeping.
const MAX_ENGINE_RESULTS: usize = 8;

const QUANBEN_SEARCH: &str = "https://www.quanben.io/index.php";
const BIQUGE_SEARCH: &str = "https://www.xbiquge.so/modules/article/search.php";

pub fn default_probes(settings: &Settings) -> Vec<Arc<dyn SearchProbe>> {
    vec![
        Arc::new(BaiduProbe::new(settings)),
        Arc::new(SogouProbe::new(settings)),
        Arc::new(BingProbe::new(settings)),
        Arc::new(DirectSitesProbe::new(settings)),
    ]
}

/// One request identity (user agent, languages, tracking cookie) shared by
/// every request of a single search.
pub struct SearchClient {
    client: Client,
}

impl SearchClient {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        if let Ok(cookie) = HeaderValue::from_str(&format!("BIDUPSID={}", Uuid::new_v4())) {
            headers.insert(COOKIE, cookie);
        }

        let client = Client::builder()
            .timeout(settings.request_timeout.min(settings.search_deadline))
            .default_headers(headers)
            .build()?;
        Ok(SearchClient { client })
    }

    pub fn get(&self, url: &str) -> Result<Page, reqwest::Error> {
        let resp = self.client.get(url).send()?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.text()?;
        Ok(Page { url: final_url, status, body })
    }

    /// Follows an engine's tracking redirect to the real landing url.
    pub fn resolve(&self, url: &str) -> Option<String> {
        match self.client.head(url).send() {
            Ok(resp) => Some(resp.url().to_string()),
            Err(e) => {
                warn!("Could not resolve {}: {}", url, e);
                None
            }
        }
    }

    fn get_ok(&self, provider: &str, url: &str) -> Result<Page, ProbeError> {
        let page = self.get(url)?;
        if !page.status.is_success() {
            return Err(ProbeError::Status { provider: provider.to_string(), status: page.status.as_u16() });
        }
        Ok(page)
    }
}

fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn engine_result(title: &str, url: &str, provider: &str, snippet: &str, extractor: &Extractor) -> SearchResult {
    let meta = extractor.extract(snippet, None);
    SearchResult {
        author: meta.author,
        protagonist: meta.protagonist,
        latest: meta.latest,
        snippet: truncate(snippet, 50),
        is_completed: meta.is_completed,
        estimated_item_count: meta.chapter_count,
        ..SearchResult::new(title, url, provider)
    }
}

fn heading_link<'a>(container: ElementRef<'a>, heading: &str) -> Option<(String, String)> {
    let a = container.select(&css(&format!("{} a", heading))).next()?;
    let href = a.value().attr("href")?.trim().to_string();
    let title = element_text(a);
    (!href.is_empty() && !title.is_empty()).then_some((title, href))
}

// ---- Baidu ----

pub struct BaiduProbe {
    settings: Settings,
    extractor: Extractor,
}

impl BaiduProbe {
    pub fn new(settings: &Settings) -> Self {
        BaiduProbe { settings: settings.clone(), extractor: Extractor::new() }
    }
}

impl SearchProbe for BaiduProbe {
    fn name(&self) -> &str {
        "Baidu"
    }

    fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, ProbeError> {
        let client = SearchClient::new(&self.settings)?;
        let query = format!("{} 小说 最新章节 目录", keyword);
        let url = format!("https://www.baidu.com/s?wd={}", urlencoding::encode(&query));
        let page = client.get_ok(self.name(), &url)?;

        if baidu_blocked(&page.body) {
            return Err(ProbeError::Blocked { provider: self.name().to_string(), verify_url: url });
        }

        let mut results = Vec::new();
        for hit in parse_baidu(&page.body, keyword, &self.extractor) {
            if results.len() >= MAX_ENGINE_RESULTS {
                break;
            }
            let Some(real_url) = client.resolve(&hit.url) else { continue };
            let domain = domain_of(&real_url);
            if ["baidu.com", "zhihu.com", "tieba"].iter().any(|d| domain.contains(d)) {
                continue;
            }
            info!("Baidu found: {}", hit.title);
            results.push(SearchResult { url: real_url, provider: domain, ..hit });
        }
        Ok(results)
    }
}

pub fn baidu_blocked(html: &str) -> bool {
    Html::parse_document(html)
        .select(&css("title"))
        .next()
        .map_or(false, |t| element_text(t).contains("安全验证"))
}

/// Title-matched hits with the engine's own redirect links. Capped later,
/// after redirects are resolved and engine-internal domains dropped.
pub fn parse_baidu(html: &str, keyword: &str, extractor: &Extractor) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    let mut containers: Vec<ElementRef> = doc.select(&css(r#"[class*="c-container"]"#)).collect();
    if containers.is_empty() {
        containers = doc.select(&css(".result")).collect();
    }

    let mut hits = Vec::new();
    for div in containers {
        let Some((title, href)) = heading_link(div, "h3") else { continue };
        if !title_matches(keyword, &title) {
            continue;
        }
        let abstract_text = ["div.c-abstract", "div.content-right_8Zs40", "div.c-span18"]
            .iter()
            .find_map(|sel| div.select(&css(sel)).next().map(element_text))
            .unwrap_or_else(|| element_text(div));
        hits.push(engine_result(&title, &href, "Baidu", &abstract_text, extractor));
    }
    hits
}

// ---- Sogou ----

pub struct SogouProbe {
    settings: Settings,
    extractor: Extractor,
}

impl SogouProbe {
    pub fn new(settings: &Settings) -> Self {
        SogouProbe { settings: settings.clone(), extractor: Extractor::new() }
    }
}

impl SearchProbe for SogouProbe {
    fn name(&self) -> &str {
        "Sogou"
    }

    fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, ProbeError> {
        let client = SearchClient::new(&self.settings)?;
        let query = format!("{} 小说 目录", keyword);
        let url = format!("https://www.sogou.com/web?query={}", urlencoding::encode(&query));
        let page = client.get_ok(self.name(), &url)?;

        if sogou_blocked(&page.body, &page.url) {
            return Err(ProbeError::Blocked { provider: self.name().to_string(), verify_url: url });
        }
        Ok(parse_sogou(&page.body, keyword, &self.extractor))
    }
}

pub fn sogou_blocked(body: &str, final_url: &str) -> bool {
    body.contains("验证码") || final_url.contains("antispider")
}

pub fn parse_sogou(html: &str, keyword: &str, extractor: &Extractor) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    let mut results = Vec::new();
    for div in doc.select(&css(".vrwrap, .rb")) {
        if results.len() >= MAX_ENGINE_RESULTS {
            break;
        }
        let Some((title, href)) = heading_link(div, "h3") else { continue };
        if !title.contains(keyword) {
            continue;
        }
        let snippet = div
            .select(&css("p.str_info, div.ft"))
            .next()
            .map(element_text)
            .unwrap_or_default();
        let url = if href.starts_with('/') { format!("https://www.sogou.com{}", href) } else { href };
        results.push(engine_result(&title, &url, "Sogou", &snippet, extractor));
    }
    results
}

// ---- Bing ----

pub struct BingProbe {
    settings: Settings,
    extractor: Extractor,
}

impl BingProbe {
    pub fn new(settings: &Settings) -> Self {
        BingProbe { settings: settings.clone(), extractor: Extractor::new() }
    }
}

impl SearchProbe for BingProbe {
    fn name(&self) -> &str {
        "Bing"
    }

    fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, ProbeError> {
        let client = SearchClient::new(&self.settings)?;
        let query = format!("{} 小说 最新章节 目录", keyword);
        let url = format!("https://www.bing.com/search?q={}", urlencoding::encode(&query));
        let page = client.get_ok(self.name(), &url)?;
        Ok(parse_bing(&page.body, &self.extractor))
    }
}

/// Bing already links to the landing page; no title filtering.
pub fn parse_bing(html: &str, extractor: &Extractor) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    let mut results = Vec::new();
    for li in doc.select(&css("li.b_algo")) {
        if results.len() >= MAX_ENGINE_RESULTS {
            break;
        }
        let Some((title, href)) = heading_link(li, "h2") else { continue };
        let domain = domain_of(&href);
        if domain.is_empty() || domain.contains("bing.com") || domain.contains("microsoft.com") {
            continue;
        }
        let snippet = li.select(&css("p")).next().map(element_text).unwrap_or_default();
        let mut r = engine_result(&title, &href, &domain, &snippet, extractor);
        r.latest = UNKNOWN.to_string();
        r.snippet = truncate(&snippet, 60);
        results.push(r);
    }
    results
}

// ---- Direct site searches ----

/// Queries the supported novel sites' own search pages side by side.
pub struct DirectSitesProbe {
    settings: Settings,
    extractor: Extractor,
}

impl DirectSitesProbe {
    pub fn new(settings: &Settings) -> Self {
        DirectSitesProbe { settings: settings.clone(), extractor: Extractor::new() }
    }
}

impl SearchProbe for DirectSitesProbe {
    fn name(&self) -> &str {
        "Direct sites"
    }

    fn search(&self, keyword: &str) -> Result<Vec<SearchResult>, ProbeError> {
        let client = SearchClient::new(&self.settings)?;

        let outcomes = thread::scope(|s| {
            let quanben = s.spawn(|| {
                let url = format!("{}?c=book&a=search&keywords={}", QUANBEN_SEARCH, urlencoding::encode(keyword));
                client.get_ok("quanben.io", &url).map(|p| parse_quanben_search(&p.body, keyword))
            });
            let biquge = s.spawn(|| {
                let url = format!("{}?searchkey={}", BIQUGE_SEARCH, urlencoding::encode(keyword));
                client
                    .get_ok("xbiquge.so", &url)
                    .map(|p| parse_biquge_search(&p.body, keyword, &self.extractor))
            });
            [("quanben.io", quanben.join()), ("xbiquge.so", biquge.join())]
        });

        let mut results = Vec::new();
        for (site, outcome) in outcomes {
            match outcome {
                Ok(Ok(found)) => {
                    for r in &found {
                        info!("Found: {} [direct: {}]", r.title, site);
                    }
                    results.extend(found);
                }
                Ok(Err(e)) => warn!("Direct search on {} failed: {}", site, e),
                Err(_) => warn!("Direct search on {} panicked", site),
            }
        }
        Ok(results)
    }
}

/// Book links point at the book's chapter listing page.
pub fn parse_quanben_search(html: &str, keyword: &str) -> Vec<SearchResult> {
    let book_link = Regex::new(r"/n/\w+/").unwrap();
    let doc = Html::parse_document(html);
    let mut results: Vec<SearchResult> = Vec::new();

    for a in doc.select(&css("a[href]")) {
        let Some(href) = a.value().attr("href") else { continue };
        let text = element_text(a);
        if text.is_empty() || !text.contains(keyword) || !book_link.is_match(href) {
            continue;
        }
        let Some(full) = join_url("https://www.quanben.io", href) else { continue };
        let url = if full.ends_with("list.html") {
            full
        } else if full.ends_with('/') {
            format!("{}list.html", full)
        } else {
            match full.rsplit_once('/') {
                Some((base, _)) => format!("{}/list.html", base),
                None => continue,
            }
        };

        if results.iter().any(|r| r.url == url) {
            continue;
        }
        results.push(SearchResult {
            author: "全本小说".to_string(),
            latest: "完结".to_string(),
            snippet: "Direct search result from quanben.io".to_string(),
            is_completed: true,
            ..SearchResult::new(text, url, "quanben.io")
        });
    }
    results
}

/// Rows are title | latest chapter | author.
pub fn parse_biquge_search(html: &str, keyword: &str, extractor: &Extractor) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    let mut results = Vec::new();

    for row in doc.select(&css("tr")) {
        let cols: Vec<ElementRef> = row.select(&css("td")).collect();
        if cols.len() < 3 {
            continue;
        }
        let Some(a) = cols[0].select(&css("a")).next() else { continue };
        let Some(href) = a.value().attr("href") else { continue };
        let title = element_text(a);
        if !title.contains(keyword) {
            continue;
        }
        let Some(url) = join_url(BIQUGE_SEARCH, href) else { continue };
        let latest = element_text(cols[1]);
        let author = element_text(cols[2]);

        results.push(SearchResult {
            estimated_item_count: extractor.chapter_number(&latest).unwrap_or(0),
            snippet: format!("作者：{} | 最新：{}", author, latest),
            author,
            latest,
            ..SearchResult::new(title, url, "xbiquge.so")
        });
    }
    results
}
