//! quanben.io: the visible table of contents is truncated, the rest is served
//! through an obfuscated JSONP call, and ids are dense enough to probe gaps.

use log::{info, warn};
use rand::Rng;
use regex::Regex;
use scraper::Html;

use super::{css, element_text, join_url, meta_title, visible_text, ItemContent, ItemProvider, Listing, PageWalk};
use crate::config::Settings;
use crate::delay_manager;
use crate::error::{FetchError, ListError};
use crate::fetcher::Fetcher;
use crate::planner::{ListPlanner, ScrapedLink};

const JSONP_ENDPOINT: &str = "https://www.quanben.io/index.php";
const NEXT_PAGE: &str = "下一页";

pub struct QuanbenProvider {
    source_url: String,
    fetcher: Fetcher,
    planner: ListPlanner,
}

impl QuanbenProvider {
    pub fn matches(url: &str) -> bool {
        url.contains("quanben.io")
    }

    pub fn new(source_url: &str, settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(QuanbenProvider {
            source_url: source_url.to_string(),
            fetcher: Fetcher::new(settings, Some(source_url))?,
            planner: ListPlanner::new(settings.max_probe_span),
        })
    }

    fn secondary_listing(&self, listing_html: &str) -> Vec<ScrapedLink> {
        let Some(params) = JsonpParams::extract(listing_html) else {
            return Vec::new();
        };
        let Some(encoded) = obfuscate(&params.callback, &params.staticchars) else {
            warn!("Unexpected staticchars alphabet, skipping hidden listing");
            return Vec::new();
        };
        let url = format!(
            "{}?c=book&a=list.jsonp&callback={}&book_id={}&b={}",
            JSONP_ENDPOINT,
            urlencoding::encode(&params.callback),
            params.book_id,
            urlencoding::encode(&encoded)
        );

        delay_manager::politeness_delay(self.fetcher.settings());
        match self.fetcher.get(&url) {
            Ok(page) => {
                let links = parse_jsonp(&page.body, &self.source_url);
                info!("Hidden listing returned {} links", links.len());
                links
            }
            Err(e) => {
                warn!("Hidden listing failed (gap probing still applies): {}", e);
                Vec::new()
            }
        }
    }
}

impl ItemProvider for QuanbenProvider {
    fn name(&self) -> &str {
        "quanben"
    }

    fn list_items(&self, source_id: &str) -> Result<Listing, ListError> {
        let page = self
            .fetcher
            .get_with_retry(source_id)
            .map_err(|e| ListError::unavailable(source_id, e.to_string()))?;

        let (title, primary) = parse_listing(&page.body, source_id);
        let secondary = self.secondary_listing(&page.body);
        let plan = self.planner.reconcile(primary, secondary);
        if plan.is_empty() {
            return Err(ListError::unavailable(source_id, "no chapter links found"));
        }
        Ok(Listing { title, plan })
    }

    fn fetch_content(&self, url: &str) -> Result<ItemContent, FetchError> {
        let base_id = self.planner.item_id(url);
        let mut walk = PageWalk::new(&self.source_url);
        let mut content = ItemContent::default();
        let mut next = Some(url.to_string());
        let mut first = true;

        while let Some(current) = next.take() {
            if !walk.admit(&current) {
                break;
            }
            let page = match self.fetcher.get_with_retry(&current) {
                Ok(p) => p,
                // A missing continuation page ends the chapter; a missing first page is a gap.
                Err(FetchError::NotFound { .. }) if !first => break,
                Err(e) => return Err(e),
            };
            let parsed = parse_content_page(&page.body, &current, base_id);
            if first {
                content.resolved_title = parsed.title;
            }
            content.text.push_str(&parsed.text);
            next = parsed.next;
            first = false;
        }
        Ok(content)
    }
}

pub fn parse_listing(html: &str, base: &str) -> (String, Vec<ScrapedLink>) {
    let doc = Html::parse_document(html);
    let title = meta_title(&doc)
        .or_else(|| {
            doc.select(&css(r#"h1[itemprop="name headline"]"#))
                .next()
                .map(element_text)
        })
        .unwrap_or_else(|| "Unknown_Book".to_string());

    let mut links = Vec::new();
    for a in doc.select(&css("ul.list3 a")) {
        let text = element_text(a);
        if let Some(url) = a.value().attr("href").and_then(|h| join_url(base, h)) {
            if !text.is_empty() {
                links.push(ScrapedLink::new(text, url));
            }
        }
    }
    (title, links)
}

#[derive(Debug, PartialEq, Eq)]
pub struct JsonpParams {
    pub staticchars: String,
    pub callback: String,
    pub book_id: String,
}

impl JsonpParams {
    pub fn extract(html: &str) -> Option<Self> {
        let grab = |pattern: &str| -> Option<String> {
            Regex::new(pattern).ok()?.captures(html)?.get(1).map(|m| m.as_str().to_string())
        };
        Some(JsonpParams {
            staticchars: grab(r#"staticchars="([^"]+)""#)?,
            callback: grab(r"var callback='([^']+)'")?,
            book_id: grab(r"load_more\('(\d+)'\)")?,
        })
    }
}

/// Encodes `s` the way the site's `base64` helper does: each character found
/// in the 62-symbol alphabet is shifted by 3, and every output character is
/// wrapped between two random alphabet symbols.
pub fn obfuscate(s: &str, staticchars: &str) -> Option<String> {
    let alphabet: Vec<char> = staticchars.chars().collect();
    if alphabet.len() < 62 {
        return None;
    }
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(s.len() * 3);
    for ch in s.chars() {
        let code = match alphabet.iter().position(|&c| c == ch) {
            Some(i) => alphabet[(i + 3) % 62],
            None => ch,
        };
        out.push(alphabet[rng.gen_range(0..62)]);
        out.push(code);
        out.push(alphabet[rng.gen_range(0..62)]);
    }
    Some(out)
}

pub fn parse_jsonp(body: &str, base: &str) -> Vec<ScrapedLink> {
    let wrapper = Regex::new(r"(?s)^\s*\w+\s*\((.*)\)\s*;?\s*$").unwrap();
    let Some(payload) = wrapper.captures(body).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let value: serde_json::Value = match serde_json::from_str(payload.as_str()) {
        Ok(v) => v,
        Err(e) => {
            warn!("Malformed JSONP payload: {}", e);
            return Vec::new();
        }
    };
    let fragment = Html::parse_fragment(value.get("content").and_then(|c| c.as_str()).unwrap_or(""));

    fragment
        .select(&css("a"))
        .filter_map(|a| {
            let text = element_text(a);
            let url = a.value().attr("href").and_then(|h| join_url(base, h))?;
            (!text.is_empty()).then(|| ScrapedLink::new(text, url))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ContentPage {
    pub text: String,
    pub title: Option<String>,
    pub next: Option<String>,
}

pub fn parse_content_page(html: &str, page_url: &str, base_id: Option<u64>) -> ContentPage {
    let doc = Html::parse_document(html);
    let mut page = ContentPage {
        title: doc.select(&css("h1")).next().map(element_text).filter(|t| !t.is_empty()),
        ..ContentPage::default()
    };

    if let Some(div) = doc.select(&css("div#content")).next() {
        page.text = visible_text(div, "\n");
        page.text.push('\n');
    }

    let next_href = doc
        .select(&css("a"))
        .find(|a| element_text(*a).contains(NEXT_PAGE))
        .and_then(|a| a.value().attr("href"))
        .filter(|h| !h.is_empty() && *h != "javascript:void(0)");

    page.next = match (next_href.and_then(|h| join_url(page_url, h)), base_id) {
        (Some(full), Some(id)) if full.contains(&format!("/{}_", id)) => Some(full),
        _ => None,
    };
    page
}
