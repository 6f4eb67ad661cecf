use log::info;
use scraper::Html;

use super::{css, element_text, join_url, meta_title, visible_text, ItemContent, ItemProvider, Listing};
use crate::config::Settings;
use crate::error::{FetchError, ListError};
use crate::fetcher::Fetcher;
use crate::planner::{ListPlanner, ScrapedLink};

/// Fewer candidate links than this and the page is not a table of contents.
const MIN_LISTING_LINKS: usize = 11;

/// Heuristic fallback for unknown sites.
pub struct GenericProvider {
    fetcher: Fetcher,
    planner: ListPlanner,
}

impl GenericProvider {
    pub fn new(_source_url: &str, settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(GenericProvider {
            fetcher: Fetcher::new(settings, None)?,
            planner: ListPlanner::new(settings.max_probe_span),
        })
    }
}

impl ItemProvider for GenericProvider {
    fn name(&self) -> &str {
        "generic"
    }

    fn list_items(&self, source_id: &str) -> Result<Listing, ListError> {
        let page = self
            .fetcher
            .get_with_retry(source_id)
            .map_err(|e| ListError::unavailable(source_id, e.to_string()))?;
        let (title, links) = parse_listing(&page.body, source_id);
        let plan = self.planner.ordered(links);
        info!("Generic listing found {} candidate links", plan.len());
        if plan.len() < MIN_LISTING_LINKS {
            return Err(ListError::unavailable(
                source_id,
                format!("only {} chapter-like links found", plan.len()),
            ));
        }
        Ok(Listing { title, plan })
    }

    fn fetch_content(&self, url: &str) -> Result<ItemContent, FetchError> {
        let page = self.fetcher.get_with_retry(url)?;
        Ok(ItemContent::new(extract_main_text(&page.body)))
    }
}

/// Links whose text is longer than two characters and carries a digit.
pub fn parse_listing(html: &str, base: &str) -> (String, Vec<ScrapedLink>) {
    let doc = Html::parse_document(html);
    let title = meta_title(&doc)
        .or_else(|| {
            doc.select(&css("title")).next().map(|t| {
                let full = element_text(t);
                let head = full.split('_').next().unwrap_or("");
                head.split('-').next().unwrap_or("").trim().to_string()
            })
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Unknown_Book".to_string());

    let links = doc
        .select(&css("a"))
        .filter_map(|a| {
            let text = element_text(a);
            if text.chars().count() <= 2 || !text.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
            let url = join_url(base, a.value().attr("href")?)?;
            Some(ScrapedLink::new(text, url))
        })
        .collect();
    (title, links)
}

/// Text of the longest `div` that has no script or style inside it.
pub fn extract_main_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let noisy = css("script, style");
    doc.select(&css("div"))
        .filter(|d| d.select(&noisy).next().is_none())
        .map(|d| (d.text().map(str::trim).map(str::len).sum::<usize>(), d))
        .max_by_key(|(len, _)| *len)
        .filter(|(len, _)| *len > 0)
        .map(|(_, d)| visible_text(d, "\n\n"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_filters_chapter_like_links() {
        let html = r#"<html><head><title>My Book_Read Online-Site</title></head><body>
            <a href="/c/1">Chapter 1</a><a href="/c/2">第2章</a><a href="/home">Home page</a><a href="/x">12</a>
            </body></html>"#;
        let (title, links) = parse_listing(html, "https://novel.example/book/");
        assert_eq!(title, "My Book");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "https://novel.example/c/1");
    }

    #[test]
    fn test_main_text_picks_longest_clean_div() {
        let html = r#"<html><body>
            <div id="nav">short</div>
            <div id="ads"><script>x()</script>a very very long advertising block that should be ignored entirely</div>
            <div id="text"><p>The chapter body.</p><p>Second paragraph.</p></div>
            </body></html>"#;
        assert_eq!(extract_main_text(html), "The chapter body.\n\nSecond paragraph.");
    }

    #[test]
    fn test_main_text_empty_page() {
        assert_eq!(extract_main_text("<html><body></body></html>"), "");
    }
}
