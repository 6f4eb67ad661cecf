use scraper::Html;

use super::{css, element_text, join_url, meta_title, ItemContent, ItemProvider, Listing, PageWalk};
use crate::config::Settings;
use crate::error::{FetchError, ListError};
use crate::fetcher::Fetcher;
use crate::planner::{ListPlanner, ScrapedLink};

/// Pagination notices embedded in chapter text.
const NOTICES: [&str; 2] = ["本章未完", "请点击下一页"];

pub struct CheyilProvider {
    source_url: String,
    fetcher: Fetcher,
    planner: ListPlanner,
}

impl CheyilProvider {
    pub fn matches(url: &str) -> bool {
        url.contains("cheyil.cc")
    }

    pub fn new(source_url: &str, settings: &Settings) -> Result<Self, reqwest::Error> {
        Ok(CheyilProvider {
            source_url: source_url.to_string(),
            fetcher: Fetcher::new(settings, None)?,
            planner: ListPlanner::new(settings.max_probe_span),
        })
    }
}

impl ItemProvider for CheyilProvider {
    fn name(&self) -> &str {
        "cheyil"
    }

    fn list_items(&self, source_id: &str) -> Result<Listing, ListError> {
        let page = self
            .fetcher
            .get_with_retry(source_id)
            .map_err(|e| ListError::unavailable(source_id, e.to_string()))?;
        let (title, links) = parse_listing(&page.body, source_id);
        let plan = self.planner.ordered(links);
        if plan.is_empty() {
            return Err(ListError::unavailable(source_id, "no chapter links found"));
        }
        Ok(Listing { title, plan })
    }

    fn fetch_content(&self, url: &str) -> Result<ItemContent, FetchError> {
        let mut walk = PageWalk::new(&self.source_url);
        let mut text = String::new();
        let mut next = Some(url.to_string());
        let mut first = true;

        while let Some(current) = next.take() {
            if !walk.admit(&current) {
                break;
            }
            let page = match self.fetcher.get_with_retry(&current) {
                Ok(p) => p,
                Err(FetchError::NotFound { .. }) if !first => break,
                Err(e) => return Err(e),
            };
            let (chunk, following) = parse_content_page(&page.body, &current);
            text.push_str(&chunk);
            next = following;
            first = false;
        }
        Ok(ItemContent::new(text))
    }
}

pub fn parse_listing(html: &str, base: &str) -> (String, Vec<ScrapedLink>) {
    let doc = Html::parse_document(html);
    let title = meta_title(&doc)
        .or_else(|| doc.select(&css("h1")).next().map(element_text))
        .unwrap_or_else(|| "Unknown_Book".to_string());

    let container = doc
        .select(&css("div.chapterlist div.all"))
        .next()
        .or_else(|| doc.select(&css("div.chapterlist")).next())
        .unwrap_or_else(|| doc.root_element());

    let mut links = Vec::new();
    for a in container.select(&css("a")) {
        let Some(href) = a.value().attr("href") else { continue };
        let text = element_text(a);
        if text.is_empty() || !(href.contains("book") || href.ends_with(".html")) {
            continue;
        }
        if let Some(url) = join_url(base, href) {
            links.push(ScrapedLink::new(text, url));
        }
    }
    (title, links)
}

/// Returns the page's paragraphs and, when it continues the same chapter,
/// the next page's url.
pub fn parse_content_page(html: &str, page_url: &str) -> (String, Option<String>) {
    let doc = Html::parse_document(html);
    let mut text = String::new();
    if let Some(div) = doc.select(&css("div#chaptercontent")).next() {
        for p in div.select(&css("p")) {
            let line = element_text(p);
            if line.is_empty() || NOTICES.iter().any(|n| line.contains(n)) {
                continue;
            }
            text.push_str("    ");
            text.push_str(&line);
            text.push_str("\n\n");
        }
    }

    let next = doc
        .select(&css(r#"a[rel="next"]"#))
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| {
            let href = href.trim();
            if href.is_empty() || href == "#" || (href.contains("book") && href.ends_with('/')) {
                return None;
            }
            let stem = href.split('_').next().unwrap_or(href);
            if href.contains('_') && page_url.contains(stem) {
                join_url(page_url, href)
            } else {
                None
            }
        });
    (text, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_prefers_full_list_container() {
        let html = r#"<html><body><h1>Some Book</h1>
            <div class="chapterlist"><a href="/book/9/latest.html">Newest</a>
            <div class="all"><a href="/book/9/1.html">One</a><a href="/about">About</a><a href="/book/9/2.html">Two</a></div></div>
            </body></html>"#;
        let (title, links) = parse_listing(html, "https://www.cheyil.cc/book/9/");
        assert_eq!(title, "Some Book");
        let titles: Vec<&str> = links.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
        assert_eq!(links[0].url, "https://www.cheyil.cc/book/9/1.html");
    }

    #[test]
    fn test_content_page_strips_notices_and_follows_continuation() {
        let html = r#"<html><body><div id="chaptercontent"><p>First.</p><p>本章未完，请点击下一页继续阅读</p><p>Second.</p></div>
            <a rel="next" href="/book/9/1_2.html">next</a></body></html>"#;
        let (text, next) = parse_content_page(html, "https://www.cheyil.cc/book/9/1.html");
        assert_eq!(text, "    First.\n\n    Second.\n\n");
        assert_eq!(next.as_deref(), Some("https://www.cheyil.cc/book/9/1_2.html"));
    }

    #[test]
    fn test_content_page_stops_at_next_chapter() {
        let html = r#"<div id="chaptercontent"><p>Body</p></div><a rel="next" href="/book/9/2.html">next</a>"#;
        let (_, next) = parse_content_page(html, "https://www.cheyil.cc/book/9/1.html");
        assert_eq!(next, None);

        let back = r#"<a rel="next" href="/book/9/">index</a>"#;
        let (_, next) = parse_content_page(back, "https://www.cheyil.cc/book/9/1_2.html");
        assert_eq!(next, None);
    }
}
