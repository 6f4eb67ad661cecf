//! Per-source strategies for listing a document's items and fetching one item.
//!
//! A [`ProviderRegistry`] picks the strategy for a source URL: entries are
//! tried in registration order and the fallback always matches last.

pub mod cheyil;
pub mod generic;
pub mod quanben;

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::config::Settings;
use crate::error::{FetchError, ListError};
use crate::planner::{normalize_url, ItemPlan};

pub use cheyil::CheyilProvider;
pub use generic::GenericProvider;
pub use quanben::QuanbenProvider;

/// A source's table of contents.
#[derive(Debug, Clone)]
pub struct Listing {
    pub title: String,
    pub plan: ItemPlan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemContent {
    pub text: String,
    /// Title found on the item page, if it differs from the listing.
    pub resolved_title: Option<String>,
}

impl ItemContent {
    pub fn new(text: impl Into<String>) -> Self {
        ItemContent { text: text.into(), resolved_title: None }
    }

    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Repeated fetches of one url must be idempotent, modulo upstream availability.
pub trait ItemProvider: Send + Sync {
    fn name(&self) -> &str;

    fn list_items(&self, source_id: &str) -> Result<Listing, ListError>;

    fn fetch_content(&self, url: &str) -> Result<ItemContent, FetchError>;
}

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type Builder = Box<dyn Fn(&str, &Settings) -> Result<Arc<dyn ItemProvider>, ListError> + Send + Sync>;

pub struct ProviderEntry {
    pub name: &'static str,
    predicate: Predicate,
    builder: Builder,
}

impl ProviderEntry {
    /// Builds the provider for one job. Runs on the job's worker thread.
    pub fn build(&self, source_id: &str, settings: &Settings) -> Result<Arc<dyn ItemProvider>, ListError> {
        (self.builder)(source_id, settings)
    }
}

pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
    fallback: ProviderEntry,
}

impl ProviderRegistry {
    pub fn new<B>(fallback_name: &'static str, fallback: B) -> Self
    where
        B: Fn(&str, &Settings) -> Result<Arc<dyn ItemProvider>, ListError> + Send + Sync + 'static,
    {
        ProviderRegistry {
            entries: Vec::new(),
            fallback: ProviderEntry {
                name: fallback_name,
                predicate: Box::new(|_| true),
                builder: Box::new(fallback),
            },
        }
    }

    /// Appends an entry; earlier registrations win.
    pub fn register<P, B>(mut self, name: &'static str, predicate: P, builder: B) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        B: Fn(&str, &Settings) -> Result<Arc<dyn ItemProvider>, ListError> + Send + Sync + 'static,
    {
        self.entries.push(ProviderEntry {
            name,
            predicate: Box::new(predicate),
            builder: Box::new(builder),
        });
        self
    }

    pub fn with_defaults() -> Self {
        ProviderRegistry::new("generic", |src: &str, s: &Settings| {
            let p = GenericProvider::new(src, s).map_err(|e| ListError::unavailable(src, e.to_string()))?;
            Ok(Arc::new(p) as Arc<dyn ItemProvider>)
        })
        .register("quanben", QuanbenProvider::matches, |src: &str, s: &Settings| {
            let p = QuanbenProvider::new(src, s).map_err(|e| ListError::unavailable(src, e.to_string()))?;
            Ok(Arc::new(p) as Arc<dyn ItemProvider>)
        })
        .register("cheyil", CheyilProvider::matches, |src: &str, s: &Settings| {
            let p = CheyilProvider::new(src, s).map_err(|e| ListError::unavailable(src, e.to_string()))?;
            Ok(Arc::new(p) as Arc<dyn ItemProvider>)
        })
    }

    pub fn select(&self, source_id: &str) -> &ProviderEntry {
        self.entries
            .iter()
            .find(|e| (e.predicate)(source_id))
            .unwrap_or(&self.fallback)
    }
}

/// Visited-set for following an item's "next page" chain.
///
/// A target is refused when it is empty, points back at the listing root,
/// or was already visited (after normalization).
pub struct PageWalk {
    root: String,
    visited: HashSet<String>,
}

impl PageWalk {
    pub fn new(root: &str) -> Self {
        PageWalk { root: normalize_url(root), visited: HashSet::new() }
    }

    pub fn admit(&mut self, target: &str) -> bool {
        let target = target.trim();
        if target.is_empty() {
            return false;
        }
        let normalized = normalize_url(target);
        if normalized == self.root {
            return false;
        }
        self.visited.insert(normalized)
    }
}

// Only ever called with literal selectors.
pub(crate) fn css(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

pub(crate) fn join_url(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href.trim()).ok().map(|u| u.to_string())
}

pub(crate) fn element_text(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Text of `el` without script/style contents, one trimmed run per `sep`.
pub(crate) fn visible_text(el: ElementRef, sep: &str) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map_or(false, |e| e.name() == "script" || e.name() == "style")
        });
        let t = text.trim();
        if !hidden && !t.is_empty() {
            parts.push(t.to_string());
        }
    }
    parts.join(sep)
}

pub(crate) fn meta_title(doc: &Html) -> Option<String> {
    doc.select(&css(r#"meta[property="og:title"]"#))
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl ItemProvider for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn list_items(&self, source_id: &str) -> Result<Listing, ListError> {
            Err(ListError::unavailable(source_id, "test"))
        }
        fn fetch_content(&self, url: &str) -> Result<ItemContent, FetchError> {
            Err(FetchError::NotFound { url: url.to_string() })
        }
    }

    fn named(name: &'static str) -> impl Fn(&str, &Settings) -> Result<Arc<dyn ItemProvider>, ListError> {
        move |_: &str, _: &Settings| Ok(Arc::new(Named(name)) as Arc<dyn ItemProvider>)
    }

    #[test]
    fn test_registry_first_match_then_fallback() {
        let registry = ProviderRegistry::new("fallback", named("fallback"))
            .register("a", |u: &str| u.contains("a.test"), named("a"))
            .register("broad", |u: &str| u.contains(".test"), named("broad"));

        assert_eq!(registry.select("https://a.test/x").name, "a");
        assert_eq!(registry.select("https://b.test/x").name, "broad");
        assert_eq!(registry.select("https://c.example/x").name, "fallback");

        let settings = Settings::default();
        let built = registry.select("https://a.test/x").build("https://a.test/x", &settings).unwrap();
        assert_eq!(built.name(), "a");
    }

    #[test]
    fn test_default_registry_routes_known_hosts() {
        let registry = ProviderRegistry::with_defaults();
        assert_eq!(registry.select("https://www.quanben.io/n/abc/list.html").name, "quanben");
        assert_eq!(registry.select("https://www.cheyil.cc/book/1/").name, "cheyil");
        assert_eq!(registry.select("https://unknown.example/book").name, "generic");
    }

    #[test]
    fn test_page_walk_terminal_conditions() {
        let mut walk = PageWalk::new("https://s.test/book/1/");
        assert!(!walk.admit(""));
        assert!(!walk.admit("https://s.test/book/1"));
        assert!(walk.admit("https://s.test/book/1/2.html"));
        assert!(!walk.admit("https://s.test/book/1/2.html#top"));
        assert!(walk.admit("https://s.test/book/1/2_2.html"));
    }

    #[test]
    fn test_visible_text_skips_scripts() {
        let doc = Html::parse_fragment("<div><p>one</p><script>var x=1;</script><style>p{}</style><p> two </p></div>");
        let div = doc.select(&css("div")).next().unwrap();
        assert_eq!(visible_text(div, "\n"), "one\ntwo");
    }

    #[test]
    fn test_item_content_usability() {
        assert!(!ItemContent::new("  \n ").is_usable());
        assert!(ItemContent::new("text").is_usable());
    }
}
