//! Turns scraped item links into an ordered, gap-reconciled [`ItemPlan`].
//!
//! Sources that number their items in the URL (`.../12345.html`) often hide
//! part of the table of contents. The planner fills every hole in the
//! observed id range with a probed item so the fetch loop can confirm it.

use log::{info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// A link as it appears on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedLink {
    pub title: String,
    pub url: String,
}

impl ScrapedLink {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        ScrapedLink { title: title.into(), url: url.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub sequence_index: usize,
    pub title: String,
    pub source_url: String,
    /// Synthesized to fill an id gap; unconfirmed until fetched.
    pub is_probed: bool,
    /// Title reported by the item page itself, once fetched.
    pub resolved_title: Option<String>,
}

impl Item {
    pub fn display_title(&self) -> &str {
        self.resolved_title.as_deref().unwrap_or(&self.title)
    }
}

/// Ordered items with dense `sequence_index` 0..n-1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemPlan {
    items: Vec<Item>,
}

impl ItemPlan {
    fn from_links<I>(links: I) -> Self
    where
        I: IntoIterator<Item = (ScrapedLink, bool)>,
    {
        let items = links
            .into_iter()
            .enumerate()
            .map(|(i, (link, is_probed))| Item {
                sequence_index: i,
                title: link.title,
                source_url: link.url,
                is_probed,
                resolved_title: None,
            })
            .collect();
        ItemPlan { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, sequence_index: usize) -> Option<&Item> {
        self.items.get(sequence_index)
    }

    pub fn probed_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_probed).count()
    }

    /// Records the title an item page reported. Order and urls never change.
    pub fn resolve_title(&mut self, sequence_index: usize, title: String) {
        if let Some(item) = self.items.get_mut(sequence_index) {
            item.resolved_title = Some(title);
        }
    }
}

/// Canonical form used for visited-sets and dedup keys: no fragment, no
/// trailing slash, lowercase scheme and host.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

pub struct ListPlanner {
    id_pattern: Regex,
    max_probe_span: u64,
}

impl ListPlanner {
    pub fn new(max_probe_span: u64) -> Self {
        ListPlanner {
            id_pattern: Regex::new(r"/(\d+)\.html").unwrap(),
            max_probe_span,
        }
    }

    pub fn item_id(&self, url: &str) -> Option<u64> {
        self.id_pattern
            .captures(url)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Document order, deduplicated by url. For sources without numeric ids.
    pub fn ordered(&self, links: Vec<ScrapedLink>) -> ItemPlan {
        let mut seen = std::collections::HashSet::new();
        ItemPlan::from_links(
            links
                .into_iter()
                .filter(|l| seen.insert(l.url.clone()))
                .map(|l| (l, false)),
        )
    }

    /// Merges the primary and secondary listings, then emits one item per
    /// integer in the observed id range. Unknown ids become probed items whose
    /// url reuses the lowest known item's path with the id substituted.
    pub fn reconcile(&self, primary: Vec<ScrapedLink>, secondary: Vec<ScrapedLink>) -> ItemPlan {
        let mut merged: Vec<ScrapedLink> = Vec::new();
        let mut by_url: HashMap<String, usize> = HashMap::new();
        for link in primary.into_iter().chain(secondary) {
            match by_url.get(&link.url) {
                Some(&pos) => merged[pos] = link,
                None => {
                    by_url.insert(link.url.clone(), merged.len());
                    merged.push(link);
                }
            }
        }

        let mut known: BTreeMap<u64, ScrapedLink> = BTreeMap::new();
        for link in &merged {
            if let Some(id) = self.item_id(&link.url) {
                known.insert(id, link.clone());
            }
        }

        let (min_id, max_id) = match (known.keys().next(), known.keys().next_back()) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => return self.url_ordered(merged),
        };

        if max_id - min_id >= self.max_probe_span {
            warn!(
                "Id range {}..={} exceeds probe span {}, keeping scraped items only",
                min_id, max_id, self.max_probe_span
            );
            return self.url_ordered(merged);
        }

        let template = known[&min_id].url.clone();
        let span = match self.id_pattern.captures(&template).and_then(|c| c.get(1)) {
            Some(m) => m.range(),
            None => return self.url_ordered(merged),
        };
        let (prefix, suffix) = (&template[..span.start], &template[span.end..]);

        let plan = ItemPlan::from_links((min_id..=max_id).map(|id| match known.remove(&id) {
            Some(link) => (link, false),
            None => (
                ScrapedLink::new(
                    format!("Chapter {} (probed)", id),
                    format!("{}{}{}", prefix, id, suffix),
                ),
                true,
            ),
        }));

        info!(
            "Planned {} items for ids {}..={} ({} probed)",
            plan.len(),
            min_id,
            max_id,
            plan.probed_count()
        );
        plan
    }

    fn url_ordered(&self, mut links: Vec<ScrapedLink>) -> ItemPlan {
        links.sort_by(|a, b| a.url.cmp(&b.url));
        ItemPlan::from_links(links.into_iter().map(|l| (l, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: u64) -> ScrapedLink {
        ScrapedLink::new(format!("Chapter {}", id), format!("https://site.test/n/book/{}.html", id))
    }

    #[test]
    fn test_gap_reconciliation_fills_missing_ids() {
        let planner = ListPlanner::new(1000);
        let plan = planner.reconcile(vec![link(10), link(12), link(15)], vec![]);

        assert_eq!(plan.len(), 6);
        let probed: Vec<usize> = plan.items().iter().filter(|i| i.is_probed).map(|i| i.sequence_index).collect();
        assert_eq!(probed, vec![1, 3, 4]);
        assert_eq!(plan.get(1).unwrap().source_url, "https://site.test/n/book/11.html");
        assert_eq!(plan.get(4).unwrap().source_url, "https://site.test/n/book/14.html");
        assert_eq!(plan.get(5).unwrap().title, "Chapter 15");
        for (i, item) in plan.items().iter().enumerate() {
            assert_eq!(item.sequence_index, i);
        }
    }

    #[test]
    fn test_secondary_listing_recovers_hidden_items() {
        let planner = ListPlanner::new(1000);
        let plan = planner.reconcile(vec![link(1), link(4)], vec![link(2), link(3)]);
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.probed_count(), 0);
    }

    #[test]
    fn test_secondary_entry_replaces_primary_title() {
        let planner = ListPlanner::new(1000);
        let renamed = ScrapedLink::new("Prologue", link(1).url);
        let plan = planner.reconcile(vec![link(1), link(2)], vec![renamed]);
        assert_eq!(plan.get(0).unwrap().title, "Prologue");
    }

    #[test]
    fn test_no_ids_falls_back_to_url_order() {
        let planner = ListPlanner::new(1000);
        let plan = planner.reconcile(
            vec![
                ScrapedLink::new("b", "https://site.test/b"),
                ScrapedLink::new("a", "https://site.test/a"),
            ],
            vec![],
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get(0).unwrap().title, "a");
        assert_eq!(plan.probed_count(), 0);
    }

    #[test]
    fn test_oversized_span_is_not_probed() {
        let planner = ListPlanner::new(100);
        let plan = planner.reconcile(vec![link(1), link(5000)], vec![]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.probed_count(), 0);
    }

    #[test]
    fn test_ordered_keeps_document_order_and_dedups() {
        let planner = ListPlanner::new(100);
        let plan = planner.ordered(vec![link(3), link(1), link(3)]);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get(0).unwrap().title, "Chapter 3");
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("HTTPS://Site.Test/a/#top"), "https://site.test/a");
        assert_eq!(normalize_url(" not a url/ "), "not a url");
    }

    #[test]
    fn test_resolve_title_overrides_display() {
        let mut plan = ListPlanner::new(10).ordered(vec![link(1)]);
        assert_eq!(plan.get(0).unwrap().display_title(), "Chapter 1");
        plan.resolve_title(0, "1. The Beginning".into());
        assert_eq!(plan.get(0).unwrap().display_title(), "1. The Beginning");
    }
}
