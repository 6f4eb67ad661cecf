use log::{info, warn};
use std::path::Path;

use crate::artifact_store::{write_atomic, ArtifactStore};
use crate::error::AssemblyError;
use crate::planner::ItemPlan;

pub const SEPARATOR: &str = "==============================";

#[derive(Debug, Clone)]
pub struct AssemblyHeader {
    pub title: String,
    pub source: String,
}

/// Renders the header, then every stored item in `sequence_index` order.
/// Items with no artifact yet are left out, so a partial job still yields a
/// valid document.
pub fn render(header: &AssemblyHeader, plan: &ItemPlan, store: &ArtifactStore) -> String {
    let mut out = format!("Book: {}\nSource: {}\n\n", header.title, header.source);
    for item in plan.items() {
        match store.read(item.sequence_index) {
            Ok(Some(content)) => {
                out.push_str(item.display_title());
                out.push_str("\n\n");
                out.push_str(&content);
                out.push('\n');
                out.push_str(SEPARATOR);
                out.push_str("\n\n");
            }
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable artifact {}: {}", item.sequence_index, e),
        }
    }
    out
}

pub fn assemble(
    header: &AssemblyHeader,
    plan: &ItemPlan,
    store: &ArtifactStore,
    output: &Path,
) -> Result<(), AssemblyError> {
    let text = render(header, plan, store);
    write_atomic(output, text.as_bytes()).map_err(|source| AssemblyError::Io {
        path: output.to_path_buf(),
        source,
    })?;
    info!("Assembled {} ({} bytes)", output.display(), text.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ListPlanner, ScrapedLink};

    fn plan_of(n: usize) -> ItemPlan {
        ListPlanner::new(100).ordered(
            (0..n).map(|i| ScrapedLink::new(format!("C{}", i), format!("https://x.test/{}", i))).collect(),
        )
    }

    fn header() -> AssemblyHeader {
        AssemblyHeader { title: "Book".into(), source: "https://x.test".into() }
    }

    #[test]
    fn test_render_orders_by_index_and_omits_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), "j").unwrap();
        let plan = plan_of(4);
        store.write(3, "three").unwrap();
        store.write(0, "zero").unwrap();

        let text = render(&header(), &plan, &store);
        assert!(text.starts_with("Book: Book\nSource: https://x.test\n\n"));
        let zero = text.find("zero").unwrap();
        let three = text.find("three").unwrap();
        assert!(zero < three);
        assert!(!text.contains("C1"));
        assert!(!text.contains("C2"));
        assert_eq!(text.matches(SEPARATOR).count(), 2);
    }

    #[test]
    fn test_render_prefers_resolved_title() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), "j").unwrap();
        let mut plan = plan_of(1);
        plan.resolve_title(0, "Real Title".into());
        store.write(0, "body").unwrap();
        let text = render(&header(), &plan, &store);
        assert!(text.contains("Real Title\n\nbody\n"));
        assert!(!text.contains("C0"));
    }

    #[test]
    fn test_assemble_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path(), "j").unwrap();
        let plan = plan_of(2);
        store.write(1, "one").unwrap();
        let out = dir.path().join("Book.txt");
        assemble(&header(), &plan, &store, &out).unwrap();
        let text = std::fs::read_to_string(out).unwrap();
        assert!(text.contains("C1\n\none\n"));
    }
}
