use regex::Regex;
use serde::Serialize;

pub const UNKNOWN: &str = "未知";

/// Book metadata recovered from a search-result snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub author: String,
    pub protagonist: String,
    pub is_completed: bool,
    pub latest: String,
    pub chapter_count: u32,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            author: UNKNOWN.to_string(),
            protagonist: UNKNOWN.to_string(),
            is_completed: false,
            latest: UNKNOWN.to_string(),
            chapter_count: 0,
        }
    }
}

pub struct Extractor {
    author_regex: Regex,
    protagonist_regex: Regex,
    latest_regex: Regex,
    total_regex: Regex,
    chapter_regex: Regex,
}

impl Extractor {
    pub fn new() -> Self {
        Extractor {
            author_regex: Regex::new(r"(?:作者|笔名)[:：]\s*([^\s\x{3000}]+)").unwrap(),
            protagonist_regex: Regex::new(r"(?:主角|主要人物|人物)[:：]\s*([^\s\x{3000},，]+)").unwrap(),
            latest_regex: Regex::new(r"(?:最新|更新)[:：]\s*([^\s\x{3000}]+)").unwrap(),
            // "共 123 章": explicit total
            total_regex: Regex::new(r"共\s*(\d+)\s*章").unwrap(),
            // "第 123 章": a chapter number, used as an estimate
            chapter_regex: Regex::new(r"第\s*(\d+)\s*章").unwrap(),
        }
    }

    /// `latest` overrides the snippet's own "latest chapter" when known.
    pub fn extract(&self, snippet: &str, latest: Option<&str>) -> Metadata {
        let mut meta = Metadata::default();
        let grab = |re: &Regex| re.captures(snippet).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string());

        if let Some(author) = grab(&self.author_regex) {
            meta.author = author;
        }
        if let Some(who) = grab(&self.protagonist_regex) {
            meta.protagonist = who;
        }
        meta.is_completed = ["完结", "完本", "已完成", "全文阅读"].iter().any(|w| snippet.contains(w));

        match latest.filter(|l| !l.is_empty() && *l != UNKNOWN) {
            Some(l) => meta.latest = l.to_string(),
            None => {
                if let Some(l) = grab(&self.latest_regex) {
                    meta.latest = l;
                }
            }
        }

        meta.chapter_count = self
            .number(&self.total_regex, snippet)
            .or_else(|| self.chapter_number(&meta.latest))
            .unwrap_or(0);
        meta
    }

    /// Number in the first "第N章" of `text`.
    pub fn chapter_number(&self, text: &str) -> Option<u32> {
        self.number(&self.chapter_regex, text)
    }

    fn number(&self, re: &Regex, text: &str) -> Option<u32> {
        re.captures(text)?.get(1)?.as_str().parse().ok()
    }
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Letters and digits only (any script), for loose title matching.
pub fn clean_text(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Loose match used for engine results: either side contains the other.
pub fn title_matches(keyword: &str, title: &str) -> bool {
    let k = clean_text(keyword);
    let t = clean_text(title);
    if k.is_empty() {
        return false;
    }
    t.contains(&k) || (t.chars().count() > 2 && k.contains(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_full_snippet() {
        let ex = Extractor::new();
        let meta = ex.extract("作者：天蚕土豆 主角：萧炎 已完结 共 1648 章 最新：第1648章 大结局", None);
        assert_eq!(meta.author, "天蚕土豆");
        assert_eq!(meta.protagonist, "萧炎");
        assert!(meta.is_completed);
        assert_eq!(meta.latest, "第1648章");
        assert_eq!(meta.chapter_count, 1648);
    }

    #[test]
    fn test_count_falls_back_to_latest_chapter() {
        let ex = Extractor::new();
        let meta = ex.extract("连载中", Some("第 321 章 风起"));
        assert_eq!(meta.chapter_count, 321);
        assert!(!meta.is_completed);
        assert_eq!(meta.author, UNKNOWN);
    }

    #[test]
    fn test_empty_snippet_defaults() {
        assert_eq!(Extractor::new().extract("", None), Metadata::default());
    }

    #[test]
    fn test_title_matching() {
        assert!(title_matches("斗破苍穹", "《斗破苍穹》最新章节列表"));
        assert!(title_matches("斗破苍穹 小说", "斗破苍穹"));
        assert!(!title_matches("斗破苍穹", "武动乾坤"));
        assert!(!title_matches("", "anything"));
    }
}
