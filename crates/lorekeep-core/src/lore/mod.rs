//! The published lore tree.
//!
//! Entries are markdown files with YAML frontmatter, one directory per
//! category under the lore root. Paths handed around the pipeline are
//! relative to that root and always use `/`.

pub mod frontmatter;
pub mod links;
pub mod tree;

pub use frontmatter::{DetailLevel, Frontmatter, FrontmatterError};
pub use links::{BrokenLink, LinkIndex, LinkKind};
pub use tree::{LoreSnapshot, LoreTree};

use regex::Regex;
use std::sync::LazyLock;

/// Citation markers: numeric ranges from the citation index (`[400-404]`,
/// `[412]`) and file-range references (`[gorm-newsletter:10-20]`).
static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(\d+(?:-\d+)?|[a-z0-9][a-z0-9_-]*:\d+(?:-\d+)?)\]").expect("valid regex")
});

static CITATION_INNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+(?:-\d+)?|[a-z0-9][a-z0-9_-]*:\d+(?:-\d+)?)$").expect("valid regex")
});

static H1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t]*$").expect("valid regex"));

/// Every citation marker in `text`, in order of appearance, brackets kept.
#[must_use]
pub fn citation_markers(text: &str) -> Vec<String> {
    CITATION_MARKER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether the bracketed text (without brackets) is a citation marker.
#[must_use]
pub fn is_citation_marker(inner: &str) -> bool {
    CITATION_INNER.is_match(inner)
}

/// Display name of an entry: first `# ` heading, then frontmatter title,
/// then the file stem with dashes as spaces.
#[must_use]
pub fn entry_title(path: &str, content: &str) -> String {
    let body = frontmatter::body(content);
    if let Some(h1) = H1.captures(body).and_then(|c| c.get(1)) {
        return h1.as_str().to_string();
    }
    if let Some(title) = Frontmatter::parse(content).ok().and_then(|fm| fm.title()) {
        return title;
    }
    file_stem(path).replace('-', " ")
}

/// File name without directory or `.md`.
#[must_use]
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}

/// First directory component of a relative path.
#[must_use]
pub fn category_dir(path: &str) -> Option<&str> {
    let (dir, _) = path.split_once('/')?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_found_in_order() {
        let text = "Gorm [400-404] hunts [gorm-news:10-20] at night [412]. Not [Gorm].";
        assert_eq!(
            citation_markers(text),
            vec!["[400-404]", "[gorm-news:10-20]", "[412]"]
        );
    }

    #[test]
    fn marker_predicate() {
        assert!(is_citation_marker("400-404"));
        assert!(is_citation_marker("rules:3"));
        assert!(!is_citation_marker("Silver City"));
        assert!(!is_citation_marker("400-404 extra"));
    }

    #[test]
    fn title_prefers_h1() {
        let content = "---\ntitle: Fm Title\n---\n# Heading Title\n";
        assert_eq!(entry_title("locations/x.md", content), "Heading Title");
        assert_eq!(
            entry_title("locations/x.md", "---\ntitle: Fm Title\n---\nbody\n"),
            "Fm Title"
        );
        assert_eq!(entry_title("locations/silver-city.md", "body"), "silver city");
    }

    #[test]
    fn path_helpers() {
        assert_eq!(file_stem("monsters/gorm.md"), "gorm");
        assert_eq!(category_dir("monsters/gorm.md"), Some("monsters"));
        assert_eq!(category_dir("index.md"), None);
    }
}
