//! Link resolution and repair inside entry bodies.
//!
//! Three shapes count as broken: wiki-style `[[Name]]` links (never valid in
//! the published markdown), bare `[Name]` brackets that name an entry but do
//! not link anywhere, and inline `[text](path.md)` links whose target file does
//! not exist. Frontmatter, fenced code and inline code are never inspected.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::sync::LazyLock;

use pulldown_cmark::{Event, LinkType, Parser, Tag};
use regex::Regex;

use super::{entry_title, file_stem, frontmatter, is_citation_marker};
use crate::ids::slugify;
use crate::model::wire_enum;

static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("valid regex")
});

static BARE_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]\n]+)\]").expect("valid regex"));

const CONNECTORS: &[&str] = &["of", "the", "and", "in", "on", "a", "an", "to", "de"];

wire_enum! {
    LinkKind ("link kind") {
        WikiStyle => "wiki_style",
        BareBracket => "bare_bracket",
        MissingFile => "missing_file",
    }
}

/// One unresolved link, located by byte range in the full file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLink {
    pub kind: LinkKind,
    pub range: Range<usize>,
    /// Exact source text of the link.
    pub original: String,
    /// Text a reader sees.
    pub text: String,
    /// Entry name or link destination the link points at.
    pub target: String,
    /// 1-based line number.
    pub line: usize,
}

/// Lookup from entry names to relative paths, plus the set of known files.
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    names: HashMap<String, String>,
    files: BTreeSet<String>,
}

impl LinkIndex {
    /// Index `(path, content)` pairs. Earlier paths win on name clashes.
    pub fn build<'a, I>(docs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = Self::default();
        for (path, content) in docs {
            index.files.insert(path.to_string());
            let title = entry_title(path, content).trim().to_lowercase();
            let stem = file_stem(path).to_lowercase();
            let mut keys = vec![stem.replace('-', " "), stem];
            if let Some(rest) = title.strip_prefix("the ") {
                keys.push(rest.to_string());
            }
            keys.push(title);
            for key in keys {
                index
                    .names
                    .entry(key)
                    .or_insert_with(|| path.to_string());
            }
        }
        index
    }

    #[must_use]
    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// Find the entry a human-written name refers to, trying the usual
    /// spelling variations.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let lower = name.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        let without_the = lower.strip_prefix("the ").unwrap_or(&lower).to_string();
        let candidates = [
            lower.clone(),
            without_the.clone(),
            lower.replace(' ', "-"),
            lower.replace('-', " "),
            without_the.replace(' ', "-"),
            lower.replace('\'', ""),
            slugify(&lower),
            slugify(&without_the),
        ];
        candidates
            .iter()
            .find_map(|c| self.names.get(c))
            .map(String::as_str)
    }
}

/// Whether bracketed text reads like the name of a lore entity.
fn looks_like_entity_name(text: &str) -> bool {
    let len = text.chars().count();
    if !(3..=50).contains(&len) {
        return false;
    }
    if text.contains(['.', ',', ';', '!', '?', ':', '"']) {
        return false;
    }
    let mut words = text.split_whitespace();
    let Some(first) = words.next() else {
        return false;
    };
    if !first.chars().next().is_some_and(char::is_uppercase) {
        return false;
    }
    words.all(|w| {
        w.chars().next().is_some_and(char::is_uppercase) || CONNECTORS.contains(&w)
    })
}

fn overlaps(ranges: &[Range<usize>], r: &Range<usize>) -> bool {
    ranges.iter().any(|x| x.start < r.end && r.start < x.end)
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].bytes().filter(|b| *b == b'\n').count() + 1
}

/// Directory part of a relative path, without trailing slash.
fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Resolve a link destination relative to the file that contains it.
///
/// A leading `/` resolves from the lore root. Returns `None` when the path
/// climbs above the root.
#[must_use]
pub fn resolve_relative(from: &str, link: &str) -> Option<String> {
    let (mut parts, rest): (Vec<&str>, &str) = match link.strip_prefix('/') {
        Some(rest) => (Vec::new(), rest),
        None => (
            parent_dir(from).split('/').filter(|s| !s.is_empty()).collect(),
            link,
        ),
    };
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Relative markdown link from one entry to another: `./x.md` within the
/// same directory, `../dir/x.md` otherwise.
#[must_use]
pub fn relative_link(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = parent_dir(from).split('/').filter(|s| !s.is_empty()).collect();
    let to_parts: Vec<&str> = to.split('/').collect();
    let (to_dir, to_name) = to_parts.split_at(to_parts.len().saturating_sub(1));

    let common = from_dir
        .iter()
        .zip(to_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = from_dir.len() - common;

    let mut out = if ups == 0 {
        String::from(".")
    } else {
        vec![".."; ups].join("/")
    };
    for part in &to_dir[common..] {
        out.push('/');
        out.push_str(part);
    }
    for name in to_name {
        out.push('/');
        out.push_str(name);
    }
    out
}

/// Code spans/blocks and inline link ranges of `body`, shifted by `offset`.
struct BodyLayout {
    code: Vec<Range<usize>>,
    inline_links: Vec<(Range<usize>, String)>,
}

fn layout(body: &str, offset: usize) -> BodyLayout {
    let mut code = Vec::new();
    let mut inline_links = Vec::new();
    let shift = |r: Range<usize>| (r.start + offset)..(r.end + offset);

    for (event, range) in Parser::new(body).into_offset_iter() {
        match event {
            Event::Code(_) | Event::Start(Tag::CodeBlock(_)) => code.push(shift(range)),
            Event::Start(Tag::Link {
                link_type: LinkType::Inline,
                dest_url,
                ..
            }) => inline_links.push((shift(range), dest_url.to_string())),
            _ => {}
        }
    }
    BodyLayout { code, inline_links }
}

fn is_local_markdown(dest: &str) -> bool {
    let lower = dest.to_lowercase();
    !(lower.starts_with("http") || lower.starts_with("mailto:") || lower.starts_with('#'))
        && !lower.contains("://")
        && lower.split('#').next().is_some_and(|p| p.ends_with(".md"))
}

/// Every unresolved link in `content`, in source order.
#[must_use]
pub fn find_broken_links(content: &str, file_path: &str, index: &LinkIndex) -> Vec<BrokenLink> {
    let (body, offset) = frontmatter::split(content)
        .map_or((content, 0), |(_, body, offset)| (body, offset));
    let layout = layout(body, offset);
    let mut found = Vec::new();

    for (range, dest) in &layout.inline_links {
        if !is_local_markdown(dest) {
            continue;
        }
        let target = dest.split('#').next().unwrap_or(dest);
        let exists = resolve_relative(file_path, target).is_some_and(|p| index.contains_file(&p));
        if exists {
            continue;
        }
        let original = &content[range.clone()];
        let text = original
            .rfind("](")
            .map_or(original, |end| &original[1..end])
            .to_string();
        found.push(BrokenLink {
            kind: LinkKind::MissingFile,
            range: range.clone(),
            original: original.to_string(),
            text,
            target: target.to_string(),
            line: line_of(content, range.start),
        });
    }

    let link_ranges: Vec<Range<usize>> = layout.inline_links.iter().map(|(r, _)| r.clone()).collect();
    let mut wiki_ranges = Vec::new();
    for caps in WIKI_LINK.captures_iter(body) {
        let Some(whole) = caps.get(0) else { continue };
        let range = (whole.start() + offset)..(whole.end() + offset);
        if overlaps(&layout.code, &range) {
            continue;
        }
        let target = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        let text = caps
            .get(2)
            .map_or(target.as_str(), |m| m.as_str().trim())
            .to_string();
        wiki_ranges.push(range.clone());
        found.push(BrokenLink {
            kind: LinkKind::WikiStyle,
            original: whole.as_str().to_string(),
            text,
            target,
            line: line_of(content, range.start),
            range,
        });
    }

    let bytes = content.as_bytes();
    for caps in BARE_BRACKET.captures_iter(body) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let range = (whole.start() + offset)..(whole.end() + offset);
        if overlaps(&layout.code, &range)
            || overlaps(&wiki_ranges, &range)
            || overlaps(&link_ranges, &range)
        {
            continue;
        }
        let before = range.start.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(range.end).copied();
        if matches!(before, Some(b'[' | b'!' | b']')) || matches!(after, Some(b'(' | b'[' | b':')) {
            continue;
        }
        let text = inner.as_str().trim();
        if text.chars().count() <= 2
            || text.starts_with('^')
            || text.chars().all(|c| c.is_ascii_digit() || c == '-')
            || matches!(text, "x" | "X" | " ")
            || is_citation_marker(text)
        {
            continue;
        }
        if index.resolve(text).is_none() && !looks_like_entity_name(text) {
            continue;
        }
        found.push(BrokenLink {
            kind: LinkKind::BareBracket,
            original: whole.as_str().to_string(),
            text: text.to_string(),
            target: text.to_string(),
            line: line_of(content, range.start),
            range,
        });
    }

    found.sort_by_key(|l| l.range.start);
    found
}

/// Rewrite every broken link: resolvable ones become relative markdown links,
/// the rest become plain text. Returns the new content and the number of
/// links rewritten.
#[must_use]
pub fn fix_links(content: &str, file_path: &str, index: &LinkIndex) -> (String, usize) {
    let mut broken = find_broken_links(content, file_path, index);
    broken.sort_by_key(|l| std::cmp::Reverse(l.range.start));

    let mut out = content.to_string();
    let mut fixed = 0;
    for link in &broken {
        let resolved = match link.kind {
            LinkKind::WikiStyle | LinkKind::BareBracket => index.resolve(&link.target),
            LinkKind::MissingFile => index
                .resolve(&link.text)
                .or_else(|| index.resolve(&file_stem(&link.target).replace('-', " "))),
        };
        let replacement = match resolved {
            Some(path) if path != file_path => {
                format!("[{}]({})", link.text, relative_link(file_path, path))
            }
            _ => link.text.clone(),
        };
        out.replace_range(link.range.clone(), &replacement);
        fixed += 1;
    }
    (out, fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LinkIndex {
        LinkIndex::build([
            ("locations/silver-city.md", "# Silver City\n"),
            ("monsters/gorm.md", "# Gorm\n"),
            ("factions/the-barons-court.md", "# The Baron's Court\n"),
        ])
    }

    #[test]
    fn resolves_name_variations() {
        let idx = index();
        assert_eq!(idx.resolve("Silver City"), Some("locations/silver-city.md"));
        assert_eq!(idx.resolve("silver-city"), Some("locations/silver-city.md"));
        assert_eq!(idx.resolve("Baron's Court"), Some("factions/the-barons-court.md"));
        assert_eq!(idx.resolve("The Gorm"), Some("monsters/gorm.md"));
        assert_eq!(idx.resolve("Nowhere"), None);
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_link("monsters/gorm.md", "locations/silver-city.md"),
            "../locations/silver-city.md"
        );
        assert_eq!(relative_link("monsters/gorm.md", "monsters/phoenix.md"), "./phoenix.md");
        assert_eq!(
            resolve_relative("monsters/gorm.md", "../locations/silver-city.md").as_deref(),
            Some("locations/silver-city.md")
        );
        assert_eq!(
            resolve_relative("monsters/gorm.md", "./phoenix.md").as_deref(),
            Some("monsters/phoenix.md")
        );
        assert_eq!(resolve_relative("gorm.md", "../../x.md"), None);
    }

    #[test]
    fn detects_all_three_kinds() {
        let content = "---\ntitle: Gorm\n---\n# Gorm\n\nGorm roams [[Silver City]] and \
                       [The Ashen Wastes]. See [phoenix](./phoenix.md) and \
                       [city](../locations/silver-city.md). Cited [400-404].\n";
        let broken = find_broken_links(content, "monsters/gorm.md", &index());
        let kinds: Vec<LinkKind> = broken.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![LinkKind::WikiStyle, LinkKind::BareBracket, LinkKind::MissingFile]
        );
        assert_eq!(broken[0].text, "Silver City");
        assert_eq!(broken[1].text, "The Ashen Wastes");
        assert_eq!(broken[2].target, "./phoenix.md");
        assert_eq!(broken[0].line, 6);
        assert_eq!(&content[broken[0].range.clone()], "[[Silver City]]");
    }

    #[test]
    fn ignores_code_frontmatter_and_noise() {
        let content = "---\ntags: [Silver City]\n---\n# Gorm\n\n`[[Silver City]]`\n\n\
                       ```\n[[Silver City]]\n```\n\n- [x] done\n- [ ] todo\n\
                       Footnote[^1] and [lowercase words] and [ref][1].\n\n[1]: https://example.com\n";
        assert!(find_broken_links(content, "monsters/gorm.md", &index()).is_empty());
    }

    #[test]
    fn external_links_are_not_checked() {
        let content = "# Gorm\n\n[site](https://example.com/x.md) [top](#overview)\n";
        assert!(find_broken_links(content, "monsters/gorm.md", &index()).is_empty());
    }

    #[test]
    fn fix_rewrites_to_zero_broken() {
        let idx = index();
        let content = "# Gorm\n\nSeen near [[Silver City|the city]], allied with [Baron's Court], \
                       feared in [[Unknown Realm]] and [old](./silver-city.md).\n";
        let (fixed, count) = fix_links(content, "monsters/gorm.md", &idx);
        assert_eq!(count, 4);
        assert!(fixed.contains("[the city](../locations/silver-city.md)"));
        assert!(fixed.contains("[Baron's Court](../factions/the-barons-court.md)"));
        assert!(fixed.contains("feared in Unknown Realm and"));
        assert!(fixed.contains("[old](../locations/silver-city.md)"));
        assert!(find_broken_links(&fixed, "monsters/gorm.md", &idx).is_empty());
    }

    #[test]
    fn fix_is_noop_on_clean_content() {
        let content = "# Gorm\n\nLives in [Silver City](../locations/silver-city.md).\n";
        let (fixed, count) = fix_links(content, "monsters/gorm.md", &index());
        assert_eq!(count, 0);
        assert_eq!(fixed, content);
    }
}
