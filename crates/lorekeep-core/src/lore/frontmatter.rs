//! YAML frontmatter at the top of an entry.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

use crate::model::{ConfidenceLevel, EntityCategory};

const FENCE: &str = "---";

static QUOTED_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([A-Za-z_][\w-]*):\s*"\[[^\]]*\]"\s*$"#).expect("valid regex")
});

/// Split `content` into (frontmatter text, body, body byte offset).
///
/// Returns `None` when the file does not open with a `---` fence that is
/// closed later on its own line.
#[must_use]
pub fn split(content: &str) -> Option<(&str, &str, usize)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let open_len = content.len() - rest.len();

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let yaml = &rest[..offset];
            let body_start = open_len + offset + line.len();
            return Some((yaml, &content[body_start..], body_start));
        }
        offset += line.len();
    }
    None
}

/// Body text with any frontmatter removed.
#[must_use]
pub fn body(content: &str) -> &str {
    split(content).map_or(content, |(_, body, _)| body)
}

/// Parsed frontmatter. Unknown keys are kept so a rewrite does not lose them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    map: Mapping,
}

/// Why frontmatter could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontmatterError {
    Missing,
    Malformed(String),
}

impl Frontmatter {
    /// Parse the frontmatter block of `content`.
    pub fn parse(content: &str) -> Result<Self, FrontmatterError> {
        let (yaml, _, _) = split(content).ok_or(FrontmatterError::Missing)?;
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_yaml::from_str::<Value>(yaml) {
            Ok(Value::Mapping(map)) => Ok(Self { map }),
            Ok(Value::Null) => Ok(Self::default()),
            Ok(other) => Err(FrontmatterError::Malformed(format!(
                "expected a mapping, found {}",
                yaml_kind(&other)
            ))),
            Err(err) => Err(FrontmatterError::Malformed(err.to_string())),
        }
    }

    /// Required fields for a freshly written entry.
    #[must_use]
    pub fn for_entry(
        title: &str,
        category: EntityCategory,
        confidence: ConfidenceLevel,
        date: NaiveDate,
    ) -> Self {
        let mut fm = Self::default();
        fm.set("title", title);
        fm.set("category", category.as_str());
        fm.set("confidence", confidence.as_str());
        fm.set("lastUpdated", date.format("%Y-%m-%d").to_string());
        fm
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.map.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.get_str("title").filter(|s| !s.trim().is_empty())
    }

    #[must_use]
    pub fn category(&self) -> Option<EntityCategory> {
        EntityCategory::from_dir_name(&self.get_str("category")?)
    }

    #[must_use]
    pub fn confidence(&self) -> Option<ConfidenceLevel> {
        self.get_str("confidence")?.parse().ok()
    }

    /// `lastUpdated` as a date; accepts a full timestamp and keeps the date.
    #[must_use]
    pub fn last_updated(&self) -> Option<NaiveDate> {
        let raw = self.get_str("lastUpdated")?;
        let date = raw.get(..10).unwrap_or(&raw);
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.map.insert(Value::String(key.to_string()), value.into());
    }

    /// Render as a fenced block followed by `body`.
    #[must_use]
    pub fn render(&self, body: &str) -> String {
        let yaml = serde_yaml::to_string(&self.map).unwrap_or_default();
        let mut out = String::with_capacity(yaml.len() + body.len() + 8);
        out.push_str("---\n");
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n");
        out.push_str(body.trim_start_matches('\n'));
        out
    }
}

fn yaml_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Keys whose list value was written as a quoted string, e.g.
/// `tags: "[a, b]"`.
#[must_use]
pub fn quoted_array_keys(content: &str) -> Vec<String> {
    let Some((yaml, _, _)) = split(content) else {
        return Vec::new();
    };
    QUOTED_ARRAY
        .captures_iter(yaml)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Rough depth of an entry, used to pick expansion candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Stub,
    Basic,
    Moderate,
    Comprehensive,
}

impl DetailLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Basic => "basic",
            Self::Moderate => "moderate",
            Self::Comprehensive => "comprehensive",
        }
    }
}

/// Score sections, length and citations into a [`DetailLevel`].
#[must_use]
pub fn assess_detail_level(content: &str, citation_count: usize) -> DetailLevel {
    let body = body(content);
    let sections: Vec<String> = body
        .lines()
        .filter(|l| l.starts_with("## "))
        .map(|l| l[3..].trim().to_lowercase())
        .collect();

    let mut score = sections.len().min(5);
    let has = |names: &[&str]| sections.iter().any(|s| names.iter().any(|n| s.starts_with(n)));
    if has(&["gear", "equipment"]) {
        score += 2;
    }
    if has(&["ai cards", "behavior"]) {
        score += 2;
    }
    if has(&["events", "hunt events", "history"]) {
        score += 2;
    }
    if has(&["connections", "relationships"]) {
        score += 1;
    }
    if body.len() > 3000 {
        score += 2;
    }
    if body.len() > 6000 {
        score += 2;
    }
    score += citation_count.min(3);

    match score {
        12.. => DetailLevel::Comprehensive,
        6..=11 => DetailLevel::Moderate,
        2..=5 => DetailLevel::Basic,
        _ => DetailLevel::Stub,
    }
}
