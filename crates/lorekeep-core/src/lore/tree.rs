use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::links::LinkIndex;
use super::{entry_title, file_stem};
use crate::error::LoreError;
use crate::ids::normalize_name;

/// In-memory copy of every published entry, keyed by relative path.
///
/// The scanner works from a snapshot so its output depends only on file
/// contents, never on walk order or timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoreSnapshot {
    docs: BTreeMap<String, String>,
}

impl LoreSnapshot {
    pub fn from_docs<I, P, C>(docs: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            docs: docs
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.docs.get(path).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.docs.contains_key(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.docs.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Name → path lookup used to resolve and repair links.
    #[must_use]
    pub fn link_index(&self) -> LinkIndex {
        LinkIndex::build(self.iter())
    }

    /// Normalized titles and slugs of published entries, for deduplicating
    /// discoveries.
    #[must_use]
    pub fn published_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        for (path, content) in self.iter() {
            names.insert(normalize_name(&entry_title(path, content)));
            names.insert(normalize_name(&file_stem(path).replace('-', " ")));
        }
        names
    }
}

/// The lore directory on disk.
#[derive(Debug, Clone)]
pub struct LoreTree {
    root: PathBuf,
    skip: Vec<PathBuf>,
}

impl LoreTree {
    /// `skip` lists directories inside the root that hold non-entry files,
    /// such as the raw sources.
    #[must_use]
    pub fn new(root: &Path, skip: &[&Path]) -> Self {
        Self {
            root: root.to_path_buf(),
            skip: skip.iter().map(|p| p.to_path_buf()).collect(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every entry: `*.md` files, excluding names starting with `_` or
    /// `.`, skipped directories and hidden directories.
    pub fn snapshot(&self) -> std::io::Result<LoreSnapshot> {
        let mut docs = BTreeMap::new();
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "lore root missing, empty snapshot");
            return Ok(LoreSnapshot::default());
        }

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let hidden = e.depth() > 0 && e.file_name().to_string_lossy().starts_with('.');
                !hidden && !self.skip.iter().any(|s| e.path() == s)
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(%err, "skipping unreadable lore path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".md") || name.starts_with('_') {
                continue;
            }
            let Some(rel) = self.relative(entry.path()) else {
                continue;
            };
            let content = fs::read_to_string(entry.path())?;
            docs.insert(rel, content);
        }
        Ok(LoreSnapshot { docs })
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Absolute path for a relative entry path. Rejects anything that would
    /// leave the root.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf, LoreError> {
        let candidate = Path::new(rel);
        let escapes = candidate.is_absolute()
            || candidate
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || rel.is_empty() {
            return Err(LoreError::InvalidValue {
                field: "lore path",
                value: rel.to_string(),
            });
        }
        Ok(self.root.join(candidate))
    }

    #[must_use]
    pub fn exists(&self, rel: &str) -> bool {
        self.resolve(rel).is_ok_and(|p| p.is_file())
    }

    pub fn read(&self, rel: &str) -> Result<String, LoreError> {
        let path = self.resolve(rel)?;
        fs::read_to_string(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => LoreError::not_found("lore entry", rel),
            _ => LoreError::LoreWrite { path, source },
        })
    }

    /// Replace (or create) an entry. Writes a temp file and renames it over
    /// the target.
    pub fn write(&self, rel: &str, content: &str) -> Result<PathBuf, LoreError> {
        let path = self.resolve(rel)?;
        let wrap = |source| LoreError::LoreWrite {
            path: path.clone(),
            source,
        };
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(wrap)?;

        let tmp = parent.join(format!(".{}.tmp", file_stem(rel)));
        {
            let mut file = fs::File::create(&tmp).map_err(wrap)?;
            file.write_all(content.as_bytes()).map_err(wrap)?;
            file.sync_all().map_err(wrap)?;
        }
        fs::rename(&tmp, &path).map_err(wrap)?;
        debug!(path = %path.display(), "wrote lore entry");
        Ok(path)
    }
}
