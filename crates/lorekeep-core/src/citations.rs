//! Citation numbering.
//!
//! Each (source path, topic) pair gets a block of five numbers, rendered as
//! `[N-(N+4)]`. Numbers are never reused, so a marker keeps meaning the same
//! source after entries are rewritten.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::LoreError;
use crate::ids::normalize_name;
use crate::model::{Citation, CitationIndex, SourceKind};
use crate::storage::{Storage, keys};

/// Numbers reserved per citation.
pub const BLOCK_SIZE: u32 = 5;

/// A request for a citation marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRequest {
    /// Human-readable source title.
    pub source: String,
    pub source_kind: SourceKind,
    /// Source file relative to the sources root.
    pub path: String,
    pub topic: String,
}

impl CitationIndex {
    /// Existing citation for `(path, topic)`, if any.
    #[must_use]
    pub fn find(&self, path: &str, topic: &str) -> Option<&Citation> {
        let topic = normalize_name(topic);
        self.citations
            .iter()
            .find(|c| c.path == path && normalize_name(&c.topic) == topic)
    }

    /// Return the citation for `request`, allocating a new block if needed.
    pub fn assign(&mut self, request: &CitationRequest, now: DateTime<Utc>) -> Citation {
        if let Some(existing) = self.find(&request.path, &request.topic) {
            return existing.clone();
        }
        let number = self.next_number;
        let citation = Citation {
            id: format!("{number}-{}", number + BLOCK_SIZE - 1),
            number,
            source: request.source.clone(),
            source_kind: request.source_kind,
            path: request.path.clone(),
            topic: request.topic.clone(),
            created_at: now,
        };
        self.next_number += BLOCK_SIZE;
        self.citations.push(citation.clone());
        citation
    }

    /// Look up by marker id (`400-404`, brackets optional).
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&Citation> {
        let id = id.trim_start_matches('[').trim_end_matches(']');
        self.citations.iter().find(|c| c.id == id)
    }
}

/// Persisted [`CitationIndex`].
#[derive(Debug, Clone)]
pub struct Citations {
    storage: Storage,
}

impl Citations {
    #[must_use]
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn load(&self) -> CitationIndex {
        self.storage.get_or_default(keys::CITATION_INDEX)
    }

    /// Assign citations for every request in one write.
    pub fn cite_all(
        &self,
        requests: &[CitationRequest],
        now: DateTime<Utc>,
    ) -> Result<Vec<Citation>, LoreError> {
        let mut index = self.load();
        let before = index.next_number;
        let cited: Vec<Citation> = requests.iter().map(|r| index.assign(r, now)).collect();
        if index.next_number != before {
            if !self.storage.set(keys::CITATION_INDEX, &index) {
                return Err(LoreError::StorageWrite(keys::CITATION_INDEX.to_string()));
            }
            debug!(
                allocated = (index.next_number - before) / BLOCK_SIZE,
                next = index.next_number,
                "citations allocated"
            );
        }
        Ok(cited)
    }

    pub fn cite(&self, request: &CitationRequest, now: DateTime<Utc>) -> Result<Citation, LoreError> {
        let mut cited = self.cite_all(std::slice::from_ref(request), now)?;
        cited
            .pop()
            .ok_or_else(|| LoreError::StorageWrite(keys::CITATION_INDEX.to_string()))
    }
}
