//! Narrative transcript data model.
//!
//! Entries are append-only and chronologically ordered by insertion.
//! A history carries at most one continuity summary, replaced on each
//! compaction; the summary chains by folding in its predecessor's text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id of one transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    PlayerInput,
    GmResponse,
}

/// One immutable turn of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeEntry {
    pub id: EntryId,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub content: String,
}

impl NarrativeEntry {
    /// Create an entry timestamped now.
    pub fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            timestamp: Utc::now(),
            kind,
            content: content.into(),
        }
    }

    /// A player-input entry.
    pub fn player(content: impl Into<String>) -> Self {
        Self::new(EntryKind::PlayerInput, content)
    }

    /// A GM-response entry.
    pub fn gm(content: impl Into<String>) -> Self {
        Self::new(EntryKind::GmResponse, content)
    }

    /// Content length in characters (not bytes).
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// The time span covered by an archived group of entries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// A continuity summary produced by compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub generated_at: DateTime<Utc>,
    /// Model that produced the summary (opaque, recorded for audit).
    pub model: String,
    pub entries_archived: usize,
    pub date_range: DateRange,
}

/// The live transcript: ordered entries plus an optional summary of
/// everything archived before them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeHistory {
    pub entries: Vec<NarrativeEntry>,
    pub summary: Option<Summary>,
}

impl NarrativeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries are never mutated or reordered after
    /// this point.
    pub fn push(&mut self, entry: NarrativeEntry) {
        self.entries.push(entry);
    }

    /// Summed character length of all entry contents.
    pub fn total_chars(&self) -> usize {
        self.entries.iter().map(NarrativeEntry::char_count).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.summary.is_none()
    }
}
