//! Transcript compaction: archive the old, summarize, keep a window.
//!
//! When the live transcript grows past a character threshold, the
//! surrounding application asks the compactor to split it: everything
//! older than a bounded retained window is written to an immutable
//! Markdown archive and condensed into a continuity summary that chains
//! onto the previous one. The compactor never mutates the history it is
//! given; it returns replacement data for the caller to commit.

use crate::config::Settings;
use crate::history::{DateRange, EntryKind, NarrativeEntry, NarrativeHistory, Summary};
use chrono::{DateTime, Utc};
use narrator::{EngineError, NarrativeEngine, SummaryRequest};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

/// Errors from compaction, returned as values for pattern matching.
#[derive(Debug, Error)]
pub enum CompactError {
    #[error("compaction already in progress")]
    AlreadyInProgress,

    #[error("not enough entries to compact")]
    NotEnoughEntries,

    #[error("archive write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("summary generation failed: {0}")]
    Engine(#[from] EngineError),
}

impl CompactError {
    /// Whether the caller may retry the compaction later.
    pub fn retryable(&self) -> bool {
        match self {
            CompactError::AlreadyInProgress | CompactError::Io(_) => true,
            CompactError::NotEnoughEntries => false,
            CompactError::Engine(err) => err.retryable(),
        }
    }
}

/// The result of one successful compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub entries_archived: usize,
    /// The retained window, oldest first.
    pub retained: Vec<NarrativeEntry>,
    pub archive_path: PathBuf,
    pub summary: Summary,
}

impl CompactionOutcome {
    /// The history that should replace the compacted one.
    pub fn replacement_history(&self) -> NarrativeHistory {
        NarrativeHistory {
            entries: self.retained.clone(),
            summary: Some(self.summary.clone()),
        }
    }
}

/// Decides when a transcript is too large and performs the
/// archive-and-summarize split.
///
/// Mutual exclusion is per instance: a second `compact` while one is in
/// flight fails immediately rather than queueing. This does not protect
/// multiple processes sharing one adventure directory.
pub struct HistoryCompactor {
    settings: Settings,
    engine: Arc<dyn NarrativeEngine>,
    archive_dir: PathBuf,
    in_flight: AtomicBool,
}

impl HistoryCompactor {
    /// Create a compactor writing archives under `archive_dir`.
    pub fn new(
        settings: Settings,
        engine: Arc<dyn NarrativeEngine>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            engine,
            archive_dir: archive_dir.into(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether the transcript has outgrown the configured threshold.
    /// Pure query; never touches state.
    pub fn should_compact(&self, history: &NarrativeHistory) -> bool {
        history.total_chars() > self.settings.compaction_threshold_chars
    }

    /// Archive everything older than the retained window and generate a
    /// chained continuity summary.
    ///
    /// The archive is staged to a temporary file and only renamed into
    /// place once summary generation succeeds, so a failure leaves no
    /// partial state behind. Rapid repeated compactions within the same
    /// second reuse the same filename; the caller is expected to space
    /// compactions out.
    pub async fn compact(
        &self,
        history: &NarrativeHistory,
    ) -> Result<CompactionOutcome, CompactError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CompactError::AlreadyInProgress);
        }
        let _guard = InFlightGuard(&self.in_flight);

        if history.entries.len() <= self.settings.retained_count {
            return Err(CompactError::NotEnoughEntries);
        }

        let retained = self.retained_window(history);
        let split = history.entries.len() - retained.len();
        let archived = &history.entries[..split];
        let (first, last) = match (archived.first(), archived.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(CompactError::NotEnoughEntries),
        };
        let date_range = DateRange {
            from: first.timestamp,
            to: last.timestamp,
        };

        let archived_at = Utc::now();
        fs::create_dir_all(&self.archive_dir).await?;
        let stem = archived_at.format("%Y-%m-%d-%H%M%S");
        let archive_path = self.archive_dir.join(format!("{stem}.md"));
        let staging_path = self.archive_dir.join(format!("{stem}.md.tmp"));

        let document = render_archive(archived, archived_at, date_range);
        fs::write(&staging_path, &document).await?;

        let mut request = SummaryRequest::new(render_transcript(archived))
            .with_model(self.settings.model.clone());
        if let Some(previous) = &history.summary {
            request = request.with_previous_summary(previous.text.clone());
        }

        let text = match self.engine.summarize(request).await {
            Ok(text) => text,
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&staging_path).await {
                    tracing::warn!(error = %cleanup, "failed to remove staged archive");
                }
                return Err(err.into());
            }
        };

        fs::rename(&staging_path, &archive_path).await?;

        let summary = Summary {
            text,
            generated_at: Utc::now(),
            model: self.settings.model.clone(),
            entries_archived: archived.len(),
            date_range,
        };

        tracing::info!(
            entries_archived = archived.len(),
            retained = retained.len(),
            path = %archive_path.display(),
            "compacted transcript"
        );

        Ok(CompactionOutcome {
            entries_archived: archived.len(),
            retained,
            archive_path,
            summary,
        })
    }

    /// Scan from the newest entry backward, stopping at the first of:
    /// the retained-count limit, or a char budget that the next older
    /// entry would blow. The newest entry is always retained when the
    /// count allows one at all, even if it alone exceeds the budget.
    fn retained_window(&self, history: &NarrativeHistory) -> Vec<NarrativeEntry> {
        let mut window = Vec::new();
        let mut chars = 0usize;
        for entry in history.entries.iter().rev() {
            if window.len() >= self.settings.retained_count {
                break;
            }
            let len = entry.char_count();
            if !window.is_empty() && chars + len > self.settings.target_retained_char_count {
                break;
            }
            chars += len;
            window.push(entry.clone());
        }
        window.reverse();
        window
    }
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn heading(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::PlayerInput => "Player Input",
        EntryKind::GmResponse => "GM Response",
    }
}

/// Render the immutable archive document: YAML frontmatter plus a
/// transcript body in chronological order.
fn render_archive(
    entries: &[NarrativeEntry],
    archived_at: DateTime<Utc>,
    date_range: DateRange,
) -> String {
    let mut doc = String::new();
    doc.push_str("---\n");
    doc.push_str(&format!("archived_at: {}\n", archived_at.to_rfc3339()));
    doc.push_str("date_range:\n");
    doc.push_str(&format!("  from: {}\n", date_range.from.to_rfc3339()));
    doc.push_str(&format!("  to: {}\n", date_range.to.to_rfc3339()));
    doc.push_str(&format!("entry_count: {}\n", entries.len()));
    doc.push_str("---\n\n");
    doc.push_str("# Archived Adventure History\n");

    for entry in entries {
        doc.push_str(&format!("\n## {}\n\n", heading(entry.kind)));
        doc.push_str(&entry.content);
        doc.push('\n');
    }

    doc
}

/// Render the archived span as plain text for summarization.
fn render_transcript(entries: &[NarrativeEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{}: {}", heading(entry.kind), entry.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use narrator::ScriptedEngine;
    use std::time::Duration;
    use tempfile::TempDir;

    fn history_with_turns(count: usize) -> NarrativeHistory {
        let mut history = NarrativeHistory::new();
        for i in 0..count {
            if i % 2 == 0 {
                history.push(NarrativeEntry::player(format!("action {i}")));
            } else {
                history.push(NarrativeEntry::gm(format!("narration {i}")));
            }
        }
        history
    }

    fn compactor_with(
        dir: &TempDir,
        settings: Settings,
        engine: Arc<ScriptedEngine>,
    ) -> HistoryCompactor {
        HistoryCompactor::new(settings, engine, dir.path().join("history"))
    }

    fn assert_archive_filename(path: &std::path::Path) {
        assert_eq!(
            path.parent().and_then(|p| p.file_name()).unwrap(),
            "history"
        );
        let name = path.file_name().unwrap().to_string_lossy();
        // {YYYY-MM-DD}-{HHMMSS}.md
        assert_eq!(name.len(), "0000-00-00-000000.md".len());
        assert!(name.ends_with(".md"));
        let stem = &name[..name.len() - 3];
        for (i, c) in stem.chars().enumerate() {
            match i {
                4 | 7 | 10 => assert_eq!(c, '-', "unexpected '{c}' at {i} in {name}"),
                _ => assert!(c.is_ascii_digit(), "unexpected '{c}' at {i} in {name}"),
            }
        }
    }

    #[test]
    fn test_should_compact_threshold() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new().with_compaction_threshold_chars(100);
        let compactor = compactor_with(&dir, settings, Arc::new(ScriptedEngine::new()));

        let mut history = NarrativeHistory::new();
        history.push(NarrativeEntry::player("x".repeat(100)));
        assert!(!compactor.should_compact(&history));

        history.push(NarrativeEntry::gm("y"));
        assert!(compactor.should_compact(&history));
    }

    #[tokio::test]
    async fn test_thirty_entries_retain_twenty() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(20)
            .with_target_retained_char_count(1_000_000);
        let engine = Arc::new(ScriptedEngine::new());
        let compactor = compactor_with(&dir, settings, engine);

        let history = history_with_turns(30);
        let outcome = compactor.compact(&history).await.unwrap();

        assert_eq!(outcome.entries_archived, 10);
        assert_eq!(outcome.retained.len(), 20);
        assert_eq!(outcome.retained, history.entries[10..].to_vec());
        assert_archive_filename(&outcome.archive_path);

        // Arithmetic invariant: nothing dropped.
        assert_eq!(
            outcome.entries_archived + outcome.retained.len(),
            history.len()
        );
    }

    #[tokio::test]
    async fn test_archive_document_shape() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(2)
            .with_target_retained_char_count(1_000_000);
        let engine = Arc::new(ScriptedEngine::new());
        let compactor = compactor_with(&dir, settings, engine);

        let history = history_with_turns(6);
        let outcome = compactor.compact(&history).await.unwrap();

        let document = std::fs::read_to_string(&outcome.archive_path).unwrap();
        assert!(document.starts_with("---\n"));
        assert!(document.contains("archived_at: "));
        assert!(document.contains("date_range:"));
        assert!(document.contains("entry_count: 4"));
        assert!(document.contains("# Archived Adventure History"));
        assert!(document.contains("## Player Input"));
        assert!(document.contains("## GM Response"));
        // Chronological: oldest archived entry appears before the next.
        let first = document.find("action 0").unwrap();
        let second = document.find("narration 1").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn test_not_enough_entries_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new().with_retained_count(20);
        let compactor = compactor_with(&dir, settings, Arc::new(ScriptedEngine::new()));

        let history = history_with_turns(20);
        let result = compactor.compact(&history).await;
        assert!(matches!(result, Err(CompactError::NotEnoughEntries)));
        assert!(!result.unwrap_err().retryable());

        // No archive directory, no files.
        assert!(!dir.path().join("history").exists());
    }

    #[tokio::test]
    async fn test_char_budget_limits_retention() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(10)
            .with_target_retained_char_count(25);
        let engine = Arc::new(ScriptedEngine::new());
        let compactor = compactor_with(&dir, settings, engine);

        // Each entry is 10 chars; budget admits two, third would exceed.
        let mut history = NarrativeHistory::new();
        for i in 0..6 {
            history.push(NarrativeEntry::player(format!("entry-{i:04}")));
        }
        let outcome = compactor.compact(&history).await.unwrap();
        assert_eq!(outcome.retained.len(), 2);
        assert_eq!(outcome.entries_archived, 4);
        assert_eq!(outcome.retained[1].content, "entry-0005");
    }

    #[tokio::test]
    async fn test_always_retains_one_oversized_entry() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(5)
            .with_target_retained_char_count(10);
        let engine = Arc::new(ScriptedEngine::new());
        let compactor = compactor_with(&dir, settings, engine);

        let mut history = NarrativeHistory::new();
        history.push(NarrativeEntry::player("old"));
        history.push(NarrativeEntry::gm("z".repeat(500)));

        let outcome = compactor.compact(&history).await.unwrap();
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.entries_archived, 1);
    }

    #[tokio::test]
    async fn test_retain_nothing_archives_everything() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(0)
            .with_target_retained_char_count(0);
        let engine = Arc::new(ScriptedEngine::new());
        let compactor = compactor_with(&dir, settings, engine);

        let history = history_with_turns(8);
        let outcome = compactor.compact(&history).await.unwrap();
        assert_eq!(outcome.entries_archived, 8);
        assert!(outcome.retained.is_empty());

        let replacement = outcome.replacement_history();
        assert!(replacement.entries.is_empty());
        assert!(replacement.summary.is_some());
    }

    #[tokio::test]
    async fn test_summary_chaining() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(2)
            .with_target_retained_char_count(1_000_000)
            .with_model("gm-summarizer");
        let engine = Arc::new(ScriptedEngine::new());
        engine.queue_summary("They reached the coast.");
        let compactor = compactor_with(&dir, settings, engine.clone());

        let mut history = history_with_turns(6);
        history.summary = Some(Summary {
            text: "They left the capital.".to_string(),
            generated_at: Utc::now(),
            model: "gm-summarizer".to_string(),
            entries_archived: 12,
            date_range: DateRange {
                from: Utc::now(),
                to: Utc::now(),
            },
        });

        let outcome = compactor.compact(&history).await.unwrap();
        assert_eq!(outcome.summary.text, "They reached the coast.");
        assert_eq!(outcome.summary.model, "gm-summarizer");

        let requests = engine.summary_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].previous_summary.as_deref(),
            Some("They left the capital.")
        );
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_no_archive() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(2)
            .with_target_retained_char_count(1_000_000);
        let engine = Arc::new(ScriptedEngine::new());
        engine.queue_summary_failure(EngineError::Timeout { seconds: 30 });
        let compactor = compactor_with(&dir, settings, engine);

        let history = history_with_turns(6);
        let result = compactor.compact(&history).await;
        assert!(matches!(result, Err(CompactError::Engine(_))));
        assert!(result.unwrap_err().retryable());

        // Staged archive rolled back; nothing committed.
        let files: Vec<_> = std::fs::read_dir(dir.path().join("history"))
            .unwrap()
            .collect();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_compactions_one_winner() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::new()
            .with_retained_count(2)
            .with_target_retained_char_count(1_000_000);
        let engine =
            Arc::new(ScriptedEngine::new().with_summary_delay(Duration::from_millis(50)));
        let compactor = compactor_with(&dir, settings, engine);

        let history = history_with_turns(6);
        let (first, second) = tokio::join!(compactor.compact(&history), compactor.compact(&history));

        let outcomes = [first, second];
        let successes = outcomes.iter().filter(|r| r.is_ok()).count();
        let busy = outcomes
            .iter()
            .filter(|r| matches!(r, Err(CompactError::AlreadyInProgress)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(busy, 1);
    }
}
