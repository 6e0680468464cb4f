//! Recovery-context assembly for session resumption.
//!
//! After a reconnect the Narrative Engine has lost the conversation, so
//! the first input is wrapped with a bounded reconstruction of recent
//! play: the stored summary (if any) plus the latest exchanges. During
//! continuous play the wrapping is a no-op.

use crate::history::{EntryKind, NarrativeHistory};

/// Per-entry character cap before an entry is truncated with an
/// ellipsis marker.
const ENTRY_TRUNCATE_CHARS: usize = 500;

/// Limits for recovery-context assembly.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Most recent entries to include.
    pub max_entries: usize,
    /// Hard cap on the assembled context, in characters.
    pub max_chars: usize,
    /// Include the stored summary section when present.
    pub include_summary: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            max_entries: 20,
            max_chars: 12_000,
            include_summary: true,
        }
    }
}

/// An assembled recovery context.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryContext {
    pub context_prompt: String,
    pub entries_included: usize,
    pub has_summary: bool,
}

/// Assemble a size-bounded recovery context from a transcript.
///
/// Chronological order: summary first, then the most recent
/// `max_entries` entries as Player / Game Master turns. The whole
/// string is hard-capped at `max_chars` by dropping the oldest included
/// turns until it fits.
pub fn build_recovery_context(
    history: &NarrativeHistory,
    options: &RecoveryOptions,
) -> RecoveryContext {
    if history.is_empty() {
        return RecoveryContext {
            context_prompt: String::new(),
            entries_included: 0,
            has_summary: false,
        };
    }

    let summary_block = match (&history.summary, options.include_summary) {
        (Some(summary), true) => Some(format!(
            "## Previous Adventure Summary\n\n{}",
            summary.text
        )),
        _ => None,
    };

    let start = history.entries.len().saturating_sub(options.max_entries);
    let mut turns: Vec<String> = history.entries[start..]
        .iter()
        .map(|entry| {
            let speaker = match entry.kind {
                EntryKind::PlayerInput => "**Player**",
                EntryKind::GmResponse => "**Game Master**",
            };
            format!("{speaker}: {}", truncate_entry(&entry.content))
        })
        .collect();

    let mut prompt = assemble(&summary_block, &turns);
    while char_len(&prompt) > options.max_chars && !turns.is_empty() {
        turns.remove(0);
        prompt = assemble(&summary_block, &turns);
    }
    if char_len(&prompt) > options.max_chars {
        prompt = prompt.chars().take(options.max_chars).collect();
    }

    RecoveryContext {
        entries_included: turns.len(),
        has_summary: summary_block.is_some(),
        context_prompt: prompt,
    }
}

/// Wrap a fresh player input with recovery context.
///
/// With an empty context the input passes through unchanged, so
/// continuous play pays nothing for this call.
pub fn build_recovery_prompt(current_input: &str, context: &RecoveryContext) -> String {
    if context.context_prompt.is_empty() {
        return current_input.to_string();
    }
    format!(
        "[SESSION RECOVERY - the player has reconnected; the context below restores the story so far]\n\n{}\n\n---\n\n{}",
        context.context_prompt, current_input
    )
}

fn assemble(summary_block: &Option<String>, turns: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(block) = summary_block {
        parts.push(block.clone());
    }
    if !turns.is_empty() {
        parts.push(format!("## Recent Exchanges\n\n{}", turns.join("\n\n")));
    }
    parts.join("\n\n")
}

fn truncate_entry(content: &str) -> String {
    if char_len(content) <= ENTRY_TRUNCATE_CHARS {
        return content.to_string();
    }
    let truncated: String = content.chars().take(ENTRY_TRUNCATE_CHARS).collect();
    format!("{truncated}...")
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
