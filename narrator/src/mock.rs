//! Scripted mock engine for deterministic testing.
//!
//! `ScriptedEngine` plays back queued responses without any network
//! access, chunking narrative text the way a streaming backend would and
//! invoking game hooks inline during "generation". Session-layer tests
//! and the mock-mode configuration flag both use it.

use crate::{
    ChunkStream, CombatDirective, EngineError, GameHooks, InventoryUpdate, NarrateRequest,
    NarrativeEngine, NpcUpdate, PanelUpdate, SummaryRequest, ThemeUpdate,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default chunk width in characters.
const DEFAULT_CHUNK_CHARS: usize = 24;

/// A hook invocation scripted to fire during one response.
#[derive(Debug, Clone)]
pub enum HookCall {
    Theme(ThemeUpdate),
    Dice(String),
    Combat(CombatDirective),
    Npc(NpcUpdate),
    Inventory(InventoryUpdate),
    Panel(PanelUpdate),
}

/// A scripted response: narrative text plus the hooks fired while
/// generating it.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub narrative: String,
    pub hook_calls: Vec<HookCall>,
}

impl ScriptedResponse {
    /// A plain narrative response with no side effects.
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            narrative: text.into(),
            hook_calls: Vec::new(),
        }
    }

    /// A response that fires the given hooks before streaming text.
    pub fn with_hooks(text: impl Into<String>, hook_calls: Vec<HookCall>) -> Self {
        Self {
            narrative: text.into(),
            hook_calls,
        }
    }
}

/// One scripted engine turn: either a response or an injected failure.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Respond(ScriptedResponse),
    Fail(EngineError),
}

/// A narrative engine that returns scripted responses in order.
pub struct ScriptedEngine {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    summaries: Mutex<VecDeque<Result<String, EngineError>>>,
    narrate_requests: Mutex<Vec<NarrateRequest>>,
    summary_requests: Mutex<Vec<SummaryRequest>>,
    chunk_chars: usize,
    summary_delay: Option<Duration>,
}

impl ScriptedEngine {
    /// Create an engine with an empty script.
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            narrate_requests: Mutex::new(Vec::new()),
            summary_requests: Mutex::new(Vec::new()),
            chunk_chars: DEFAULT_CHUNK_CHARS,
            summary_delay: None,
        }
    }

    /// Set the streamed chunk width in characters.
    pub fn with_chunk_chars(mut self, chars: usize) -> Self {
        self.chunk_chars = chars.max(1);
        self
    }

    /// Delay summary generation, to exercise races around compaction.
    pub fn with_summary_delay(mut self, delay: Duration) -> Self {
        self.summary_delay = Some(delay);
        self
    }

    /// Queue a scripted response.
    pub fn queue_response(&self, response: ScriptedResponse) {
        lock(&self.turns).push_back(ScriptedTurn::Respond(response));
    }

    /// Queue a failure for the next narrate call.
    pub fn queue_failure(&self, error: EngineError) {
        lock(&self.turns).push_back(ScriptedTurn::Fail(error));
    }

    /// Queue a summary for the next summarize call.
    pub fn queue_summary(&self, text: impl Into<String>) {
        lock(&self.summaries).push_back(Ok(text.into()));
    }

    /// Queue a failure for the next summarize call.
    pub fn queue_summary_failure(&self, error: EngineError) {
        lock(&self.summaries).push_back(Err(error));
    }

    /// All narrate requests seen so far, in order.
    pub fn narrate_requests(&self) -> Vec<NarrateRequest> {
        lock(&self.narrate_requests).clone()
    }

    /// All summary requests seen so far, in order.
    pub fn summary_requests(&self) -> Vec<SummaryRequest> {
        lock(&self.summary_requests).clone()
    }

    fn fire_hooks(
        &self,
        calls: &[HookCall],
        hooks: &Arc<dyn GameHooks>,
    ) -> Result<(), EngineError> {
        for call in calls {
            let outcome = match call {
                HookCall::Theme(update) => {
                    hooks.theme_change(update.clone());
                    Ok(String::new())
                }
                HookCall::Dice(notation) => hooks.roll_dice(notation),
                HookCall::Combat(directive) => hooks.combat_action(directive.clone()),
                HookCall::Npc(update) => hooks.update_npc(update.clone()),
                HookCall::Inventory(update) => hooks.update_inventory(update.clone()),
                HookCall::Panel(update) => hooks.update_panel(update.clone()),
            };
            if let Err(err) = outcome {
                return Err(EngineError::Hook {
                    name: hook_name(call).to_string(),
                    detail: err.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NarrativeEngine for ScriptedEngine {
    async fn narrate(
        &self,
        request: NarrateRequest,
        hooks: Arc<dyn GameHooks>,
    ) -> Result<ChunkStream, EngineError> {
        lock(&self.narrate_requests).push(request);

        let turn = lock(&self.turns).pop_front();
        let response = match turn {
            Some(ScriptedTurn::Respond(response)) => response,
            Some(ScriptedTurn::Fail(error)) => return Err(error),
            None => ScriptedResponse::narrative("The narrator has no more scripted responses."),
        };

        self.fire_hooks(&response.hook_calls, &hooks)?;

        let chunks = split_chunks(&response.narrative, self.chunk_chars);
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }

    async fn summarize(&self, request: SummaryRequest) -> Result<String, EngineError> {
        lock(&self.summary_requests).push(request);

        if let Some(delay) = self.summary_delay {
            tokio::time::sleep(delay).await;
        }

        match lock(&self.summaries).pop_front() {
            Some(result) => result,
            None => Ok("The story so far, condensed.".to_string()),
        }
    }
}

/// Lock a mutex, recovering from poisoning (scripts are test-only state).
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn hook_name(call: &HookCall) -> &'static str {
    match call {
        HookCall::Theme(_) => "theme_change",
        HookCall::Dice(_) => "roll_dice",
        HookCall::Combat(_) => "combat_action",
        HookCall::Npc(_) => "update_npc",
        HookCall::Inventory(_) => "update_inventory",
        HookCall::Panel(_) => "update_panel",
    }
}

/// Split text into fixed-width character chunks, preserving the whole
/// string when concatenated.
fn split_chunks(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.chars()
        .collect::<Vec<_>>()
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
