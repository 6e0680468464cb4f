//! Per-adventure session orchestration.
//!
//! A [`SessionController`] owns one adventure's live transcript and a
//! FIFO queue of player inputs. The caller that flips the session from
//! idle claims the drain loop and works the queue to completion: each
//! input becomes one correlated streaming cycle
//! (`gm_response_start` / `gm_response_chunk`* / `gm_response_end`),
//! the turn is persisted before the next input starts, and a failure on
//! one input becomes a single `error` message without stopping the
//! loop.
//!
//! Queue bookkeeping (enqueue, dequeue, busy flag) happens under a
//! synchronous mutex and never awaits, so concurrent `handle_input`
//! callers cannot interleave or drop inputs.

use crate::compactor::{CompactError, CompactionOutcome, HistoryCompactor};
use crate::config::Settings;
use crate::context::{build_recovery_context, build_recovery_prompt, RecoveryOptions};
use crate::history::{NarrativeEntry, NarrativeHistory};
use crate::protocol::{ErrorCode, ServerMessage, ToolState};
use crate::store::{AdventureState, HistoryStore, StoreError};
use futures::StreamExt;
use narrator::{
    CombatDirective, EngineError, GameHooks, GameTools, HookError, InventoryUpdate,
    NarrateRequest, NarrativeEngine, NpcUpdate, PanelUpdate, ThemeUpdate,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use uuid::Uuid;

/// Repeated theme changes with the same mood inside this window are
/// suppressed; they trigger expensive background image generation.
const THEME_DEBOUNCE: Duration = Duration::from_secs(1);

const GM_SYSTEM_PROMPT: &str = "You are the Game Master of an ongoing text adventure. \
Narrate vividly in second person, keep continuity with everything established so far, \
and use the provided game tools for dice, combat, and record keeping instead of \
inventing outcomes.";

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("narrative engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Compaction(#[from] CompactError),
}

impl SessionError {
    /// Map to the sanitized error payload sent to the client. Technical
    /// detail stays in the logs.
    pub fn to_protocol(&self) -> ServerMessage {
        let (code, message, retryable) = match self {
            SessionError::Store(StoreError::NotFound { .. }) => (
                ErrorCode::NotFound,
                "This adventure could not be found.",
                false,
            ),
            SessionError::Store(StoreError::InvalidToken { .. }) => (
                ErrorCode::InvalidToken,
                "Your session token is not valid for this adventure.",
                false,
            ),
            SessionError::Store(StoreError::Corrupted { .. }) => (
                ErrorCode::Corrupted,
                "The saved adventure could not be read.",
                false,
            ),
            SessionError::Store(StoreError::Environment(_)) => (
                ErrorCode::Environment,
                "Adventure storage is not available.",
                false,
            ),
            SessionError::Store(StoreError::Io(_)) => (
                ErrorCode::StorageFailure,
                "Saving the adventure failed. Your last turn may not be recorded.",
                true,
            ),
            SessionError::Engine(EngineError::RateLimited) => (
                ErrorCode::RateLimited,
                "The Game Master is catching their breath. Try again in a moment.",
                true,
            ),
            SessionError::Engine(EngineError::Timeout { .. }) => (
                ErrorCode::EngineTimeout,
                "The Game Master took too long to respond. Try again.",
                true,
            ),
            SessionError::Engine(EngineError::Server { .. }) => (
                ErrorCode::EngineFailure,
                "The Game Master ran into trouble. Try again.",
                true,
            ),
            SessionError::Engine(EngineError::Parse(_))
            | SessionError::Engine(EngineError::Config(_)) => (
                ErrorCode::EngineFailure,
                "The Game Master's response could not be understood.",
                false,
            ),
            SessionError::Engine(EngineError::Hook { .. }) => (
                ErrorCode::ToolFailure,
                "A game tool failed while resolving your action.",
                false,
            ),
            SessionError::Compaction(CompactError::AlreadyInProgress) => (
                ErrorCode::CompactionInProgress,
                "The chronicle is already being archived.",
                true,
            ),
            SessionError::Compaction(CompactError::NotEnoughEntries) => (
                ErrorCode::NotEnoughEntries,
                "There is not enough history to archive yet.",
                false,
            ),
            SessionError::Compaction(CompactError::Io(_)) => (
                ErrorCode::StorageFailure,
                "Archiving the chronicle failed.",
                true,
            ),
            SessionError::Compaction(CompactError::Engine(err)) => (
                ErrorCode::EngineFailure,
                "Summarizing the chronicle failed.",
                err.retryable(),
            ),
        };
        ServerMessage::Error {
            code,
            message: message.to_string(),
            retryable,
        }
    }
}

/// Queue bookkeeping. Touched only under a synchronous lock.
struct QueueState {
    queue: VecDeque<String>,
    processing: bool,
}

/// The per-adventure session controller.
pub struct SessionController {
    store: Arc<dyn HistoryStore>,
    engine: Arc<dyn NarrativeEngine>,
    settings: Settings,
    state: Mutex<AdventureState>,
    history: tokio::sync::Mutex<NarrativeHistory>,
    inner: Mutex<QueueState>,
    hooks: Arc<SessionHooks>,
    outbound: UnboundedSender<ServerMessage>,
    /// Set when the session resumed with prior history; the first input
    /// processed gets wrapped in recovery context, then cleared.
    pending_recovery: AtomicBool,
}

impl SessionController {
    /// Load an adventure and build its session.
    ///
    /// Fails with the store's distinct error categories (not found,
    /// invalid token, corrupted, environment) and has no side effects
    /// on failure.
    pub async fn initialize(
        store: Arc<dyn HistoryStore>,
        engine: Arc<dyn NarrativeEngine>,
        tools: Arc<dyn GameTools>,
        settings: Settings,
        adventure_id: &str,
        token: &str,
        outbound: UnboundedSender<ServerMessage>,
    ) -> Result<Self, SessionError> {
        let (state, history) = store.load(adventure_id, token).await?;
        let resumed = !history.entries.is_empty() || history.summary.is_some();

        let hooks = Arc::new(SessionHooks {
            outbound: outbound.clone(),
            tools,
            last_theme: Mutex::new(None),
        });

        Ok(Self {
            store,
            engine,
            settings,
            state: Mutex::new(state),
            history: tokio::sync::Mutex::new(history),
            inner: Mutex::new(QueueState {
                queue: VecDeque::new(),
                processing: false,
            }),
            hooks,
            outbound,
            pending_recovery: AtomicBool::new(resumed),
        })
    }

    /// Enqueue a player input; if the session is idle, claim the drain
    /// loop and run the queue to completion.
    ///
    /// Inputs submitted concurrently are never dropped or reordered:
    /// submission order is processing order, and no two inputs are ever
    /// processed at once.
    pub async fn handle_input(&self, text: impl Into<String>) {
        let claimed = {
            let mut inner = lock(&self.inner);
            inner.queue.push_back(text.into());
            if inner.processing {
                false
            } else {
                inner.processing = true;
                true
            }
        };
        if claimed {
            self.drain().await;
        }
    }

    async fn drain(&self) {
        loop {
            let next = {
                let mut inner = lock(&self.inner);
                match inner.queue.pop_front() {
                    Some(text) => Some(text),
                    None => {
                        inner.processing = false;
                        // Emitted under the lock so a newly claimed
                        // cycle cannot slip a start in front of it.
                        let _ = self
                            .outbound
                            .send(ServerMessage::ToolStatus {
                                state: ToolState::Idle,
                            });
                        None
                    }
                }
            };
            let Some(text) = next else { break };

            if let Err(err) = self.process_one(text).await {
                tracing::warn!(error = %err, "input processing failed");
                self.send(err.to_protocol());
            }
        }
    }

    /// Run one full cycle for one input: recovery wrapping, streaming,
    /// then persistence of both sides of the turn.
    async fn process_one(&self, text: String) -> Result<(), SessionError> {
        let prompt = if self.pending_recovery.swap(false, Ordering::SeqCst) {
            let history = self.history.lock().await;
            let context = build_recovery_context(&history, &RecoveryOptions::default());
            build_recovery_prompt(&text, &context)
        } else {
            text.clone()
        };

        let request = NarrateRequest::new(prompt)
            .with_system(self.system_prompt())
            .with_model(self.settings.model.clone());

        // Start is only emitted once the engine has accepted the
        // request, so every start is matched by exactly one end.
        let mut stream = self
            .engine
            .narrate(request, self.hooks.clone() as Arc<dyn GameHooks>)
            .await?;

        let message_id = Uuid::new_v4();
        self.send(ServerMessage::GmResponseStart { message_id });

        let mut narrative = String::new();
        let mut stream_error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    narrative.push_str(&chunk);
                    self.send(ServerMessage::GmResponseChunk {
                        message_id,
                        text: chunk,
                    });
                }
                Err(err) => {
                    stream_error = Some(err);
                    break;
                }
            }
        }
        self.send(ServerMessage::GmResponseEnd { message_id });

        if let Some(err) = stream_error {
            return Err(err.into());
        }

        // Persist both sides of the turn before the next input starts.
        let mut history = self.history.lock().await;
        history.push(NarrativeEntry::player(text));
        history.push(NarrativeEntry::gm(narrative));
        let state = lock(&self.state).clone();
        self.store.save(&state, &history).await?;

        Ok(())
    }

    /// Whether the transcript has grown past the compaction threshold.
    pub async fn should_compact(&self, compactor: &HistoryCompactor) -> bool {
        let history = self.history.lock().await;
        compactor.should_compact(&history)
    }

    /// Compact the transcript and commit the replacement history.
    ///
    /// The history lock is held for the duration, so the drain loop
    /// cannot append between the snapshot and the swap; archive write
    /// and history replacement commit together or not at all.
    pub async fn compact_history(
        &self,
        compactor: &HistoryCompactor,
    ) -> Result<CompactionOutcome, SessionError> {
        let mut history = self.history.lock().await;
        let outcome = compactor.compact(&history).await?;
        *history = outcome.replacement_history();
        let state = lock(&self.state).clone();
        self.store.save(&state, &history).await?;
        Ok(outcome)
    }

    /// Snapshot of the live transcript.
    pub async fn history(&self) -> NarrativeHistory {
        self.history.lock().await.clone()
    }

    /// Snapshot of the adventure state.
    pub fn state(&self) -> AdventureState {
        lock(&self.state).clone()
    }

    pub fn adventure_id(&self) -> String {
        lock(&self.state).id.clone()
    }

    /// Whether a drain loop is currently running.
    pub fn is_processing(&self) -> bool {
        lock(&self.inner).processing
    }

    /// Inputs waiting behind the one being processed.
    pub fn queued(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    fn system_prompt(&self) -> String {
        let title = lock(&self.state).title.clone();
        format!("{GM_SYSTEM_PROMPT}\n\nCurrent adventure: {title}")
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("client disconnected; dropping protocol message");
        }
    }
}

/// The controller's implementation of the engine-facing hooks: theme
/// changes are debounced here, everything mechanical is forwarded to
/// the injected game tools.
struct SessionHooks {
    outbound: UnboundedSender<ServerMessage>,
    tools: Arc<dyn GameTools>,
    last_theme: Mutex<Option<(String, Instant)>>,
}

impl GameHooks for SessionHooks {
    fn theme_change(&self, update: ThemeUpdate) {
        let now = Instant::now();
        let mut last = lock(&self.last_theme);
        if let Some((mood, at)) = &*last {
            if *mood == update.mood && now.duration_since(*at) < THEME_DEBOUNCE {
                tracing::debug!(mood = %update.mood, "suppressed repeated theme change");
                return;
            }
        }
        *last = Some((update.mood.clone(), now));
        drop(last);

        if self
            .outbound
            .send(ServerMessage::ThemeChange {
                mood: update.mood,
                genre: update.genre,
                region: update.region,
                background_url: update.background_url,
            })
            .is_err()
        {
            tracing::debug!("client disconnected; dropping theme change");
        }
    }

    fn roll_dice(&self, notation: &str) -> Result<String, HookError> {
        self.tools.roll_dice(notation)
    }

    fn combat_action(&self, directive: CombatDirective) -> Result<String, HookError> {
        self.tools.combat_action(directive)
    }

    fn update_npc(&self, update: NpcUpdate) -> Result<String, HookError> {
        self.tools.update_npc(update)
    }

    fn update_inventory(&self, update: InventoryUpdate) -> Result<String, HookError> {
        self.tools.update_inventory(update)
    }

    fn update_panel(&self, update: PanelUpdate) -> Result<String, HookError> {
        self.tools.update_panel(update)
    }
}

/// Lock a std mutex, recovering the data from a poisoned lock rather
/// than propagating the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
