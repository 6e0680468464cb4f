//! Narrative engine boundary for the Saga text adventure.
//!
//! This crate defines the seam between the session layer and whatever
//! AI backend generates Game Master prose:
//! - The [`NarrativeEngine`] trait with streamed chunk output
//! - The fixed [`GameHooks`] side-effect interface the engine may invoke
//!   while generating (theme changes, dice, combat, NPC/inventory/panel
//!   updates)
//! - An error taxonomy with `retryable` classification
//! - A scripted mock engine for deterministic tests (see [`mock`])

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::Stream;

pub mod mock;

pub use mock::{HookCall, ScriptedEngine, ScriptedResponse, ScriptedTurn};

/// Errors that can occur when talking to a narrative engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("rate limited by the model provider")]
    RateLimited,

    #[error("model provider error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("engine call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("failed to parse engine output: {0}")]
    Parse(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("game hook '{name}' failed: {detail}")]
    Hook { name: String, detail: String },
}

impl EngineError {
    /// Whether the caller may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited
                | EngineError::Server { .. }
                | EngineError::Timeout { .. }
        )
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A request for one streamed Game Master response.
#[derive(Debug, Clone)]
pub struct NarrateRequest {
    /// The player input, possibly wrapped in recovery context.
    pub input: String,

    /// System prompt establishing the Game Master persona.
    pub system_prompt: Option<String>,

    /// Model override (engines have their own default).
    pub model: Option<String>,
}

impl NarrateRequest {
    /// Create a request for the given player input.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            system_prompt: None,
            model: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A request to condense an archived transcript span into a continuity
/// summary.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    /// The archived transcript, oldest entry first.
    pub transcript: String,

    /// The previous summary, if one exists. Engines must fold this into
    /// the new summary so continuity survives repeated compactions.
    pub previous_summary: Option<String>,

    /// Model override.
    pub model: Option<String>,
}

impl SummaryRequest {
    /// Create a summary request for the given transcript.
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            previous_summary: None,
            model: None,
        }
    }

    pub fn with_previous_summary(mut self, summary: impl Into<String>) -> Self {
        self.previous_summary = Some(summary.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

// ============================================================================
// Side-effect hooks
// ============================================================================

/// A mood/genre/region change emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeUpdate {
    pub mood: String,
    pub genre: String,
    pub region: String,
    pub background_url: Option<String>,
}

impl ThemeUpdate {
    /// Create a theme update with no background image.
    pub fn new(
        mood: impl Into<String>,
        genre: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            mood: mood.into(),
            genre: genre.into(),
            region: region.into(),
            background_url: None,
        }
    }
}

/// A combat-management directive from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatDirective {
    /// Begin combat with the named combatants in initiative order.
    Start { combatants: Vec<String> },
    /// Advance to the next combatant's turn.
    Advance,
    /// End the current combat.
    End,
}

/// Create/update/delete, shared by the CRUD hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudAction {
    Create,
    Update,
    Delete,
}

/// An NPC record change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcUpdate {
    pub name: String,
    pub action: CrudAction,
    /// Free-form attributes (disposition, description, location).
    pub details: Option<serde_json::Value>,
}

/// An inventory change for the player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub item: String,
    pub action: CrudAction,
    pub quantity: i32,
}

/// A UI panel change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelUpdate {
    pub panel: String,
    pub action: CrudAction,
    pub content: Option<String>,
}

/// Error from a game-mechanic hook.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HookError(pub String);

/// The fixed set of side-effect handlers an engine may invoke while
/// generating. These are the only channel through which the engine
/// mutates structured game state.
///
/// Handlers are synchronous: the engine calls them inline between (or
/// before) emitting text chunks, and the session layer guarantees they
/// never block on I/O.
pub trait GameHooks: Send + Sync {
    /// Mood/genre/region changed; the session layer decides whether to
    /// propagate (it debounces repeats).
    fn theme_change(&self, update: ThemeUpdate);

    /// Roll dice in standard notation ("2d6+3"); returns a result line
    /// for the engine to narrate.
    fn roll_dice(&self, notation: &str) -> Result<String, HookError>;

    /// Start/advance/end combat.
    fn combat_action(&self, directive: CombatDirective) -> Result<String, HookError>;

    fn update_npc(&self, update: NpcUpdate) -> Result<String, HookError>;

    fn update_inventory(&self, update: InventoryUpdate) -> Result<String, HookError>;

    fn update_panel(&self, update: PanelUpdate) -> Result<String, HookError>;
}

/// The deterministic game-mechanic tools behind the hooks.
///
/// The session layer implements [`GameHooks`] itself (so it can debounce
/// theme changes and emit protocol messages) and forwards everything
/// mechanical to one of these.
pub trait GameTools: Send + Sync {
    fn roll_dice(&self, notation: &str) -> Result<String, HookError>;
    fn combat_action(&self, directive: CombatDirective) -> Result<String, HookError>;
    fn update_npc(&self, update: NpcUpdate) -> Result<String, HookError>;
    fn update_inventory(&self, update: InventoryUpdate) -> Result<String, HookError>;
    fn update_panel(&self, update: PanelUpdate) -> Result<String, HookError>;
}

/// Tools that acknowledge every call without touching any state.
///
/// Useful for tests and for adventures that run pure narration.
pub struct NoopTools;

impl GameTools for NoopTools {
    fn roll_dice(&self, notation: &str) -> Result<String, HookError> {
        Ok(format!("rolled {notation}"))
    }

    fn combat_action(&self, directive: CombatDirective) -> Result<String, HookError> {
        Ok(format!("combat: {directive:?}"))
    }

    fn update_npc(&self, update: NpcUpdate) -> Result<String, HookError> {
        Ok(format!("npc {} {:?}", update.name, update.action))
    }

    fn update_inventory(&self, update: InventoryUpdate) -> Result<String, HookError> {
        Ok(format!("inventory {} {:?}", update.item, update.action))
    }

    fn update_panel(&self, update: PanelUpdate) -> Result<String, HookError> {
        Ok(format!("panel {} {:?}", update.panel, update.action))
    }
}

// ============================================================================
// The engine trait
// ============================================================================

/// An ordered stream of response text chunks.
///
/// Chunk order is the engine's emission order; consumers must pass it
/// through without buffering or reordering.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// A narrative engine: generates Game Master prose as a chunk stream and
/// condenses archived transcript spans into continuity summaries.
#[async_trait]
pub trait NarrativeEngine: Send + Sync {
    /// Generate one streamed response to a player input. The engine may
    /// invoke `hooks` synchronously during generation.
    async fn narrate(
        &self,
        request: NarrateRequest,
        hooks: Arc<dyn GameHooks>,
    ) -> Result<ChunkStream, EngineError>;

    /// Generate a continuity summary of an archived transcript span.
    async fn summarize(&self, request: SummaryRequest) -> Result<String, EngineError>;
}
