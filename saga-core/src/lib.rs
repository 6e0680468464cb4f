//! Session orchestration for an AI-narrated text adventure.
//!
//! This crate provides:
//! - Per-adventure session control with a FIFO input queue and
//!   correlated streaming responses
//! - History compaction: archival of old transcript entries to
//!   markdown plus a chained summary kept in live context
//! - Recovery-context assembly so a reconnecting player's first input
//!   restores the story for the engine
//! - File-backed persistence of adventure state and transcript
//!
//! # Quick Start
//!
//! ```ignore
//! use saga_core::{FileStore, SessionController, Settings};
//! use narrator::{NoopTools, ScriptedEngine};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(FileStore::open("./adventures")?);
//!     let state = store.create("The Hollow Crown").await?;
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let session = SessionController::initialize(
//!         store,
//!         Arc::new(ScriptedEngine::new()),
//!         Arc::new(NoopTools),
//!         Settings::from_env(),
//!         &state.id,
//!         &state.token,
//!         tx,
//!     )
//!     .await?;
//!
//!     session.handle_input("I look around the tavern").await;
//!     while let Ok(message) = rx.try_recv() {
//!         println!("{}", serde_json::to_string(&message)?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod compactor;
pub mod config;
pub mod context;
pub mod history;
pub mod protocol;
pub mod session;
pub mod store;

// Primary public API
pub use compactor::{CompactError, CompactionOutcome, HistoryCompactor};
pub use config::Settings;
pub use context::{build_recovery_context, build_recovery_prompt, RecoveryContext, RecoveryOptions};
pub use history::{DateRange, EntryId, EntryKind, NarrativeEntry, NarrativeHistory, Summary};
pub use protocol::{ErrorCode, ServerMessage, ToolState};
pub use session::{SessionController, SessionError};
pub use store::{AdventureState, FileStore, HistoryStore, StoreError};
