//! QA tests for history compaction through the session controller.
//!
//! These tests verify the full archive-and-summarize flow:
//! - Live transcript shrinks to the retained window plus a summary
//! - Archive files land under the adventure's history directory
//! - A second compaction chains onto the first summary
//! - Recovery context picks up the summary after compaction
//!
//! Run with: `cargo test -p saga-core --test qa_compaction`

use narrator::{NoopTools, ScriptedEngine, ScriptedResponse};
use saga_core::{
    FileStore, HistoryCompactor, HistoryStore, SessionController, Settings,
};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    session: SessionController,
    engine: Arc<ScriptedEngine>,
    compactor: HistoryCompactor,
    store: Arc<FileStore>,
    adventure_id: String,
}

async fn fixture(dir: &TempDir, settings: Settings) -> Fixture {
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let state = store.create("The Ashen Road").await.unwrap();
    let engine = Arc::new(ScriptedEngine::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = SessionController::initialize(
        store.clone(),
        engine.clone(),
        Arc::new(NoopTools),
        settings.clone(),
        &state.id,
        &state.token,
        tx,
    )
    .await
    .unwrap();
    let compactor =
        HistoryCompactor::new(settings, engine.clone(), store.archive_dir(&state.id));
    Fixture {
        session,
        engine,
        compactor,
        store,
        adventure_id: state.id,
    }
}

async fn play_turns(fixture: &Fixture, count: usize) {
    for i in 0..count {
        fixture
            .engine
            .queue_response(ScriptedResponse::narrative(format!("The road turns, {i}.")));
        fixture.session.handle_input(format!("I walk on, {i}")).await;
    }
}

#[tokio::test]
async fn test_compaction_trims_live_history_and_writes_archive() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::new()
        .with_retained_count(4)
        .with_target_retained_char_count(1_000_000)
        .with_compaction_threshold_chars(50);
    let fixture = fixture(&dir, settings).await;

    play_turns(&fixture, 5).await; // 10 entries
    assert!(fixture.session.should_compact(&fixture.compactor).await);

    fixture.engine.queue_summary("Five turns on the ashen road.");
    let outcome = fixture
        .session
        .compact_history(&fixture.compactor)
        .await
        .unwrap();

    assert_eq!(outcome.entries_archived, 6);
    assert_eq!(outcome.retained.len(), 4);

    // The live transcript is now window plus summary.
    let history = fixture.session.history().await;
    assert_eq!(history.len(), 4);
    let summary = history.summary.as_ref().unwrap();
    assert_eq!(summary.text, "Five turns on the ashen road.");
    assert_eq!(summary.entries_archived, 6);

    // The archive landed under the adventure's history directory.
    assert!(outcome.archive_path.exists());
    assert!(outcome
        .archive_path
        .starts_with(fixture.store.archive_dir(&fixture.adventure_id)));
    let document = std::fs::read_to_string(&outcome.archive_path).unwrap();
    assert!(document.contains("I walk on, 0"));
    assert!(!document.contains("I walk on, 4"));

    // The trimmed history was persisted, not just swapped in memory.
    let (_, reloaded) = fixture
        .store
        .load(&fixture.adventure_id, &fixture.session.state().token)
        .await
        .unwrap();
    assert_eq!(reloaded.len(), 4);
    assert!(reloaded.summary.is_some());
}

#[tokio::test]
async fn test_second_compaction_chains_onto_the_first_summary() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::new()
        .with_retained_count(2)
        .with_target_retained_char_count(1_000_000)
        .with_compaction_threshold_chars(10);
    let fixture = fixture(&dir, settings).await;

    play_turns(&fixture, 3).await;
    fixture.engine.queue_summary("Chapter one.");
    fixture
        .session
        .compact_history(&fixture.compactor)
        .await
        .unwrap();

    play_turns(&fixture, 3).await;
    fixture.engine.queue_summary("Chapter one, then chapter two.");
    fixture
        .session
        .compact_history(&fixture.compactor)
        .await
        .unwrap();

    // The second summarization saw the first summary.
    let requests = fixture.engine.summary_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].previous_summary, None);
    assert_eq!(requests[1].previous_summary.as_deref(), Some("Chapter one."));

    let history = fixture.session.history().await;
    assert_eq!(
        history.summary.as_ref().unwrap().text,
        "Chapter one, then chapter two."
    );

    // Two immutable archives on disk.
    let archives = std::fs::read_dir(fixture.store.archive_dir(&fixture.adventure_id))
        .unwrap()
        .count();
    assert_eq!(archives, 2);
}

#[tokio::test]
async fn test_recovery_context_carries_the_summary_after_compaction() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::new()
        .with_retained_count(2)
        .with_target_retained_char_count(1_000_000)
        .with_compaction_threshold_chars(10);
    let fixture = fixture(&dir, settings.clone()).await;

    play_turns(&fixture, 4).await;
    fixture
        .engine
        .queue_summary("The party crossed the ash fields.");
    fixture
        .session
        .compact_history(&fixture.compactor)
        .await
        .unwrap();

    // Reconnect: a new session over the same adventure.
    let engine = Arc::new(ScriptedEngine::new());
    engine.queue_response(ScriptedResponse::narrative("The fields are behind you."));
    let (tx, _rx) = mpsc::unbounded_channel();
    let session = SessionController::initialize(
        fixture.store.clone(),
        engine.clone(),
        Arc::new(NoopTools),
        settings,
        &fixture.adventure_id,
        &fixture.session.state().token,
        tx,
    )
    .await
    .unwrap();

    session.handle_input("Where am I?").await;

    let requests = engine.narrate_requests();
    let prompt = &requests[0].input;
    assert!(prompt.contains("## Previous Adventure Summary"));
    assert!(prompt.contains("The party crossed the ash fields."));
    // Retained window entries appear after the summary block.
    assert!(prompt.contains("## Recent Exchanges"));
    assert!(prompt.contains("I walk on, 3"));
    // Archived-only entries are not replayed verbatim.
    assert!(!prompt.contains("I walk on, 0"));
}
