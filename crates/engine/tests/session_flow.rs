//! End-to-end session flows over fake device and network ports.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use engine::{
    AudioInput, AudioOutput, CaptureError, ContentError, ContentSupplier, EngineError,
    EngineState, PlaybackEnd, PlaybackError, PracticeEngine, RemoteSessionApi, RetryPolicy,
    ScoringClient, ScoringError, SessionHandle, SyncError,
};
use parrot_core::model::{
    ContentItem, ItemId, ItemKind, Level, ScoreReport, Session, SessionConfig, SessionMode,
    SyncStatus, TagId, UserResponse,
};
use parrot_core::phase::PhaseKind;
use parrot_core::time::fixed_clock;
use storage::repository::{HistoryFilter, InMemoryRepository, SessionStore, Storage};

// ─── Fakes ─────────────────────────────────────────────────────────────────────

/// Output whose plays finish instantly.
struct InstantOutput;

#[async_trait]
impl AudioOutput for InstantOutput {
    async fn play(&self, _source: &Url, _offset_ms: u64) -> Result<PlaybackEnd, PlaybackError> {
        Ok(PlaybackEnd::Finished)
    }

    async fn stop(&self) -> u64 {
        0
    }
}

/// Output that hangs on the first play and records requested offsets.
struct StallingOutput {
    offsets: Mutex<Vec<u64>>,
    stop_offset: u64,
}

#[async_trait]
impl AudioOutput for StallingOutput {
    async fn play(&self, _source: &Url, offset_ms: u64) -> Result<PlaybackEnd, PlaybackError> {
        let first = {
            let mut offsets = self.offsets.lock().unwrap();
            offsets.push(offset_ms);
            offsets.len() == 1
        };
        if first {
            std::future::pending::<()>().await;
        }
        Ok(PlaybackEnd::Finished)
    }

    async fn stop(&self) -> u64 {
        self.stop_offset
    }
}

/// Input that is never used (listen-only sessions).
struct NoInput;

#[async_trait]
impl AudioInput for NoInput {
    async fn begin(&self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError> {
        Err(CaptureError::PermissionDenied)
    }

    async fn end(&self) {}
}

/// Input yielding a fixed amount of audio, then closing the stream.
struct BurstInput {
    millis: u64,
}

#[async_trait]
impl AudioInput for BurstInput {
    async fn begin(&self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError> {
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(vec![0_u8; (self.millis * 32) as usize]);
        Ok(rx)
    }

    async fn end(&self) {}
}

/// Input that keeps the stream open until the device is stopped.
struct HoldOpenInput {
    begins: AtomicU32,
    senders: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

impl HoldOpenInput {
    fn new() -> Self {
        Self {
            begins: AtomicU32::new(0),
            senders: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AudioInput for HoldOpenInput {
    async fn begin(&self) -> Result<mpsc::Receiver<Vec<u8>>, CaptureError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(vec![0_u8; 500 * 32]);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn end(&self) {
        self.senders.lock().unwrap().clear();
    }
}

/// Scoring that works through a script of outcomes, front to back.
struct ScriptedScoring {
    outcomes: Mutex<Vec<Result<f64, ScoringError>>>,
}

impl ScriptedScoring {
    fn new(outcomes: Vec<Result<f64, ScoringError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
        }
    }
}

#[async_trait]
impl ScoringClient for ScriptedScoring {
    async fn score(
        &self,
        _audio: &[u8],
        reference_text: &str,
        _language: &str,
    ) -> Result<ScoreReport, ScoringError> {
        let next = self.outcomes.lock().unwrap().remove(0);
        let overall = next?;
        Ok(ScoreReport::new(reference_text, overall, None, None, None, Vec::new()).unwrap())
    }
}

/// Scoring that never answers; only the engine's timeout ends it.
struct HangingScoring;

#[async_trait]
impl ScoringClient for HangingScoring {
    async fn score(
        &self,
        _audio: &[u8],
        _reference_text: &str,
        _language: &str,
    ) -> Result<ScoreReport, ScoringError> {
        std::future::pending().await
    }
}

struct ScriptedRemote {
    fail: bool,
}

#[async_trait]
impl RemoteSessionApi for ScriptedRemote {
    async fn submit_session(&self, session: &Session) -> Result<String, SyncError> {
        if self.fail {
            Err(SyncError::HttpStatus(
                reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            ))
        } else {
            Ok(session.id().to_string())
        }
    }
}

struct FixedContent {
    items: Vec<ContentItem>,
}

#[async_trait]
impl ContentSupplier for FixedContent {
    async fn random_items(
        &self,
        _config: &SessionConfig,
    ) -> Result<Vec<ContentItem>, ContentError> {
        Ok(self.items.clone())
    }
}

// ─── Builders ──────────────────────────────────────────────────────────────────

fn tag() -> TagId {
    TagId::new(Uuid::new_v4())
}

fn items(count: usize, level: Level, kind: ItemKind, tags: Vec<TagId>) -> Vec<ContentItem> {
    (0..count)
        .map(|n| {
            ContentItem::new(
                ItemId::new(Uuid::new_v4()),
                format!("Practice sentence number {n}."),
                format!("https://cdn.example.com/audio/{n}.mp3"),
                level,
                kind,
                tags.clone(),
            )
            .unwrap()
        })
        .collect()
}

fn config(mode: SessionMode, tags: Vec<TagId>, count: u32) -> SessionConfig {
    SessionConfig::new(mode, Level::A1, ItemKind::Question, tags, count).unwrap()
}

struct Harness {
    engine: PracticeEngine,
    store: Arc<InMemoryRepository>,
}

fn harness(
    content: Vec<ContentItem>,
    output: Arc<dyn AudioOutput>,
    input: Arc<dyn AudioInput>,
    scoring: Arc<dyn ScoringClient>,
    remote_fails: bool,
) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let storage = Storage {
        sessions: Arc::clone(&repo) as _,
        content: Arc::clone(&repo) as _,
    };
    let engine = PracticeEngine::new(
        fixed_clock(),
        &storage,
        output,
        input,
        scoring,
        Arc::new(ScriptedRemote { fail: remote_fails }),
        Arc::new(FixedContent { items: content }),
    )
    .with_retry_policy(RetryPolicy::none());
    Harness {
        engine,
        store: repo,
    }
}

fn listen_only_harness(item_count: usize, tags: Vec<TagId>) -> Harness {
    harness(
        items(item_count, Level::A1, ItemKind::Question, tags),
        Arc::new(InstantOutput),
        Arc::new(NoInput),
        Arc::new(ScriptedScoring::new(Vec::new())),
        false,
    )
}

async fn wait_for_phase(handle: &SessionHandle, index: usize, phase: PhaseKind) {
    let mut sub = handle.subscribe();
    sub.wait_for(|state| {
        matches!(
            state,
            EngineState::Ready { index: i, phase: p } if *i == index && *p == phase
        )
    })
    .await
    .expect("session runner gone");
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ─── Scenarios ─────────────────────────────────────────────────────────────────

// Scenario A: ten matching items, every one evaluated, session completes
// with contiguous sequence numbers.
#[tokio::test(start_paused = true)]
async fn listen_only_session_completes_with_contiguous_results() {
    let tags = vec![tag()];
    let h = listen_only_harness(10, tags.clone());
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 10))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    for index in 0..10 {
        wait_for_phase(&handle, index, PhaseKind::AwaitEvaluation).await;
        handle.evaluate(UserResponse::Correct);
    }

    let session = done.await.unwrap().unwrap();
    assert_eq!(session.total_items(), 10);
    assert_eq!(session.results().len(), 10);
    let sequence: Vec<u32> = session
        .results()
        .iter()
        .map(parrot_core::model::ResultEntry::sequence_number)
        .collect();
    assert_eq!(sequence, (1..=10).collect::<Vec<u32>>());
    assert!(matches!(handle.state(), EngineState::Completed { .. }));

    let saved = h.store.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(saved.results(), session.results());
}

// Scenario C: correct x3 then incorrect ends with max streak 3.
#[tokio::test(start_paused = true)]
async fn streak_peaks_then_resets_on_incorrect() {
    let tags = vec![tag()];
    let h = listen_only_harness(4, tags.clone());
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 4))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    for (index, response) in [
        UserResponse::Correct,
        UserResponse::Correct,
        UserResponse::Correct,
        UserResponse::Incorrect,
    ]
    .into_iter()
    .enumerate()
    {
        wait_for_phase(&handle, index, PhaseKind::AwaitEvaluation).await;
        handle.evaluate(response);
    }

    let session = done.await.unwrap().unwrap();
    let totals = session.totals().unwrap();
    assert_eq!(totals.max_streak, 3);
    assert_eq!(totals.correct, 3);
    assert_eq!(totals.incorrect, 1);
}

// Scenario B: nothing online, nothing cached, no session object created.
#[tokio::test]
async fn empty_supplier_yields_content_unavailable() {
    let tags = vec![tag()];
    let h = listen_only_harness(0, tags.clone());

    let err = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 10))
        .await
        .err()
        .expect("must not create a session");
    assert!(matches!(
        err,
        EngineError::Content(ContentError::Unavailable)
    ));

    let page = h
        .store
        .list_page(&HistoryFilter::default(), 0, 10)
        .await
        .unwrap();
    assert!(page.is_empty());
}

// Scenario E: pausing 700ms into the 2s gap resumes with ~1.3s remaining
// rather than restarting the gap.
#[tokio::test(start_paused = true)]
async fn gap_pause_resumes_with_remaining_time() {
    let tags = vec![tag()];
    let h = listen_only_harness(1, tags.clone());
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::Gap).await;
    settle().await;
    tokio::time::advance(std::time::Duration::from_millis(700)).await;

    handle.pause();
    let mut sub = handle.subscribe();
    sub.wait_for(|s| matches!(s, EngineState::Paused { phase: PhaseKind::Gap, .. }))
        .await
        .unwrap();

    handle.resume();
    wait_for_phase(&handle, 0, PhaseKind::Gap).await;
    settle().await;

    // 1299ms later the remainder (1300ms) has not elapsed yet...
    tokio::time::advance(std::time::Duration::from_millis(1299)).await;
    settle().await;
    assert!(matches!(
        handle.state(),
        EngineState::Ready { phase: PhaseKind::Gap, .. }
    ));

    // ...but 2ms more crosses it. A reset-to-2s gap would still be waiting;
    // instead the runner has moved on (instant play may land it in reveal).
    tokio::time::advance(std::time::Duration::from_millis(2)).await;
    settle().await;
    assert!(matches!(
        handle.state(),
        EngineState::Ready {
            phase: PhaseKind::PlaySecond | PhaseKind::RevealText,
            ..
        }
    ));

    wait_for_phase(&handle, 0, PhaseKind::AwaitEvaluation).await;
    handle.evaluate(UserResponse::Correct);
    done.await.unwrap().unwrap();
}

// Pausing mid-playback stops the device and resumes from the captured offset.
#[tokio::test(start_paused = true)]
async fn playback_pause_resumes_from_offset() {
    let output = Arc::new(StallingOutput {
        offsets: Mutex::new(Vec::new()),
        stop_offset: 750,
    });
    let tags = vec![tag()];
    let h = harness(
        items(1, Level::A1, ItemKind::Question, tags.clone()),
        Arc::clone(&output) as _,
        Arc::new(NoInput),
        Arc::new(ScriptedScoring::new(Vec::new())),
        false,
    );
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::PlayFirst).await;
    settle().await;
    handle.pause();
    let mut sub = handle.subscribe();
    sub.wait_for(|s| matches!(s, EngineState::Paused { phase: PhaseKind::PlayFirst, .. }))
        .await
        .unwrap();

    handle.resume();
    wait_for_phase(&handle, 0, PhaseKind::AwaitEvaluation).await;
    assert_eq!(*output.offsets.lock().unwrap(), vec![0, 750]);

    handle.evaluate(UserResponse::Correct);
    done.await.unwrap().unwrap();
}

// Quit mid-session cancels the in-flight phase and still saves what exists.
#[tokio::test(start_paused = true)]
async fn quit_saves_partial_session() {
    let tags = vec![tag()];
    let h = listen_only_harness(3, tags.clone());
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 3))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::AwaitEvaluation).await;
    handle.evaluate(UserResponse::Correct);
    wait_for_phase(&handle, 1, PhaseKind::AwaitEvaluation).await;
    handle.quit();

    let session = done.await.unwrap().unwrap();
    assert_eq!(session.results().len(), 1);
    assert_eq!(session.total_items(), 3);
    assert!(session.is_complete());

    let saved = h.store.get_session(session.id()).await.unwrap();
    assert!(saved.is_some());
}

// Evaluations outside the input window are ignored, including double-taps.
#[tokio::test(start_paused = true)]
async fn out_of_window_evaluations_are_ignored() {
    let tags = vec![tag()];
    let h = listen_only_harness(1, tags.clone());
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::Gap).await;
    handle.evaluate(UserResponse::Incorrect);
    handle.evaluate(UserResponse::Incorrect);

    wait_for_phase(&handle, 0, PhaseKind::AwaitEvaluation).await;
    handle.evaluate(UserResponse::Correct);
    handle.evaluate(UserResponse::Correct);

    let session = done.await.unwrap().unwrap();
    assert_eq!(session.results().len(), 1);
    assert_eq!(session.results()[0].response(), UserResponse::Correct);
}

// Listen-and-repeat: a scored item and a degraded (scoreless) item coexist.
#[tokio::test(start_paused = true)]
async fn repeat_session_scores_and_degrades_per_item() {
    let tags = vec![tag()];
    let h = harness(
        items(2, Level::A1, ItemKind::Question, tags.clone()),
        Arc::new(InstantOutput),
        Arc::new(BurstInput { millis: 800 }),
        Arc::new(ScriptedScoring::new(vec![
            Ok(88.0),
            Err(ScoringError::ServiceUnavailable),
        ])),
        false,
    );
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenAndRepeat, tags, 2))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::AwaitAck).await;
    handle.evaluate(UserResponse::Correct);
    wait_for_phase(&handle, 1, PhaseKind::AwaitAck).await;
    handle.evaluate(UserResponse::Incorrect);

    let session = done.await.unwrap().unwrap();
    assert_eq!(session.results().len(), 2);
    assert_eq!(
        session.results()[0].score().map(ScoreReport::pronunciation),
        Some(88.0)
    );
    assert!(session.results()[1].score().is_none());
    assert_eq!(session.totals().unwrap().avg_pronunciation, Some(88.0));
}

// A scoring service that never answers is cut off by the bounded timeout
// and the item continues scoreless instead of stalling the session.
#[tokio::test(start_paused = true)]
async fn hung_scoring_times_out_and_degrades() {
    let tags = vec![tag()];
    let h = harness(
        items(1, Level::A1, ItemKind::Question, tags.clone()),
        Arc::new(InstantOutput),
        Arc::new(BurstInput { millis: 800 }),
        Arc::new(HangingScoring),
        false,
    );
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenAndRepeat, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    // The paused clock jumps the 10s timeout while we wait.
    wait_for_phase(&handle, 0, PhaseKind::AwaitAck).await;
    handle.evaluate(UserResponse::Incorrect);

    let session = done.await.unwrap().unwrap();
    assert!(session.results()[0].score().is_none());
    assert_eq!(session.totals().unwrap().avg_pronunciation, None);
}

// Pausing mid-capture discards the buffer; resume restarts the microphone.
#[tokio::test(start_paused = true)]
async fn capture_pause_restarts_fresh() {
    let input = Arc::new(HoldOpenInput::new());
    let tags = vec![tag()];
    let h = harness(
        items(1, Level::A1, ItemKind::Question, tags.clone()),
        Arc::new(InstantOutput),
        Arc::clone(&input) as _,
        Arc::new(ScriptedScoring::new(vec![Ok(70.0)])),
        false,
    );
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenAndRepeat, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::Capture).await;
    settle().await;
    handle.pause();
    let mut sub = handle.subscribe();
    sub.wait_for(|s| matches!(s, EngineState::Paused { phase: PhaseKind::Capture, .. }))
        .await
        .unwrap();

    handle.resume();
    wait_for_phase(&handle, 0, PhaseKind::Capture).await;
    settle().await;
    handle.stop_capture();

    wait_for_phase(&handle, 0, PhaseKind::AwaitAck).await;
    assert_eq!(input.begins.load(Ordering::SeqCst), 2);

    handle.evaluate(UserResponse::Correct);
    let session = done.await.unwrap().unwrap();
    assert_eq!(
        session.results()[0].score().map(ScoreReport::pronunciation),
        Some(70.0)
    );
}

// Scenario D: the remote rejects the submission; the session stays saved
// locally as `failed` and is still visible in history.
#[tokio::test(start_paused = true)]
async fn failed_sync_keeps_session_in_history() {
    let tags = vec![tag()];
    let h = harness(
        items(1, Level::A1, ItemKind::Question, tags.clone()),
        Arc::new(InstantOutput),
        Arc::new(NoInput),
        Arc::new(ScriptedScoring::new(Vec::new())),
        true,
    );
    let (handle, runner) = h
        .engine
        .start_session(config(SessionMode::ListenOnly, tags, 1))
        .await
        .unwrap();
    let done = tokio::spawn(runner.run());

    wait_for_phase(&handle, 0, PhaseKind::AwaitEvaluation).await;
    handle.evaluate(UserResponse::Correct);
    let session = done.await.unwrap().unwrap();

    // The detached sync attempt settles on `failed`.
    let mut status = SyncStatus::Pending;
    for _ in 0..100 {
        settle().await;
        status = h
            .store
            .get_session(session.id())
            .await
            .unwrap()
            .unwrap()
            .sync_status();
        if status == SyncStatus::Failed {
            break;
        }
    }
    assert_eq!(status, SyncStatus::Failed);

    let mut history = h.engine.history(10);
    let page = history.query(HistoryFilter::default()).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id(), session.id());
    assert_eq!(page[0].sync_status(), SyncStatus::Failed);
}
