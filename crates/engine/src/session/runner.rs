//! The session runner: one cooperative task that walks the phase plan.
//!
//! The runner owns every coordinator and issues exactly one outstanding
//! asynchronous operation per phase (play, timer, capture, or score).
//! Commands arrive over a channel and are applied at the `select!` points,
//! which makes preemption (pause, quit, interruption) deterministic: the
//! in-flight operation is stopped and its resumable position captured
//! before any state is published.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use parrot_core::model::{
    ContentItem, ResultEntry, ScoreReport, Session, UserResponse,
};
use parrot_core::phase::{phase_plan, PhaseKind};
use parrot_core::streak;
use parrot_core::Clock;

use crate::capture::{CaptureCoordinator, CapturedAudio, MAX_CAPTURE_MS};
use crate::error::{CaptureError, EngineError};
use crate::gateway::PersistenceGateway;
use crate::playback::{PlaybackCoordinator, PlaybackEnd};
use crate::scoring::{ScoringClient, SCORING_TIMEOUT};
use crate::session::state::{EngineState, PhaseFlow, ResumePoint, SessionCommand};

/// Caller-side handle to a running session.
///
/// Commands are fire-and-forget; ones that do not apply to the current
/// phase are ignored by the runner, so double-taps and late taps are safe.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<EngineState>,
}

impl SessionHandle {
    pub fn evaluate(&self, response: UserResponse) {
        let _ = self.commands.send(SessionCommand::Evaluate(response));
    }

    pub fn stop_capture(&self) {
        let _ = self.commands.send(SessionCommand::StopCapture);
    }

    pub fn pause(&self) {
        let _ = self.commands.send(SessionCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.commands.send(SessionCommand::Resume);
    }

    pub fn quit(&self) {
        let _ = self.commands.send(SessionCommand::Quit);
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Change-notification subscription for UI wiring and tests.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }
}

/// Per-item scratch carried across the phases of one item.
#[derive(Default)]
struct ItemProgress {
    score: Option<ScoreReport>,
    capture: Option<CapturedAudio>,
    capture_retried: bool,
}

enum ResumeAction {
    Resume,
    Quit,
}

/// Drives one session from its first phase to the local save.
pub struct SessionRunner {
    session: Session,
    items: Vec<ContentItem>,
    index: usize,
    streak: u32,
    plan: &'static [PhaseKind],
    playback: PlaybackCoordinator,
    capture: CaptureCoordinator,
    scoring: Arc<dyn ScoringClient>,
    gateway: PersistenceGateway,
    clock: Clock,
    language: String,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    state_tx: watch::Sender<EngineState>,
}

impl SessionRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        session: Session,
        items: Vec<ContentItem>,
        playback: PlaybackCoordinator,
        capture: CaptureCoordinator,
        scoring: Arc<dyn ScoringClient>,
        gateway: PersistenceGateway,
        clock: Clock,
        language: String,
    ) -> (SessionHandle, Self) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EngineState::Loading);
        let plan = phase_plan(session.config().mode());

        let handle = SessionHandle {
            commands: cmd_tx,
            state: state_rx,
        };
        let runner = Self {
            session,
            items,
            index: 0,
            streak: 0,
            plan,
            playback,
            capture,
            scoring,
            gateway,
            clock,
            language,
            commands: cmd_rx,
            state_tx,
        };
        (handle, runner)
    }

    /// Runs the session to completion (natural or quit) and saves it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Storage` when the mandatory local save fails,
    /// the one failure a caller must surface as terminal. Per-phase
    /// playback/capture/scoring trouble degrades the affected item instead.
    pub async fn run(mut self) -> Result<Session, EngineError> {
        info!(
            session_id = %self.session.id(),
            mode = %self.session.config().mode(),
            total_items = self.session.total_items(),
            "session started"
        );

        if let Err(err) = self.drive().await {
            error!(%err, "session runner failed");
            self.publish(EngineState::Failed {
                message: err.to_string(),
            });
            return Err(err);
        }
        self.finish().await
    }

    async fn drive(&mut self) -> Result<(), EngineError> {
        while self.index < self.items.len() {
            let mut progress = ItemProgress::default();
            let mut step = 0;
            let mut resume = ResumePoint::PhaseStart;

            while step < self.plan.len() {
                let phase = self.plan[step];
                self.publish(EngineState::Ready {
                    index: self.index,
                    phase,
                });

                let flow = self.execute_phase(phase, &mut progress, resume).await?;
                resume = ResumePoint::PhaseStart;
                match flow {
                    PhaseFlow::Next => step += 1,
                    PhaseFlow::Retry => {}
                    PhaseFlow::Pause(point) => {
                        self.publish(EngineState::Paused {
                            index: self.index,
                            phase,
                        });
                        match self.wait_for_resume().await {
                            ResumeAction::Resume => resume = point,
                            ResumeAction::Quit => return Ok(()),
                        }
                    }
                    PhaseFlow::Quit => return Ok(()),
                }
            }
            self.index += 1;
        }
        Ok(())
    }

    async fn execute_phase(
        &mut self,
        phase: PhaseKind,
        progress: &mut ItemProgress,
        resume: ResumePoint,
    ) -> Result<PhaseFlow, EngineError> {
        match phase {
            PhaseKind::PlayFirst | PhaseKind::PlaySecond | PhaseKind::PlayOnce => {
                let offset_ms = match resume {
                    ResumePoint::PlaybackAt { offset_ms } => offset_ms,
                    _ => 0,
                };
                Ok(self.run_playback(offset_ms).await)
            }
            PhaseKind::Gap | PhaseKind::RevealText => {
                let remaining_ms = match resume {
                    ResumePoint::TimerRemaining { remaining_ms } => remaining_ms,
                    _ => phase.timer_ms().unwrap_or(0),
                };
                Ok(self.run_timer(remaining_ms).await)
            }
            PhaseKind::Capture => Ok(self.run_capture(progress).await),
            PhaseKind::Submit => Ok(self.run_submit(progress).await),
            PhaseKind::ShowResult => Ok(PhaseFlow::Next),
            PhaseKind::AwaitEvaluation | PhaseKind::AwaitAck => {
                self.run_await_input(progress).await
            }
        }
    }

    async fn run_playback(&mut self, offset_ms: u64) -> PhaseFlow {
        let source = self.items[self.index].audio_url().clone();
        let mut play = Box::pin(self.playback.play_once(source, offset_ms));

        loop {
            tokio::select! {
                end = &mut play => {
                    return match end {
                        Ok(PlaybackEnd::Finished | PlaybackEnd::Stopped { .. }) => PhaseFlow::Next,
                        Ok(PlaybackEnd::Interrupted { offset_ms }) => {
                            // Another app claimed the output: implicit pause.
                            info!(offset_ms, "playback interrupted");
                            PhaseFlow::Pause(ResumePoint::PlaybackAt { offset_ms })
                        }
                        Err(err) => {
                            warn!(%err, "playback failed, continuing without audio");
                            PhaseFlow::Next
                        }
                    };
                }
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Pause) => {
                        drop(play);
                        let offset_ms = self.playback.stop().await;
                        return PhaseFlow::Pause(ResumePoint::PlaybackAt { offset_ms });
                    }
                    Some(SessionCommand::Quit) | None => {
                        drop(play);
                        self.playback.stop().await;
                        return PhaseFlow::Quit;
                    }
                    _ => {}
                }
            }
        }
    }

    async fn run_timer(&mut self, remaining_ms: u64) -> PhaseFlow {
        let started = Instant::now();
        let sleep = tokio::time::sleep(Duration::from_millis(remaining_ms));
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return PhaseFlow::Next,
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Pause) => {
                        let elapsed =
                            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                        return PhaseFlow::Pause(ResumePoint::TimerRemaining {
                            remaining_ms: remaining_ms.saturating_sub(elapsed),
                        });
                    }
                    Some(SessionCommand::Quit) | None => return PhaseFlow::Quit,
                    _ => {}
                }
            }
        }
    }

    async fn run_capture(&mut self, progress: &mut ItemProgress) -> PhaseFlow {
        progress.capture = None;
        let mut active = match self.capture.begin().await {
            Ok(active) => active,
            Err(err) => {
                warn!(%err, "capture unavailable, item degrades to no score");
                return PhaseFlow::Next;
            }
        };

        let deadline = Instant::now() + Duration::from_millis(MAX_CAPTURE_MS);
        loop {
            tokio::select! {
                chunk = active.next_chunk() => {
                    if chunk.is_none() {
                        // Stream closed by the device, or the buffer ceiling
                        // was hit and the excess dropped.
                        break;
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    debug!("capture hit the duration ceiling");
                    break;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::StopCapture) => break,
                    Some(SessionCommand::Pause) => {
                        // Partial captures cannot be resumed, only restarted.
                        active.discard().await;
                        return PhaseFlow::Pause(ResumePoint::RestartCapture);
                    }
                    Some(SessionCommand::Quit) | None => {
                        active.discard().await;
                        return PhaseFlow::Quit;
                    }
                    _ => {}
                }
            }
        }

        match active.finish().await {
            Ok(audio) => {
                debug!(
                    duration_ms = audio.duration_ms,
                    truncated = audio.truncated,
                    "capture finished"
                );
                progress.capture = Some(audio);
                PhaseFlow::Next
            }
            Err(err @ CaptureError::TooShort { .. }) if !progress.capture_retried => {
                warn!(%err, "retrying capture once");
                progress.capture_retried = true;
                PhaseFlow::Retry
            }
            Err(err) => {
                warn!(%err, "capture failed, item degrades to no score");
                PhaseFlow::Next
            }
        }
    }

    async fn run_submit(&mut self, progress: &mut ItemProgress) -> PhaseFlow {
        let Some(audio) = progress.capture.take() else {
            // Nothing captured: the item stays scoreless.
            return PhaseFlow::Next;
        };

        let reference = self.items[self.index].text().to_owned();
        let scoring = Arc::clone(&self.scoring);
        let language = self.language.clone();
        // The audio moves into the request and is dropped with it, gone the
        // moment it has been handed to the scoring client. Pause and quit are
        // deferred until this bounded request resolves, because without the
        // audio there is nothing to re-submit on resume.
        let request = async move { scoring.score(&audio.bytes, &reference, &language).await };

        match tokio::time::timeout(SCORING_TIMEOUT, request).await {
            Ok(Ok(report)) => {
                debug!(score = report.pronunciation(), "utterance scored");
                progress.score = Some(report);
            }
            Ok(Err(err)) => warn!(%err, "scoring failed, item degrades to no score"),
            Err(_) => warn!("scoring timed out, item degrades to no score"),
        }
        PhaseFlow::Next
    }

    async fn run_await_input(
        &mut self,
        progress: &mut ItemProgress,
    ) -> Result<PhaseFlow, EngineError> {
        let entered = Instant::now();
        loop {
            match self.commands.recv().await {
                Some(SessionCommand::Evaluate(response)) => {
                    let response_time_ms =
                        u64::try_from(entered.elapsed().as_millis()).unwrap_or(u64::MAX);
                    self.record(response, progress.score.take(), response_time_ms)?;
                    return Ok(PhaseFlow::Next);
                }
                Some(SessionCommand::Pause) => {
                    return Ok(PhaseFlow::Pause(ResumePoint::PhaseStart));
                }
                Some(SessionCommand::Quit) | None => return Ok(PhaseFlow::Quit),
                _ => {}
            }
        }
    }

    async fn wait_for_resume(&mut self) -> ResumeAction {
        loop {
            match self.commands.recv().await {
                Some(SessionCommand::Resume) => return ResumeAction::Resume,
                Some(SessionCommand::Quit) | None => return ResumeAction::Quit,
                _ => {}
            }
        }
    }

    fn record(
        &mut self,
        response: UserResponse,
        score: Option<ScoreReport>,
        response_time_ms: u64,
    ) -> Result<(), EngineError> {
        // Bounded by total_items, which is capped well below u32::MAX.
        let sequence_number = self.session.answered_count() as u32 + 1;
        let entry = ResultEntry::new(
            self.items[self.index].id(),
            sequence_number,
            response,
            score,
            response_time_ms,
        )?;
        self.session.push_result(entry)?;

        self.streak = streak::advance(self.streak, response);
        debug!(
            sequence_number,
            response = %response,
            streak = self.streak,
            "result recorded"
        );
        Ok(())
    }

    async fn finish(mut self) -> Result<Session, EngineError> {
        self.publish(EngineState::Saving);

        if !self.session.is_complete() {
            self.session.finalize(self.clock.now())?;
        }

        if let Err(err) = self.gateway.save_local(&self.session).await {
            error!(%err, "local save of completed session failed");
            self.publish(EngineState::Failed {
                message: err.to_string(),
            });
            return Err(EngineError::Storage(err));
        }

        self.publish(EngineState::Completed {
            session_id: self.session.id(),
        });

        // Best-effort remote sync, detached: completion feedback never waits
        // on the network, and a failure just leaves the session retryable.
        let gateway = self.gateway.clone();
        let session_id = self.session.id();
        tokio::spawn(async move {
            gateway.try_sync_remote(session_id).await;
        });

        Ok(self.session)
    }

    fn publish(&self, state: EngineState) {
        debug!(?state, "engine state");
        self.state_tx.send_replace(state);
    }
}
