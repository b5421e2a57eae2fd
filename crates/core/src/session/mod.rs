//! Training Session State Machine
//!
//! A `Session` owns the round counter, the phase, and the conversation
//! history. It is driven from two sides:
//!
//! - `route`: called by the transport's receive loop for every decoded
//!   server event (see `router`).
//! - `run`: the control loop, which starts the session, polls for the round
//!   limit, dispatches the summary exactly once, and shuts down.
//!
//! All state sits behind a single async mutex that is never held across an
//! await point. Mode-specific behaviour lives in `generate` and `forward`.

mod forward;
mod generate;
mod router;
mod state;

#[cfg(test)]
mod tests;

pub use forward::ROLE_KEYWORDS;
pub use router::{END_COMMANDS, is_end_command};
pub use state::{Phase, SessionState};

use crate::{
    config::{ResponseMode, SessionConfig},
    generation::GenerationAdapter,
    history::{ConversationHistory, ConversationTurn},
    llm_client::GenerationService,
    playback::PlaybackQueue,
    prompts::{self, PromptSet},
    speaker::Speaker,
    transport::Transport,
};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

/// Generate-mode utterances that may wait behind the turn in flight.
const TURN_QUEUE_CAPACITY: usize = 4;

struct SessionInner {
    state: SessionState,
    history: ConversationHistory,
    /// Forward mode: relayed reply text accumulated until end-of-turn.
    pending_reply: Option<String>,
}

pub struct Session {
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    transport: Arc<dyn Transport>,
    speaker: Speaker,
    playback: PlaybackQueue,
    adapter: GenerationAdapter,
    prompts: Arc<PromptSet>,
    turns: mpsc::Sender<String>,
    turn_queue: Mutex<Option<mpsc::Receiver<String>>>,
}

/// What the control loop should do after one poll.
enum Tick {
    Continue,
    Stop,
}

/// Runs `task` in the background, logging its failure instead of losing it.
fn spawn_logged<F>(task: &'static str, fut: F)
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!(task, error = ?e, "Background task failed");
        }
    });
}

impl Session {
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        generation: Option<Arc<dyn GenerationService>>,
        playback: PlaybackQueue,
        prompts: Arc<PromptSet>,
    ) -> Arc<Self> {
        let (turns, turn_queue) = mpsc::channel(TURN_QUEUE_CAPACITY);
        let adapter = GenerationAdapter::new(
            generation,
            prompts.clone(),
            config.temperature,
            config.response_length_limit,
            config.generation_logging,
        );
        Arc::new(Self {
            speaker: Speaker::new(transport.clone()),
            inner: Mutex::new(SessionInner {
                state: SessionState::default(),
                history: ConversationHistory::new(),
                pending_reply: None,
            }),
            config,
            transport,
            playback,
            adapter,
            prompts,
            turns,
            turn_queue: Mutex::new(Some(turn_queue)),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A copy of the current state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state.clone()
    }

    /// A copy of the full conversation history.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.inner.lock().await.history.turns().to_vec()
    }

    async fn set_phase(&self, phase: Phase) {
        let mut inner = self.inner.lock().await;
        if inner.state.phase != phase {
            info!(from = %inner.state.phase, to = %phase, "Phase transition");
            inner.state.phase = phase;
        }
    }

    /// Speaks `text` without making the caller wait for the sends.
    fn speak_detached(self: &Arc<Self>, task: &'static str, text: &'static str) {
        let session = self.clone();
        spawn_logged(task, async move {
            session.speaker.speak(text).await;
            Ok(())
        });
    }

    /// Starts the session and drives the control loop until it stops.
    ///
    /// Returns once the session is disconnected: by a manual end command, by
    /// the server ending the session, or by an automatic disconnect.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            mode = ?self.config.mode,
            max_rounds = self.config.max_rounds,
            round_control = self.config.enable_round_control,
            auto_disconnect = self.config.auto_disconnect,
            "Starting training session"
        );
        let turn_worker = match self.config.mode {
            ResponseMode::Generate => {
                self.start_generate().await;
                let queue = self.turn_queue.lock().await.take();
                queue.map(|queue| tokio::spawn(self.clone().run_turn_worker(queue)))
            }
            ResponseMode::Forward => {
                self.start_forward().await;
                None
            }
        };

        loop {
            if let Tick::Stop = self.poll().await {
                break;
            }
            sleep(self.config.timings.poll_interval).await;
        }
        if let Some(worker) = turn_worker {
            worker.abort();
        }
        info!("Training session finished");
        Ok(())
    }

    /// One iteration of the control loop.
    async fn poll(self: &Arc<Self>) -> Tick {
        let timings = self.config.timings;

        let (phase, server_finished) = {
            let inner = self.inner.lock().await;
            (inner.state.phase, inner.state.server_finished)
        };
        if phase == Phase::Disconnected {
            return Tick::Stop;
        }
        if server_finished {
            warn!("Server ended the dialog session");
            self.set_phase(Phase::Disconnected).await;
            if let Err(e) = self.transport.close().await {
                error!(error = ?e, "Failed to close connection");
            }
            return Tick::Stop;
        }

        if phase == Phase::RoleInit {
            self.check_role_init_deadline().await;
        }

        let reached_limit = {
            let mut inner = self.inner.lock().await;
            let state = &mut inner.state;
            let reached = self.config.enable_round_control
                && state.round >= self.config.max_rounds
                && !state.training_completed
                && !state.is_closing();
            if reached {
                info!(rounds = self.config.max_rounds, from = %state.phase, "Round limit reached, preparing summary");
                state.training_completed = true;
                state.phase = Phase::Summarizing;
            }
            reached
        };
        if reached_limit {
            sleep(timings.completion_grace).await;
            self.dispatch_summary().await;
        }

        let disconnect_due = {
            let inner = self.inner.lock().await;
            self.config.auto_disconnect
                && inner.state.training_completed
                && inner.state.summary_sent
                && !inner.state.is_closing()
        };
        if disconnect_due {
            info!(grace = ?timings.disconnect_grace, "Training complete, disconnecting after grace period");
            sleep(timings.disconnect_grace).await;
            let already_closed = self.inner.lock().await.state.phase == Phase::Disconnected;
            if !already_closed {
                self.set_phase(Phase::Disconnected).await;
                if let Err(e) = self.transport.close().await {
                    error!(error = ?e, "Failed to close connection");
                }
            }
            return Tick::Stop;
        }

        Tick::Continue
    }

    /// Sends the end-of-training summary. Fires at most once per session.
    async fn dispatch_summary(self: &Arc<Self>) {
        let history = {
            let mut inner = self.inner.lock().await;
            if inner.state.summary_sent || !inner.state.training_completed || inner.state.is_closing()
            {
                return;
            }
            inner.state.summary_sent = true;
            inner.history.turns().to_vec()
        };

        let summary = match self.config.mode {
            ResponseMode::Generate => self.adapter.summarize(&history, self.config.max_rounds).await,
            ResponseMode::Forward => self.prompts.forward_summary_request(self.config.max_rounds),
        };
        self.speaker.speak(&summary).await;
        info!("Training summary dispatched");

        let mut inner = self.inner.lock().await;
        if inner.state.phase == Phase::Summarizing {
            inner.state.phase = Phase::Completed;
            info!("Phase transition to completed; connection stays open");
        }
    }

    /// Carries out a manual end command: farewell, grace period, close.
    async fn end_by_command(self: Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state.is_closing() {
                return Ok(());
            }
            inner.state.ending = true;
        }
        info!("End command received, closing session");
        self.speaker.speak(prompts::FAREWELL).await;
        sleep(self.config.timings.farewell_grace).await;

        let closed = self.transport.close().await;
        self.set_phase(Phase::Disconnected).await;
        closed.context("Failed to close connection after end command")
    }

    /// Records that the dialog session is over on the server side. The
    /// control loop closes the transport and stops on its next poll.
    pub async fn mark_server_finished(&self, code: Option<u32>) {
        warn!(?code, "Received session termination signal");
        self.inner.lock().await.state.server_finished = true;
    }

    /// Records the deadline for the role acknowledgement, once.
    async fn start_role_init_deadline(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.phase == Phase::RoleInit && inner.state.init_deadline.is_none() {
            inner.state.init_deadline = Some(Instant::now() + self.config.timings.role_init_timeout);
        }
    }
}
