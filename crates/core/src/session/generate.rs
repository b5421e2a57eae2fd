//! Generate mode: the external generation service writes every reply.
//!
//! Final transcripts are queued for a single turn worker, so at most one
//! turn is in flight. The round counter, history and reply of one turn are
//! therefore never interleaved with another's.

use super::{Phase, Session};
use crate::generation::Reply;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

impl Session {
    pub(super) async fn start_generate(self: &Arc<Self>) {
        info!("Generating opening");
        let opening = self.adapter.opening(&[]).await;
        self.set_phase(Phase::Active).await;
        self.speaker.speak(&opening).await;
    }

    pub(super) fn enqueue_turn(&self, text: String) {
        match self.turns.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(text)) => {
                warn!(text = %text, "Turn queue full, dropping utterance");
            }
            Err(TrySendError::Closed(text)) => {
                debug!(text = %text, "Turn worker stopped, dropping utterance");
            }
        }
    }

    pub(super) async fn run_turn_worker(self: Arc<Self>, mut queue: mpsc::Receiver<String>) {
        while let Some(text) = queue.recv().await {
            if self.inner.lock().await.state.is_closing() {
                debug!("Session closing, turn worker exiting");
                break;
            }
            self.process_turn(text).await;
        }
    }

    /// Counts the round, asks for a reply and speaks it.
    pub(super) async fn process_turn(&self, text: String) {
        let max_rounds = self.config.max_rounds;
        let (round, context) = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let state = &mut inner.state;
            let below_limit = !self.config.enable_round_control || state.round < max_rounds;
            if state.phase == Phase::Active && below_limit {
                state.round += 1;
            }
            let round = state.round;
            inner.history.push_user(round, text.clone());
            (round, inner.history.recent().to_vec())
        };
        info!(round, max_rounds, "Processing user turn");

        let started = Instant::now();
        let reply = self.adapter.generate(&text, &context, round, max_rounds).await;
        let generation_ms = started.elapsed().as_millis() as u64;

        if let Reply::Generated(generated) = &reply {
            self.inner
                .lock()
                .await
                .history
                .push_assistant(round, generated.clone());
        }

        let started = Instant::now();
        self.speaker.speak(reply.text()).await;
        info!(
            round,
            generation_ms,
            tts_ms = started.elapsed().as_millis() as u64,
            "Turn completed"
        );
    }
}
