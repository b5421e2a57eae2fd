//! Forward mode: the voice service's own model answers the user.
//!
//! This side only plays bookkeeper. Before the remote model has accepted
//! its trainer role, utterances count as initialization attempts; once it
//! has, each utterance is a round and relayed replies are committed to the
//! history at end-of-turn.

use super::{Phase, Session};
use crate::prompts;
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Initialization attempts after which training starts regardless.
const MAX_INIT_ATTEMPTS: u32 = 3;

/// Any of these in relayed content counts as the model accepting its role.
pub const ROLE_KEYWORDS: [&str; 13] = [
    "明白",
    "培训师",
    "企业",
    "出海",
    "课程",
    "中能科技",
    "讲师",
    "做企业培训",
    "培训",
    "教",
    "负责",
    "学习",
    "案例",
];

fn acknowledges_role(content: &str) -> bool {
    ROLE_KEYWORDS.iter().any(|kw| content.contains(kw))
}

impl Session {
    pub(super) async fn start_forward(self: &Arc<Self>) {
        if !self.config.role_init_enabled {
            self.set_phase(Phase::Active).await;
            return;
        }

        self.set_phase(Phase::RoleInit).await;
        let instruction = self.adapter.role_instruction(self.config.max_rounds).await;
        info!("Sending role instruction to the voice service");
        self.speaker.speak(&instruction).await;

        sleep(self.config.timings.role_ack_settle).await;
        self.start_role_init_deadline().await;
    }

    /// Forces training to start once the role-acknowledgement deadline passes.
    pub(super) async fn check_role_init_deadline(self: &Arc<Self>) {
        let expired = {
            let mut inner = self.inner.lock().await;
            let state = &mut inner.state;
            let expired = state.phase == Phase::RoleInit
                && state.init_deadline.is_some_and(|deadline| Instant::now() >= deadline);
            if expired {
                state.phase = Phase::Active;
            }
            expired
        };
        if expired {
            info!("Role acknowledgement timed out, forcing training start");
            self.speak_detached("forced_start", prompts::FORCED_START);
        }
    }

    pub(super) async fn on_forward_utterance(self: &Arc<Self>, text: String) {
        let forced = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let round_control = self.config.enable_round_control;
            let max_rounds = self.config.max_rounds;
            let state = &mut inner.state;
            match state.phase {
                Phase::RoleInit => {
                    state.init_attempts += 1;
                    info!(attempt = state.init_attempts, text = %text, "Utterance during role initialization");
                    let expired = state
                        .init_deadline
                        .is_some_and(|deadline| Instant::now() >= deadline);
                    if expired || state.init_attempts >= MAX_INIT_ATTEMPTS {
                        state.phase = Phase::Active;
                        true
                    } else {
                        false
                    }
                }
                Phase::Active | Phase::Summarizing | Phase::Completed if round_control => {
                    if state.phase == Phase::Active && state.round < max_rounds {
                        state.round += 1;
                    }
                    let round = state.round;
                    info!(round, max_rounds, text = %text, "User turn");
                    inner.history.push_user(round, text);
                    false
                }
                phase => {
                    debug!(%phase, "Utterance not counted");
                    false
                }
            }
        };
        if forced {
            info!("Role initialization timed out or exhausted attempts, forcing training start");
            self.speak_detached("forced_start", prompts::FORCED_START);
        }
    }

    pub(super) async fn on_relayed_reply(self: &Arc<Self>, content: String) {
        if content.is_empty() {
            return;
        }
        if self.config.relay_logging {
            info!(content = %content, "Relayed model reply");
        }
        let acknowledged = {
            let mut inner = self.inner.lock().await;
            match inner.state.phase {
                Phase::RoleInit => {
                    let ack = acknowledges_role(&content);
                    if ack {
                        inner.state.phase = Phase::Active;
                    }
                    ack
                }
                Phase::Greeting | Phase::Disconnected => false,
                _ => {
                    inner
                        .pending_reply
                        .get_or_insert_with(String::new)
                        .push_str(&content);
                    false
                }
            }
        };
        if acknowledged {
            info!("Remote model acknowledged its role, starting training");
            self.speak_detached("first_question", prompts::FIRST_QUESTION);
        }
    }

    /// End-of-turn: commits the accumulated reply as an assistant turn.
    pub(super) async fn commit_relayed_reply(&self) {
        let mut inner = self.inner.lock().await;
        let Some(reply) = inner.pending_reply.take().filter(|r| !r.is_empty()) else {
            return;
        };
        let round = inner.state.round;
        let trained = matches!(
            inner.state.phase,
            Phase::Active | Phase::Summarizing | Phase::Completed
        );
        if trained && round > 0 {
            inner.history.push_assistant(round, reply);
        } else {
            debug!(round, "Discarding relayed reply outside a counted round");
        }
    }
}
