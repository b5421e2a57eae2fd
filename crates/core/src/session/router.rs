//! Classifies inbound events and hands them to the right handler.

use super::{Session, spawn_logged};
use crate::{
    config::ResponseMode,
    event::{InboundEvent, MessageKind, codes},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Phrases that end the session when they appear anywhere in a final
/// transcript (case-insensitive).
pub const END_COMMANDS: [&str; 11] = [
    "结束", "结束培训", "培训结束", "结束会话", "结束对话", "bye", "goodbye", "再见", "结束了", "停止",
    "退出",
];

/// Whether a transcript asks to end the session.
pub fn is_end_command(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    END_COMMANDS.iter().any(|cmd| lowered.contains(cmd))
}

impl Session {
    /// Handles one decoded server event.
    ///
    /// Never blocks on generation or multi-chunk sends: that work is handed
    /// to the turn worker or to a background task.
    pub async fn route(self: &Arc<Self>, event: InboundEvent) {
        match event.kind {
            MessageKind::Ack => {
                if let Some(audio) = event.audio() {
                    self.playback.put(audio.clone());
                }
            }
            MessageKind::Error => self.mark_server_finished(event.error_code).await,
            MessageKind::FullResponse => match event.event {
                Some(codes::ASR_RESPONSE) => self.on_transcript(&event).await,
                Some(codes::CLEAR_AUDIO) => {
                    let dropped = self.playback.clear();
                    debug!(dropped, "Cleared playback queue");
                }
                Some(codes::CHAT_RESPONSE) => self.on_relayed_content(&event).await,
                Some(codes::CHAT_ENDED) => {
                    if self.config.mode == ResponseMode::Forward {
                        self.commit_relayed_reply().await;
                    }
                }
                Some(code @ (codes::SESSION_FINISHED | codes::SESSION_FAILED)) => {
                    self.mark_server_finished(Some(code)).await
                }
                _ => {}
            },
        }
    }

    async fn on_transcript(self: &Arc<Self>, event: &InboundEvent) {
        let Some(text) = event.final_transcript() else {
            debug!("ASR result was empty or interim");
            return;
        };
        info!(text = %text, "ASR final result");

        if is_end_command(&text) {
            spawn_logged("end_by_command", self.clone().end_by_command());
            return;
        }
        match self.config.mode {
            ResponseMode::Generate => self.enqueue_turn(text),
            ResponseMode::Forward => self.on_forward_utterance(text).await,
        }
    }

    async fn on_relayed_content(self: &Arc<Self>, event: &InboundEvent) {
        let Some(content) = event.relayed_content() else {
            return;
        };
        match self.config.mode {
            ResponseMode::Generate => {
                if self.config.relay_logging {
                    info!(content = %content, "Intercepted relayed model reply");
                }
            }
            ResponseMode::Forward => self.on_relayed_reply(content).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_command_is_case_insensitive_substring() {
        assert!(is_end_command("我想BYE了"));
        assert!(is_end_command("请结束会话"));
        assert!(is_end_command("  GoodBye  "));
        assert!(is_end_command("那我们就停止吧"));
    }

    #[test]
    fn test_ordinary_answers_are_not_end_commands() {
        assert!(!is_end_command("企业出海真有趣"));
        assert!(!is_end_command("我认为应该先做市场调研"));
        assert!(!is_end_command(""));
    }
}
