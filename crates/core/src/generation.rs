//! Turns user input, history and session phase into instructor text.
//!
//! Every entry point degrades to fixed text when the generation service is
//! missing or fails, so a slow or broken service never stalls the session.

use crate::{
    history::{ConversationTurn, TurnRole},
    llm_client::{ChatMessage, CompletionRequest, GenerationService},
    prompts::{self, PromptSet},
};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const REPLY_MAX_TOKENS: u32 = 300;
const SUMMARY_MAX_TOKENS: u32 = 400;
const ROLE_INIT_MAX_TOKENS: u32 = 200;
const TOP_P: f32 = 0.95;
const SUMMARY_TEMPERATURE: f32 = 0.7;
const ROLE_INIT_TEMPERATURE: f32 = 0.1;
/// Replies shorter than this are logged as suspicious.
const SHORT_REPLY_CHARS: usize = 20;

/// Outcome of a reply request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Text written by the generation service.
    Generated(String),
    /// Fixed text used because generation failed.
    Fallback(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Generated(text) | Reply::Fallback(text) => text,
        }
    }
}

pub struct GenerationAdapter {
    service: Option<Arc<dyn GenerationService>>,
    prompts: Arc<PromptSet>,
    temperature: f32,
    length_limit: u32,
    verbose: bool,
}

fn to_messages(history: &[ConversationTurn]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(turn.render()),
            TurnRole::Assistant => ChatMessage::assistant(turn.render()),
        })
        .collect()
}

impl GenerationAdapter {
    pub fn new(
        service: Option<Arc<dyn GenerationService>>,
        prompts: Arc<PromptSet>,
        temperature: f32,
        length_limit: u32,
        verbose: bool,
    ) -> Self {
        Self {
            service,
            prompts,
            temperature,
            length_limit,
            verbose,
        }
    }

    async fn request(
        &self,
        system: String,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| anyhow!("No generation service configured"))?;
        let started = Instant::now();
        let completion = service
            .complete(CompletionRequest {
                system,
                messages,
                temperature,
                max_tokens,
                top_p: TOP_P,
            })
            .await?;
        if completion.text.is_empty() {
            return Err(anyhow!("Generation service returned empty text"));
        }
        if self.verbose {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                chars = completion.text.chars().count(),
                tokens = ?completion.total_tokens,
                "Generation completed"
            );
        }
        Ok(completion.text)
    }

    /// The opening utterance of a generate-mode session.
    pub async fn opening(&self, history: &[ConversationTurn]) -> String {
        let mut messages = to_messages(history);
        messages.push(ChatMessage::user(self.prompts.opening.clone()));
        match self
            .request(self.prompts.system.clone(), messages, self.temperature, REPLY_MAX_TOKENS)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Opening generation failed, using default opening");
                prompts::DEFAULT_OPENING.to_string()
            }
        }
    }

    /// The instructor's reply to `user_text` in `round` of `max_rounds`.
    ///
    /// `history` should already be windowed to the most recent turns.
    pub async fn generate(
        &self,
        user_text: &str,
        history: &[ConversationTurn],
        round: u32,
        max_rounds: u32,
    ) -> Reply {
        let mut messages = to_messages(history);
        messages.push(ChatMessage::user(self.prompts.turn_instruction(
            round,
            max_rounds,
            user_text,
            self.length_limit,
        )));
        if self.verbose {
            info!(round, max_rounds, temperature = self.temperature, user_text, "Requesting reply");
        }
        match self
            .request(self.prompts.system.clone(), messages, self.temperature, REPLY_MAX_TOKENS)
            .await
        {
            Ok(text) => {
                if text.chars().count() < SHORT_REPLY_CHARS {
                    warn!(reply = %text, "Generated reply is suspiciously short");
                }
                Reply::Generated(text)
            }
            Err(e) => {
                error!(round, error = ?e, "Reply generation failed, using fallback");
                Reply::Fallback(prompts::GENERATION_FALLBACK.to_string())
            }
        }
    }

    /// End-of-training summary over the full history.
    pub async fn summarize(&self, history: &[ConversationTurn], max_rounds: u32) -> String {
        let mut messages = to_messages(history);
        messages.push(ChatMessage::user(self.prompts.summary_instruction(max_rounds)));
        match self
            .request(
                self.prompts.system.clone(),
                messages,
                SUMMARY_TEMPERATURE,
                SUMMARY_MAX_TOKENS,
            )
            .await
        {
            Ok(summary) => format!("培训总结：{}\n\n{}", summary, prompts::SUMMARY_CLOSING),
            Err(e) => {
                error!(error = %e, "Summary generation failed, using fallback");
                prompts::SUMMARY_FALLBACK.to_string()
            }
        }
    }

    /// Role-setting instruction for the remote model in forward mode.
    pub async fn role_instruction(&self, max_rounds: u32) -> String {
        let messages = vec![ChatMessage::user(self.prompts.role_init_request(max_rounds))];
        match self
            .request(
                self.prompts.role_init_system.clone(),
                messages,
                ROLE_INIT_TEMPERATURE,
                ROLE_INIT_MAX_TOKENS,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Role instruction generation failed, using fixed instruction");
                prompts::ROLE_INIT_FALLBACK.to_string()
            }
        }
    }
}
