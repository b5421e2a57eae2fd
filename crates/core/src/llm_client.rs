use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::Config,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use std::time::Duration;

/// Role of a message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion request: system instructions plus ordered messages.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

/// The generated text and, when reported, total token usage.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: Option<u32>,
}

/// A generic client for a chat-completion service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Makes a single, non-streaming completion call.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

/// An implementation of `GenerationService` for any OpenAI-compatible API,
/// including Azure deployments (pass an `AzureConfig`).
pub struct OpenAICompatibleClient<C: Config> {
    client: Client<C>,
    model: String,
    timeout: Duration,
}

impl<C: Config> OpenAICompatibleClient<C> {
    /// Creates a new client.
    ///
    /// # Arguments
    ///
    /// * `config` - Provider configuration (API key, base URL or Azure deployment).
    /// * `model` - The model identifier to request (e.g., "gpt-4o-mini").
    /// * `timeout` - Upper bound for a single completion call.
    pub fn new(config: C, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            timeout,
        }
    }
}

fn to_openai_messages(request: &CompletionRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.clone())
            .build()?
            .into(),
    ];
    for msg in &request.messages {
        match msg.role {
            ChatRole::User => messages.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
            ChatRole::Assistant => messages.push(
                ChatCompletionRequestAssistantMessageArgs::default()
                    .content(msg.content.clone())
                    .build()?
                    .into(),
            ),
        }
    }
    Ok(messages)
}

#[async_trait]
impl<C: Config + 'static> GenerationService for OpenAICompatibleClient<C> {
    #[allow(deprecated)]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let messages = to_openai_messages(&request)?;
        let openai_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .top_p(request.top_p)
            .frequency_penalty(0.0)
            .presence_penalty(0.0)
            .build()?;

        let response: CreateChatCompletionResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create(openai_request))
                .await
                .map_err(|_| anyhow!("Completion timed out after {:?}", self.timeout))??;

        let text = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .as_ref()
            .context("No content in LLM response")?
            .trim()
            .to_string();

        Ok(Completion {
            text,
            total_tokens: response.usage.map(|u| u.total_tokens),
        })
    }
}
