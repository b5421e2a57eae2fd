//! Main Entrypoint for the Voice Trainer
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Initializing logging, prompts and the generation client.
//! 3. Connecting to the voice service and opening a dialog session.
//! 4. Running the microphone, playback and receive tasks alongside the
//!    session's control loop until the session ends.

use anyhow::Context;
use async_openai::config::{AzureConfig, OpenAIConfig};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use trainer_core::{
    config::ResponseMode,
    llm_client::{GenerationService, OpenAICompatibleClient},
    playback::PlaybackQueue,
    prompts::PromptSet,
    session::Session,
    transport::Transport,
};
use trainer_service::{
    audio::{run_playback, stream_microphone},
    config::{Config, GenerationConfig, GenerationProvider},
    transport::{WsTransport, receive_loop},
};

/// Per-run overrides on top of the environment configuration.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Who writes the instructor's replies: `generate` or `forward`.
    #[arg(long)]
    mode: Option<ResponseMode>,
    /// Number of training rounds before the summary.
    #[arg(long)]
    max_rounds: Option<u32>,
    /// Disconnect automatically once the summary has been sent.
    #[arg(long)]
    auto_disconnect: bool,
    /// Skip forward-mode role initialization.
    #[arg(long)]
    no_role_init: bool,
    /// Directory of `*.md` prompt overrides.
    #[arg(long)]
    prompts: Option<PathBuf>,
}

/// Completes when `Ctrl+C` is pressed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Ending session...");
}

fn generation_client(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerationService>> {
    let api_key = config
        .api_key
        .as_deref()
        .context("Generation API key not configured")?;
    let client: Arc<dyn GenerationService> = match config.provider {
        GenerationProvider::OpenAI => {
            info!("Using OpenAI provider.");
            let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
            if let Some(base) = &config.api_base {
                openai_config = openai_config.with_api_base(base);
            }
            Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
                config.timeout,
            ))
        }
        GenerationProvider::Azure => {
            info!("Using Azure OpenAI provider.");
            let azure_config = AzureConfig::new()
                .with_api_key(api_key)
                .with_api_base(config.azure_endpoint.as_deref().unwrap_or_default())
                .with_deployment_id(config.azure_deployment.as_deref().unwrap_or_default())
                .with_api_version(&config.azure_api_version);
            Arc::new(OpenAICompatibleClient::new(
                azure_config,
                config.chat_model.clone(),
                config.timeout,
            ))
        }
    };
    Ok(client)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(mode) = args.mode {
        config.session.mode = mode;
    }
    if let Some(max_rounds) = args.max_rounds {
        config.session.max_rounds = max_rounds;
    }
    config.session.auto_disconnect |= args.auto_disconnect;
    if args.no_role_init {
        config.session.role_init_enabled = false;
    }
    if let Some(dir) = args.prompts {
        config.prompts_path = Some(dir);
    }
    let config = config.validate().context("Invalid configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        mode = ?config.session.mode,
        max_rounds = config.session.max_rounds,
        round_control = config.session.enable_round_control,
        role_init = config.session.role_init_enabled,
        auto_disconnect = config.session.auto_disconnect,
        "Configuration loaded"
    );

    // --- 3. Initialize Shared Services ---
    let prompts = Arc::new(match &config.prompts_path {
        Some(dir) => PromptSet::from_dir(dir)?,
        None => PromptSet::default(),
    });
    let generation = if config.session.needs_generation() {
        Some(generation_client(&config.generation)?)
    } else {
        info!("Generation service not needed for this session");
        None
    };

    // --- 4. Connect and Start the Session ---
    let (transport, inbound) = WsTransport::connect(&config.voice).await?;
    let playback = PlaybackQueue::new();
    let session = Session::new(
        config.session.clone(),
        transport.clone(),
        generation,
        playback.clone(),
        prompts,
    );

    let receiver = tokio::spawn(receive_loop(inbound, session.clone()));
    let microphone = tokio::spawn(stream_microphone(tokio::io::stdin(), transport.clone()));
    let speaker = match &config.audio_out_path {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Could not create {}", path.display()))?;
            info!(path = %path.display(), "Writing synthesized audio to file");
            tokio::spawn(run_playback(playback, file))
        }
        None => tokio::spawn(run_playback(playback, tokio::io::sink())),
    };

    let outcome = tokio::select! {
        result = session.clone().run() => result,
        _ = shutdown_signal() => transport.close().await,
    };

    receiver.abort();
    microphone.abort();
    speaker.abort();

    let state = session.state().await;
    info!(
        rounds = state.round,
        turns = session.history().await.len(),
        summary_sent = state.summary_sent,
        "Trainer has shut down."
    );
    outcome
}
