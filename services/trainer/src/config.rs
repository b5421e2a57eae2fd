use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use trainer_core::config::{ConfigError as SessionConfigError, SessionConfig};

const DEFAULT_VOICE_URL: &str = "wss://openspeech.bytedance.com/api/v3/realtime/dialogue";
const DEFAULT_RESOURCE_ID: &str = "volc.speech.dialog";
const DEFAULT_BOT_NAME: &str = "企业培训讲师";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported backends for reply generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationProvider {
    OpenAI,
    Azure,
}

/// Connection settings for the realtime voice service.
#[derive(Clone, Debug)]
pub struct VoiceServiceConfig {
    pub url: String,
    pub app_id: String,
    pub access_key: String,
    pub resource_id: String,
    pub app_key: String,
    pub bot_name: String,
}

/// Settings for the external generation service.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub provider: GenerationProvider,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub azure_endpoint: Option<String>,
    pub azure_deployment: Option<String>,
    pub azure_api_version: String,
    pub chat_model: String,
    pub timeout: Duration,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub voice: VoiceServiceConfig,
    pub generation: GenerationConfig,
    pub session: SessionConfig,
    pub log_level: Level,
    pub prompts_path: Option<PathBuf>,
    pub audio_out_path: Option<PathBuf>,
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn flag_or(name: &str, default: bool) -> Result<bool, ConfigError> {
    match optional(name).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(
                name.to_string(),
                format!("'{v}' is not a boolean"),
            )),
        },
    }
}

fn session_from_env() -> Result<SessionConfig, ConfigError> {
    let defaults = SessionConfig::default();
    Ok(SessionConfig {
        mode: parse_or("TRAINER_MODE", defaults.mode)?,
        max_rounds: parse_or("MAX_ROUNDS", defaults.max_rounds)?,
        response_length_limit: parse_or("RESPONSE_LENGTH_LIMIT", defaults.response_length_limit)?,
        temperature: parse_or("TEMPERATURE", defaults.temperature)?,
        enable_round_control: flag_or("ENABLE_ROUND_CONTROL", defaults.enable_round_control)?,
        role_init_enabled: flag_or("ROLE_INIT_ENABLED", defaults.role_init_enabled)?,
        auto_disconnect: flag_or("AUTO_DISCONNECT", defaults.auto_disconnect)?,
        generation_logging: flag_or("GENERATION_LOGGING", defaults.generation_logging)?,
        relay_logging: flag_or("RELAY_LOGGING", defaults.relay_logging)?,
        timings: defaults.timings,
    })
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Values are parsed but not cross-checked; call [`Config::validate`]
    /// once any command-line overrides have been applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let voice = VoiceServiceConfig {
            url: optional("VOICE_WS_URL").unwrap_or_else(|| DEFAULT_VOICE_URL.to_string()),
            app_id: required("VOICE_APP_ID")?,
            access_key: required("VOICE_ACCESS_KEY")?,
            resource_id: optional("VOICE_RESOURCE_ID")
                .unwrap_or_else(|| DEFAULT_RESOURCE_ID.to_string()),
            app_key: required("VOICE_APP_KEY")?,
            bot_name: optional("BOT_NAME").unwrap_or_else(|| DEFAULT_BOT_NAME.to_string()),
        };

        let provider = match optional("GENERATION_PROVIDER")
            .unwrap_or_else(|| "openai".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => GenerationProvider::OpenAI,
            "azure" => GenerationProvider::Azure,
            other => {
                return Err(ConfigError::InvalidValue(
                    "GENERATION_PROVIDER".to_string(),
                    format!("'{other}' is not one of openai, azure"),
                ));
            }
        };

        let timeout_secs: u64 = parse_or("GENERATION_TIMEOUT_SECS", 30)?;
        let generation = GenerationConfig {
            api_key: match provider {
                GenerationProvider::OpenAI => optional("OPENAI_API_KEY"),
                GenerationProvider::Azure => optional("AZURE_OPENAI_API_KEY"),
            },
            api_base: optional("OPENAI_API_BASE"),
            azure_endpoint: optional("AZURE_OPENAI_ENDPOINT"),
            azure_deployment: optional("AZURE_OPENAI_DEPLOYMENT"),
            azure_api_version: optional("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            chat_model: optional("CHAT_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            timeout: Duration::from_secs(timeout_secs),
            provider,
        };

        let session = session_from_env()?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = optional("PROMPTS_PATH").map(PathBuf::from);
        let audio_out_path = optional("AUDIO_OUT_PATH").map(PathBuf::from);

        Ok(Self {
            voice,
            generation,
            session,
            log_level,
            prompts_path,
            audio_out_path,
        })
    }

    /// Checks the session settings and the generation credentials the
    /// session needs.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.session = self.session.validate().map_err(|e| {
            let var = match e {
                SessionConfigError::ZeroRounds => "MAX_ROUNDS",
                SessionConfigError::ZeroLengthLimit => "RESPONSE_LENGTH_LIMIT",
                SessionConfigError::UnknownMode(_) => "TRAINER_MODE",
            };
            ConfigError::InvalidValue(var.to_string(), e.to_string())
        })?;
        self.check_generation()?;
        Ok(self)
    }

    /// Fails when the session needs the generation service but its
    /// credentials are incomplete.
    pub fn check_generation(&self) -> Result<(), ConfigError> {
        if !self.session.needs_generation() {
            return Ok(());
        }
        let generation = &self.generation;
        match generation.provider {
            GenerationProvider::OpenAI => {
                if generation.api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            GenerationProvider::Azure => {
                if generation.api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "AZURE_OPENAI_API_KEY must be set for 'azure' provider".to_string(),
                    ));
                }
                if generation.azure_endpoint.is_none() || generation.azure_deployment.is_none() {
                    return Err(ConfigError::MissingVar(
                        "AZURE_OPENAI_ENDPOINT and AZURE_OPENAI_DEPLOYMENT must be set for 'azure' provider"
                            .to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
