//! Session Configuration
//!
//! Immutable settings that shape a single training session: which response
//! strategy is active, how many rounds are played, and the fixed timing
//! constants the control loop works with.

use serde::Deserialize;
use std::time::Duration;

/// Raised when a `SessionConfig` is structurally invalid.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("max_rounds must be at least 1")]
    ZeroRounds,
    #[error("response_length_limit must be greater than 0")]
    ZeroLengthLimit,
    #[error("unknown response mode: {0}")]
    UnknownMode(String),
}

/// Selects who writes the instructor's replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Replies are produced by the external generation service and pushed to
    /// the voice service for synthesis. The remote model's own replies are
    /// intercepted.
    Generate,
    /// The voice service's embedded model answers on its own; this side only
    /// tracks rounds, history and lifecycle.
    Forward,
}

impl std::str::FromStr for ResponseMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generate" => Ok(ResponseMode::Generate),
            "forward" => Ok(ResponseMode::Forward),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Fixed waits and deadlines used by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTimings {
    /// Interval at which the control loop polls session state.
    pub poll_interval: Duration,
    /// Wait after the final round before the summary is dispatched.
    pub completion_grace: Duration,
    /// Wait after the summary before an automatic disconnect.
    pub disconnect_grace: Duration,
    /// Wait after the farewell before the transport is closed.
    pub farewell_grace: Duration,
    /// Wait after sending the role instruction before the init deadline starts.
    pub role_ack_settle: Duration,
    /// How long the remote model has to acknowledge its role.
    pub role_init_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            completion_grace: Duration::from_secs(3),
            disconnect_grace: Duration::from_secs(5),
            farewell_grace: Duration::from_secs(3),
            role_ack_settle: Duration::from_secs(3),
            role_init_timeout: Duration::from_secs(15),
        }
    }
}

/// Configuration of a training session. Built once, never mutated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub mode: ResponseMode,
    pub max_rounds: u32,
    pub response_length_limit: u32,
    pub temperature: f32,
    pub enable_round_control: bool,
    pub role_init_enabled: bool,
    pub auto_disconnect: bool,
    pub generation_logging: bool,
    pub relay_logging: bool,
    #[serde(skip)]
    pub timings: SessionTimings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ResponseMode::Forward,
            max_rounds: 6,
            response_length_limit: 200,
            temperature: 0.85,
            enable_round_control: true,
            role_init_enabled: true,
            auto_disconnect: false,
            generation_logging: true,
            relay_logging: true,
            timings: SessionTimings::default(),
        }
    }
}

impl SessionConfig {
    /// Checks the structural invariants and returns the config unchanged.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.response_length_limit == 0 {
            return Err(ConfigError::ZeroLengthLimit);
        }
        Ok(self)
    }

    /// Whether this configuration needs a generation service at all.
    pub fn needs_generation(&self) -> bool {
        self.mode == ResponseMode::Generate || self.role_init_enabled
    }
}
