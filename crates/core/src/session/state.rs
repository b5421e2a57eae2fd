use std::fmt;
use tokio::time::Instant;

/// Lifecycle phase of a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Greeting,
    /// Forward mode only: waiting for the remote model to accept its role.
    RoleInit,
    Active,
    /// Round limit reached; the summary is about to be sent.
    Summarizing,
    /// Summary sent; the connection stays open for free conversation.
    Completed,
    Disconnected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Greeting => "greeting",
            Phase::RoleInit => "role_init",
            Phase::Active => "active",
            Phase::Summarizing => "summarizing",
            Phase::Completed => "completed",
            Phase::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Mutable session state. Owned by the session; everyone else sees copies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub round: u32,
    pub init_attempts: u32,
    pub init_deadline: Option<Instant>,
    pub training_completed: bool,
    /// Set at most once, and only after `training_completed`.
    pub summary_sent: bool,
    /// The server signalled the end of the dialog session.
    pub server_finished: bool,
    /// A manual end command is being carried out.
    pub ending: bool,
}

impl SessionState {
    /// Whether the session is over or on its way out.
    pub fn is_closing(&self) -> bool {
        self.ending || self.phase == Phase::Disconnected
    }
}
