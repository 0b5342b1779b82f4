//! Error types for Cerberus.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Forum error: {0}")]
    Forum(#[from] ForumError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Duplex channel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The opposite worker dropped its end of the channel.
    #[error("Peer worker is unavailable")]
    PeerUnavailable,
}

/// Forum platform errors.
#[derive(Debug, thiserror::Error)]
pub enum ForumError {
    #[error("Forum authentication failed: {0}")]
    AuthFailed(String),

    #[error("Forum request failed: {0}")]
    Request(String),

    #[error("Forum API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid forum response: {0}")]
    InvalidResponse(String),

    #[error("Forum rejected item: {0}")]
    Rejected(String),
}

impl ForumError {
    /// Errors that mean the forum side cannot make progress at all.
    pub fn is_fatal(&self) -> bool {
        match self {
            ForumError::AuthFailed(_) | ForumError::Request(_) => true,
            ForumError::Api { status, .. } => *status == 401 || *status == 403,
            ForumError::InvalidResponse(_) | ForumError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for ForumError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ForumError::InvalidResponse(e.to_string())
        } else {
            ForumError::Request(e.to_string())
        }
    }
}

/// Chat platform errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Chat connection failed: {0}")]
    Connection(String),

    #[error("Chat connection closed")]
    Disconnected,

    #[error("Chat server refused the session: {0}")]
    Rejected(String),

    #[error("Failed to send to chat channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Chat channel {0} not found")]
    ChannelNotFound(String),

    #[error("Invalid chat payload: {0}")]
    InvalidPayload(String),
}

/// Worker lifecycle errors surfaced by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {name} panicked: {reason}")]
    Panicked { name: String, reason: String },

    #[error("Worker {name} could not start: {reason}")]
    SpawnFailed { name: String, reason: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
