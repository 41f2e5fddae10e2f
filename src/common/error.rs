use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvesterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Queue error: {message}")]
    Queue { message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl HarvesterError {
    pub fn store(message: impl Into<String>) -> Self {
        HarvesterError::Store { message: message.into() }
    }

    pub fn queue(message: impl Into<String>) -> Self {
        HarvesterError::Queue { message: message.into() }
    }

    /// True when the remote side rejected our session and a re-login may help.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, HarvesterError::UpstreamStatus { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, HarvesterError>;
