/// Shared error type used across all Cortex crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("memory store: {0}")]
    Memory(String),

    #[error("unresolved prompt tokens in {template}: {tokens:?}")]
    UnresolvedTokens {
        template: String,
        tokens: Vec<String>,
    },

    #[error("world write: {0}")]
    WorldWrite(String),

    #[error("config: {0}")]
    Config(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn deadline exceeded")]
    Deadline,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient transport failures the tool loop may retry once.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(msg) => {
                msg.contains("connection reset")
                    || msg.contains("connection closed")
                    || msg.contains("502")
                    || msg.contains("503")
                    || msg.contains("504")
            }
            Error::Provider { message, .. } => {
                message.starts_with("HTTP 5") || message.contains("overloaded")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
