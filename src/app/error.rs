use thiserror::Error;

#[derive(Error, Debug)]
pub enum FreshetError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index {0} out of range")]
    OutOfRange(usize),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl FreshetError {
    /// Transient errors drive the per-feed refresh backoff; everything
    /// else is surfaced to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, FreshetError::Http(_) | FreshetError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, FreshetError>;
