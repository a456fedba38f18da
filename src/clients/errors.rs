use rspotify::model::IdError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No access token available, authorize with Spotify first")]
    MissingToken,

    #[error("Search query is empty")]
    EmptyQuery,

    #[error("Invalid callback URL: {0}")]
    InvalidCallback(String),

    #[error("Callback state mismatch: expected {expected}, got {actual}")]
    StateMismatch { expected: String, actual: String },

    #[error("Spotify API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Spotify request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to parse Spotify response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid Spotify track URI: {0}")]
    TrackUri(#[from] IdError),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<std::env::VarError> for Error {
    fn from(err: std::env::VarError) -> Self {
        Error::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
