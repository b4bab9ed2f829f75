// src/connectors/error.rs
use reqwest::StatusCode;
use thiserror::Error;

/// Everything the request dispatcher can fail with.
#[derive(Debug, Error)]
pub enum KrakenError {
    /// Connection failure or timeout.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    /// The venue answered with a non-empty `error` list.
    #[error("Kraken API error: {}", .0.join(", "))]
    Api(Vec<String>),

    #[error("malformed response: {0}")]
    Parse(String),

    #[error("failed to encode request parameters: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("private request has no `nonce` parameter to sign")]
    MissingNonce,

    #[error("signing key rejected: {0}")]
    InvalidSecret(String),
}

impl From<serde_json::Error> for KrakenError {
    fn from(err: serde_json::Error) -> Self {
        KrakenError::Parse(err.to_string())
    }
}
