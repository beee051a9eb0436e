use thiserror::Error;

/// Failure classes observable at the transport boundary.
///
/// `Http` and `Network` are transport failures; `Malformed` is an HTTP 200
/// whose body did not parse as JSON.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),
}
