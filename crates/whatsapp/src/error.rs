use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to sidecar at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("sidecar connection is closed")]
    Disconnected,

    #[error("sidecar did not answer {what} within {after:?}")]
    Timeout { what: &'static str, after: Duration },

    /// The sidecar reported a failure for a request.
    #[error("sidecar error: {0}")]
    Sidecar(String),

    #[error("failed to encode sidecar message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn connect(url: impl Into<String>, source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connect {
            url: url.into(),
            source: Box::new(source),
        }
    }
}
