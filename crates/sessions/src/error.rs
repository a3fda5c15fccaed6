use std::error::Error as StdError;

/// Crate-wide result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed session errors. Every variant is local to one session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or malformed identifier or phone number. No state changed.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Credential load or write failed. No handle was registered.
    #[error("credential storage failed for {session}: {context}: {source}")]
    Storage {
        session: String,
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The external connect call (or a request through the handle) failed.
    #[error("connection failed for {session}: {context}: {source}")]
    Connection {
        session: String,
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A pairing code was requested for a session that is already linked.
    #[error("session {session} is already authenticated")]
    AlreadyAuthenticated { session: String },

    /// No live session and no stored credentials for this identifier.
    #[error("unknown session: {session}")]
    NotFound { session: String },
}

impl Error {
    #[must_use]
    pub fn validation(field: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Validation {
            field,
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn storage(
        session: impl std::fmt::Display,
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            session: session.to_string(),
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn connection(
        session: impl std::fmt::Display,
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Connection {
            session: session.to_string(),
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn already_authenticated(session: impl std::fmt::Display) -> Self {
        Self::AlreadyAuthenticated {
            session: session.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(session: impl std::fmt::Display) -> Self {
        Self::NotFound {
            session: session.to_string(),
        }
    }

    /// Stable machine-readable name of the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Storage { .. } => "storage_error",
            Self::Connection { .. } => "connection_error",
            Self::AlreadyAuthenticated { .. } => "already_authenticated",
            Self::NotFound { .. } => "not_found",
        }
    }
}
