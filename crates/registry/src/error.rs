use serde::Serialize;

/// Engine errors, one variant per failure class.
///
/// Display renders the raw cause so it can be surfaced verbatim in
/// notifications.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad reference string, missing or malformed catalog. Aborts the registry.
    #[error("{0}")]
    Configuration(String),
    /// Descriptor missing required fields. Excludes only that package.
    #[error("{0}")]
    Validation(String),
    /// Transport failure, timeout, or unexpected HTTP status.
    #[error("{0}")]
    Network(String),
    /// Overwrite of a locally customized record without confirmation.
    #[error("{0}")]
    Conflict(String),
    /// Path traversal or a record pointing outside its managed root.
    #[error("{0}")]
    Integrity(String),
    /// Destination lifecycle rule forbids the operation.
    #[error("{0}")]
    NotPermitted(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], stable across messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Network,
    Conflict,
    Integrity,
    NotPermitted,
    Io,
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    #[must_use]
    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::NotPermitted(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Network(_) => ErrorKind::Network,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::NotPermitted(_) => ErrorKind::NotPermitted,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Configuration,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Network(format!("request timed out: {e}"));
        }
        Self::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
