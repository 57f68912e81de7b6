use thiserror::Error;

/// Failure taxonomy shared by the store, the pollers and the HTTP layer.
///
/// Client-correctable failures are raised before any mutation happens.
/// `Store` wraps everything else and is never shown to the client verbatim.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not allowed: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Store failures are transient from the caller's point of view;
    /// everything else is a final answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
