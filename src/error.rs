use thiserror::Error;

/// Error taxonomy for session operations. Every variant is resolved at the
/// offending action and reported only to the connection that issued it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    State(String),
}

impl SessionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SessionError::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        SessionError::Authorization(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        SessionError::State(msg.into())
    }
}
