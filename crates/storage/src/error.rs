use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid access code")]
    AccessDenied,
    #[error("{0}")]
    Validation(String),
    /// Same answer whether the id never existed or has expired.
    #[error("file not found or expired")]
    NotFoundOrExpired,
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl RelayError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }
}
