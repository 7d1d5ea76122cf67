use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook configuration is invalid: {0}")]
    InvalidConfiguration(String),

    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
