use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("no RPC providers initialized successfully")]
    NoProvidersAvailable,

    #[error("all providers exhausted: {0}")]
    ProvidersExhausted(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, ChainError>;
