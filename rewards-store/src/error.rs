use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to (de)serialize balances: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized delegation state status: {0}")]
    UnknownStatus(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
