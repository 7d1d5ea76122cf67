use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid amount literal: {0}")]
    InvalidAmount(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
