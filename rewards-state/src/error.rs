use rewards_core::Address;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("balance not found for address {0}")]
    BalanceNotFound(Address),

    #[error("delegator not found for address {0}")]
    DelegatorNotFound(Address),
}

pub type Result<T> = std::result::Result<T, StateError>;
