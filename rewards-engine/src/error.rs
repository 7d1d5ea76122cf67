use rewards_chain::ChainError;
use rewards_state::StateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconstructError {
    #[error("chain access error: {0}")]
    Chain(#[from] ChainError),

    #[error("delegation-state mutation error: {0}")]
    State(#[from] StateError),

    #[error("failed to fetch contract balances after retries")]
    FailedToFetchContractBalances,

    #[error("minimum delegated balance not found in block replay")]
    MinimumDelegatedBalanceNotFound,

    #[error("reconstruction cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ReconstructError>;
