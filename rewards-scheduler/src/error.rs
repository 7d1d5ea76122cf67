use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("cycle {0} has not completed yet")]
    CycleDidNotEndYet(i64),

    #[error(transparent)]
    Chain(#[from] rewards_chain::ChainError),

    #[error(transparent)]
    Store(#[from] rewards_store::StoreError),

    #[error(transparent)]
    Reconstruct(#[from] rewards_engine::ReconstructError),

    #[error("reconstruction cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
