//! Chain Access Layer: a uniform, retrying, multi-provider reader over the
//! node RPC and a secondary indexer, exposing the typed query surface the
//! rest of the pipeline is built against.

mod client;
pub mod error;
#[cfg(feature = "mock")]
mod mock;
mod retry;
mod types;

pub use client::{ChainAccess, ChainAccessConfig, RpcChainAccess, QUERY_MAX_ATTEMPTS, RPC_INIT_MAX_ATTEMPTS};
pub use error::{ChainError, Result};
#[cfg(feature = "mock")]
pub use mock::MockChainAccess;
pub use retry::{backoff, call_with_rotation};
pub use types::{
    Block, BlockLevel, BlockMetadata, BalanceUpdate, DelegateInfo, DelegatedContracts,
    FinalizableUnstakeRequest, InternalResult, MinDelegated, Operation, OperationContent,
    OperationResult, UnfinalizableUnstakeRequests, UnstakeRequestAmount, UnstakeRequests,
};
