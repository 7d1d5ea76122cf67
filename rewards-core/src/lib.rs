//! Shared data model for the delegation-state reconstruction pipeline:
//! addresses, arbitrary-precision amounts, and the state/record types every
//! other crate in the workspace builds on.

mod address;
mod amount;
pub mod error;
mod model;

pub use address::Address;
pub use amount::{OVERSTAKE_PRECISION, Z};
pub use error::{CoreError, Result};
pub use model::{
    CreationInfo, CreationInfoKind, DelegationState, DelegationStateBalanceInfo,
    DelegationStateStatus, FetchedCycles, StakingParameters, StoredBalanceInfo,
    StoredDelegationState,
};
