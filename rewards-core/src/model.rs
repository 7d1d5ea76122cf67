use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Z;

/// Sampled at a cycle's last block (spec'd sampling point, never the
/// minimum-delegated block).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingParameters {
    pub limit_of_staking_over_baking_millionth: i64,
    pub edge_of_baking_over_staking_billionth: i64,
}

/// Per-address snapshot inside a `DelegationState`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationStateBalanceInfo {
    /// Liquid balance at the pre-minimum-block point.
    pub balance: Z,
    /// Bonded stake, sampled at the cycle's last block.
    pub staked_balance: Z,
    /// Sum of pending unstake requests attributed to `baker`.
    pub unstaked_balance: Z,
    /// The address this contract delegates to at the pre-min-block point.
    pub baker: Address,
    /// The baker this contract currently stakes with; may lag `baker`
    /// during a mid-cycle redelegation window.
    pub stake_baker: Address,
}

impl DelegationStateBalanceInfo {
    pub fn new(owner_baker: Address) -> Self {
        Self {
            balance: Z::zero(),
            staked_balance: Z::zero(),
            unstaked_balance: Z::zero(),
            stake_baker: owner_baker.clone(),
            baker: owner_baker,
        }
    }
}

/// Where in the block a reconstruction converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CreationInfoKind {
    BlockBeginning,
    BlockMetadata,
    TransactionMetadata,
    TransactionResult,
    TransactionInternalResult,
    Delegation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationInfo {
    pub kind: CreationInfoKind,
    pub level: i64,
    pub operation_hash: Option<String>,
    pub transaction_index: Option<i64>,
    pub internal_result_index: Option<i64>,
}

impl CreationInfo {
    pub fn block_beginning(level: i64) -> Self {
        Self {
            kind: CreationInfoKind::BlockBeginning,
            level,
            operation_hash: None,
            transaction_index: None,
            internal_result_index: None,
        }
    }
}

/// In-memory reconstruction state for one (cycle, baker) pair. Mutation is
/// confined to the single worker reconstructing this pair; see
/// `rewards-state` for the mutation API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationState {
    pub baker: Address,
    pub cycle: i64,
    pub parameters: StakingParameters,
    pub created_at: CreationInfo,
    pub balances: BTreeMap<Address, DelegationStateBalanceInfo>,
}

impl DelegationState {
    pub fn new(baker: Address, cycle: i64, parameters: StakingParameters) -> Self {
        Self {
            baker,
            cycle,
            parameters,
            created_at: CreationInfo::block_beginning(0),
            balances: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DelegationStateStatus {
    Ok,
    MinimumNotAvailable,
}

/// Overstake-adjusted per-delegator breakdown, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBalanceInfo {
    pub delegated_balance: i64,
    pub staked_balance: i64,
    pub overstaked_balance: i64,
}

/// The frozen, persisted form of a `DelegationState`. Composite primary
/// key `(delegate, cycle)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDelegationState {
    pub delegate: Address,
    pub cycle: i64,
    pub status: DelegationStateStatus,
    pub balances: BTreeMap<Address, StoredBalanceInfo>,
}

/// Per-cycle rollup the original computes alongside the stored states
/// (`store/models.go`); not itself part of the reconstruction algorithm,
/// but exposed by the `/statistics/{cycle}` read endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedCycles {
    pub cycle: i64,
    pub state_count: i64,
    pub state_with_balance_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_balance_info_starts_self_delegated() {
        let baker = Address::new("tz1Baker");
        let info = DelegationStateBalanceInfo::new(baker.clone());
        assert_eq!(info.baker, baker);
        assert_eq!(info.stake_baker, baker);
        assert!(info.balance.is_zero());
    }
}
