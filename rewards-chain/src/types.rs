use rewards_core::{Address, Z};
use serde::{Deserialize, Serialize};

/// A block level. Every CAL query that needs a point in time takes one.
pub type BlockLevel = i64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinDelegated {
    pub amount: Z,
    pub level: BlockLevel,
    pub cycle: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateInfo {
    pub min_delegated: MinDelegated,
    pub delegated_contracts: Vec<Address>,
    pub full_balance: Z,
    pub current_frozen_deposits: Z,
    pub balance: Z,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeRequestAmount {
    pub amount: Z,
    pub cycle: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizableUnstakeRequest {
    pub delegate: Address,
    pub amount: Z,
    pub cycle: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfinalizableUnstakeRequests {
    pub delegate: Option<Address>,
    pub requests: Vec<UnstakeRequestAmount>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeRequests {
    pub finalizable: Vec<FinalizableUnstakeRequest>,
    pub unfinalizable: Option<UnfinalizableUnstakeRequests>,
}

/// `delegate_delegated_contracts` distinguishes "this address isn't a
/// registered baker at all" from "a registered baker with zero delegators".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegatedContracts {
    Contracts(Vec<Address>),
    NotRegistered,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub address: Address,
    pub amount: Z,
    pub kind: String,
    pub category: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub balance_updates: Vec<BalanceUpdate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalResult {
    pub is_delegation: bool,
    /// Source contract of the delegation (only set when `is_delegation`).
    pub delegation_source: Option<Address>,
    /// New delegate target (only set when `is_delegation`).
    pub delegation_target: Option<Address>,
    pub result: OperationResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContent {
    pub is_delegation: bool,
    pub delegation_source: Option<Address>,
    pub delegation_target: Option<Address>,
    pub meta_balance_updates: Vec<BalanceUpdate>,
    pub result: OperationResult,
    pub internal_results: Vec<InternalResult>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub hash: String,
    pub contents: Vec<OperationContent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub balance_updates: Vec<BalanceUpdate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub level: BlockLevel,
    /// Batches of operations, as laid out on the block (`operations[pass][i]`).
    pub operations: Vec<Vec<Operation>>,
    pub metadata: BlockMetadata,
}
