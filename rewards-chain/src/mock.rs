//! Test double for `ChainAccess`. Ships behind the `mock` feature so it
//! never lands in release builds, but is a real dependency of
//! `rewards-engine`/`rewards-scheduler`'s test suites — the Rust-native
//! substitute for the original's interface-based collector swap.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rewards_core::{Address, StakingParameters, Z};
use tokio_util::sync::CancellationToken;

use crate::client::ChainAccess;
use crate::error::Result;
use crate::types::{Block, BlockLevel, DelegateInfo, DelegatedContracts, UnstakeRequests};

#[derive(Default)]
pub struct MockChainAccess {
    pub head_cycle: RwLock<i64>,
    pub last_completed: RwLock<(i64, BlockLevel)>,
    pub consensus_rights_delay: RwLock<i64>,
    pub cycle_end_heights: RwLock<HashMap<i64, BlockLevel>>,
    pub active_delegates_by_block: RwLock<HashMap<BlockLevel, Vec<Address>>>,
    pub delegates: RwLock<HashMap<(Address, BlockLevel), DelegateInfo>>,
    pub balances: RwLock<HashMap<(Address, BlockLevel), Z>>,
    pub staked_balances: RwLock<HashMap<(Address, BlockLevel), Z>>,
    pub delegate_of: RwLock<HashMap<(Address, BlockLevel), Option<Address>>>,
    pub unstake_requests: RwLock<HashMap<(Address, BlockLevel), UnstakeRequests>>,
    pub staking_parameters: RwLock<HashMap<(Address, BlockLevel), StakingParameters>>,
    pub delegated_contracts: RwLock<HashMap<(Address, BlockLevel), DelegatedContracts>>,
    pub blocks: RwLock<HashMap<BlockLevel, Block>>,
    pub unstake_candidates: RwLock<HashMap<Address, Vec<Address>>>,
}

impl MockChainAccess {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChainAccess for MockChainAccess {
    async fn protocol_head_cycle(&self, _cancel: &CancellationToken) -> Result<i64> {
        Ok(*self.head_cycle.read())
    }

    async fn last_completed_cycle(&self, _cancel: &CancellationToken) -> Result<(i64, BlockLevel)> {
        Ok(*self.last_completed.read())
    }

    async fn baking_power_origin(&self, cycle: i64, _cancel: &CancellationToken) -> Result<i64> {
        Ok(cycle - 1 - *self.consensus_rights_delay.read())
    }

    async fn cycle_end_height(&self, cycle: i64, _cancel: &CancellationToken) -> Result<BlockLevel> {
        Ok(*self.cycle_end_heights.read().get(&cycle).unwrap_or(&0))
    }

    async fn active_delegates(
        &self,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Address>> {
        Ok(self
            .active_delegates_by_block
            .read()
            .get(&block)
            .cloned()
            .unwrap_or_default())
    }

    async fn delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<DelegateInfo> {
        Ok(self
            .delegates
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or_else(|| DelegateInfo {
                min_delegated: crate::types::MinDelegated {
                    amount: Z::zero(),
                    level: 0,
                    cycle: 0,
                },
                delegated_contracts: Vec::new(),
                full_balance: Z::zero(),
                current_frozen_deposits: Z::zero(),
                balance: Z::zero(),
            }))
    }

    async fn contract_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<Z> {
        Ok(self
            .balances
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or_else(Z::zero))
    }

    async fn contract_staked_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<Z> {
        Ok(self
            .staked_balances
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or_else(Z::zero))
    }

    async fn contract_delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<Option<Address>> {
        Ok(self
            .delegate_of
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or(None))
    }

    async fn contract_unstake_requests(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<UnstakeRequests> {
        Ok(self
            .unstake_requests
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or_default())
    }

    async fn delegate_active_staking_parameters(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<StakingParameters> {
        Ok(self
            .staking_parameters
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or(StakingParameters {
                limit_of_staking_over_baking_millionth: 0,
                edge_of_baking_over_staking_billionth: 0,
            }))
    }

    async fn delegate_delegated_contracts(
        &self,
        address: &Address,
        block: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<DelegatedContracts> {
        Ok(self
            .delegated_contracts
            .read()
            .get(&(address.clone(), block))
            .cloned()
            .unwrap_or(DelegatedContracts::Contracts(Vec::new())))
    }

    async fn block(&self, level: BlockLevel, _cancel: &CancellationToken) -> Result<Block> {
        Ok(self.blocks.read().get(&level).cloned().unwrap_or(Block {
            level,
            operations: Vec::new(),
            metadata: crate::types::BlockMetadata::default(),
        }))
    }

    async fn unstake_request_candidates(
        &self,
        baker: &Address,
        _upto_level: BlockLevel,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Address>> {
        Ok(self
            .unstake_candidates
            .read()
            .get(baker)
            .cloned()
            .unwrap_or_default())
    }
}
