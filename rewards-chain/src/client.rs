use std::time::Duration;

use async_trait::async_trait;
use rewards_core::{Address, StakingParameters, Z};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ChainError, Result};
use crate::retry::{backoff, call_with_rotation};
use crate::types::{
    Block, BlockLevel, BlockMetadata, DelegateInfo, DelegatedContracts, FinalizableUnstakeRequest,
    InternalResult, MinDelegated, Operation, OperationContent, OperationResult,
    UnfinalizableUnstakeRequests, UnstakeRequestAmount, UnstakeRequests,
};

/// Number of RPC init probes attempted per provider before giving up on it.
pub const RPC_INIT_MAX_ATTEMPTS: u32 = 3;
/// Retry rounds for every query, per the universal failure semantics.
pub const QUERY_MAX_ATTEMPTS: u32 = 3;

/// Uniform, retrying, multi-provider reader over the node RPC and the
/// secondary indexer. Every method masks provider rotation and retries
/// behind a small typed surface.
#[async_trait]
pub trait ChainAccess: Send + Sync {
    async fn protocol_head_cycle(&self, cancel: &CancellationToken) -> Result<i64>;

    async fn last_completed_cycle(&self, cancel: &CancellationToken) -> Result<(i64, BlockLevel)>;

    async fn baking_power_origin(&self, cycle: i64, cancel: &CancellationToken) -> Result<i64>;

    async fn cycle_end_height(&self, cycle: i64, cancel: &CancellationToken) -> Result<BlockLevel>;

    async fn active_delegates(
        &self,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Vec<Address>>;

    async fn delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<DelegateInfo>;

    async fn contract_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Z>;

    async fn contract_staked_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Z>;

    async fn contract_delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Option<Address>>;

    async fn contract_unstake_requests(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<UnstakeRequests>;

    async fn delegate_active_staking_parameters(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<StakingParameters>;

    async fn delegate_delegated_contracts(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<DelegatedContracts>;

    async fn block(&self, level: BlockLevel, cancel: &CancellationToken) -> Result<Block>;

    async fn unstake_request_candidates(
        &self,
        baker: &Address,
        upto_level: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Vec<Address>>;
}

#[derive(Clone, Debug)]
pub struct ChainAccessConfig {
    pub rpc_providers: Vec<String>,
    pub indexer_providers: Vec<String>,
    pub call_timeout: Duration,
    pub init_batch_size: usize,
}

impl Default for ChainAccessConfig {
    fn default() -> Self {
        Self {
            rpc_providers: Vec::new(),
            indexer_providers: Vec::new(),
            call_timeout: Duration::from_secs(30),
            init_batch_size: 3,
        }
    }
}

/// Live `ChainAccess` over HTTP, fanning out across `rpc_providers` with
/// the universal retry-with-rotation policy. `indexer_providers` is
/// consulted only for `unstake_request_candidates`.
pub struct RpcChainAccess {
    client: reqwest::Client,
    rpc_providers: Vec<String>,
    indexer_providers: Vec<String>,
}

impl RpcChainAccess {
    /// Probes every configured RPC URL's protocol parameters, keeping only
    /// the ones that initialize within `RPC_INIT_MAX_ATTEMPTS` probes.
    /// Fails fast if zero clients remain.
    pub async fn connect(config: ChainAccessConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(ChainError::Transport)?;

        let mut alive = Vec::new();
        for url in &config.rpc_providers {
            if Self::probe(&client, url).await {
                alive.push(url.clone());
            } else {
                tracing::warn!(provider = %url, "RPC provider failed to initialize");
            }
        }

        if alive.is_empty() {
            return Err(ChainError::NoProvidersAvailable);
        }

        Ok(Self {
            client,
            rpc_providers: alive,
            indexer_providers: config.indexer_providers,
        })
    }

    async fn probe(client: &reqwest::Client, url: &str) -> bool {
        for attempt in 0..RPC_INIT_MAX_ATTEMPTS {
            let resp = client
                .get(format!("{url}/chains/main/blocks/head/context/constants"))
                .send()
                .await;
            if matches!(resp, Ok(r) if r.status().is_success()) {
                return true;
            }
            if attempt + 1 < RPC_INIT_MAX_ATTEMPTS {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
        false
    }

    async fn get_json(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        let providers = self.rpc_providers.clone();
        let client = &self.client;
        call_with_rotation(&providers, QUERY_MAX_ATTEMPTS, cancel, |base| {
            let url = format!("{base}{path}");
            async move {
                let resp = client.get(&url).send().await.map_err(ChainError::Transport)?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(Value::Null);
                }
                resp.json::<Value>().await.map_err(ChainError::Transport)
            }
        })
        .await
    }

    async fn get_json_indexer(&self, path: &str, cancel: &CancellationToken) -> Result<Value> {
        let providers = self.indexer_providers.clone();
        let client = &self.client;
        call_with_rotation(&providers, QUERY_MAX_ATTEMPTS, cancel, |base| {
            let url = format!("{base}{path}");
            async move {
                let resp = client.get(&url).send().await.map_err(ChainError::Transport)?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(Value::Null);
                }
                resp.json::<Value>().await.map_err(ChainError::Transport)
            }
        })
        .await
    }
}

fn z_of(v: &Value, field: &str) -> Z {
    v.get(field)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<i64>().ok())
        .map(Z::from_i64)
        .unwrap_or_else(Z::zero)
}

fn addr_of(v: &Value, field: &str) -> Option<Address> {
    v.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(Address::new)
}

fn addresses(v: &Value) -> Vec<Address> {
    v.as_array()
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(Address::new)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ChainAccess for RpcChainAccess {
    async fn protocol_head_cycle(&self, cancel: &CancellationToken) -> Result<i64> {
        let head = self
            .get_json("/chains/main/blocks/head/helpers/current_level", cancel)
            .await?;
        head.get("cycle")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChainError::Decode("missing cycle in head level".into()))
    }

    async fn last_completed_cycle(&self, cancel: &CancellationToken) -> Result<(i64, BlockLevel)> {
        let head = self
            .get_json("/chains/main/blocks/head/helpers/current_level", cancel)
            .await?;
        let head_cycle = head
            .get("cycle")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChainError::Decode("missing cycle in head level".into()))?;
        let head_level = head
            .get("level")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChainError::Decode("missing level in head level".into()))?;
        let cycle_position = head
            .get("cycle_position")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let cycle = head_cycle - 1;
        let last_block_level = head_level - cycle_position - 1;
        Ok((cycle, last_block_level))
    }

    async fn baking_power_origin(&self, cycle: i64, cancel: &CancellationToken) -> Result<i64> {
        let constants = self
            .get_json("/chains/main/blocks/head/context/constants", cancel)
            .await?;
        let delay = constants
            .get("consensus_rights_delay")
            .and_then(Value::as_i64)
            .unwrap_or(2);
        Ok(cycle - 1 - delay)
    }

    async fn cycle_end_height(&self, cycle: i64, cancel: &CancellationToken) -> Result<BlockLevel> {
        let info = self
            .get_json(&format!("/chains/main/blocks/head/context/raw/json/cycle/{cycle}"), cancel)
            .await?;
        info.get("last_level")
            .or_else(|| info.get("level"))
            .and_then(Value::as_i64)
            .ok_or_else(|| ChainError::Decode(format!("no end height for cycle {cycle}")))
    }

    async fn active_delegates(
        &self,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Vec<Address>> {
        let v = self
            .get_json(
                &format!("/chains/main/blocks/{block}/context/delegates?active=true"),
                cancel,
            )
            .await?;
        Ok(addresses(&v))
    }

    async fn delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<DelegateInfo> {
        let v = self
            .get_json(
                &format!("/chains/main/blocks/{block}/context/delegates/{address}"),
                cancel,
            )
            .await?;

        let min_delegated_value = v.get("min_delegated_in_current_cycle");
        let min_delegated = MinDelegated {
            amount: min_delegated_value
                .and_then(|m| m.get("amount"))
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .map(Z::from_i64)
                .unwrap_or_else(Z::zero),
            level: min_delegated_value
                .and_then(|m| m.get("level"))
                .and_then(|l| l.get("level"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
            cycle: min_delegated_value
                .and_then(|m| m.get("level"))
                .and_then(|l| l.get("cycle"))
                .and_then(Value::as_i64)
                .unwrap_or(0),
        };

        Ok(DelegateInfo {
            min_delegated,
            delegated_contracts: addresses(v.get("delegated_contracts").unwrap_or(&Value::Null)),
            full_balance: z_of(&v, "full_balance"),
            current_frozen_deposits: z_of(&v, "current_frozen_deposits"),
            balance: z_of(&v, "balance"),
        })
    }

    async fn contract_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Z> {
        let v = self
            .get_json(
                &format!("/chains/main/blocks/{block}/context/contracts/{address}/balance"),
                cancel,
            )
            .await?;
        Ok(v.as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Z::from_i64)
            .unwrap_or_else(Z::zero))
    }

    async fn contract_staked_balance(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Z> {
        let v = self
            .get_json(
                &format!(
                    "/chains/main/blocks/{block}/context/contracts/{address}/staked_balance"
                ),
                cancel,
            )
            .await?;
        Ok(v.as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Z::from_i64)
            .unwrap_or_else(Z::zero))
    }

    async fn contract_delegate(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Option<Address>> {
        let v = self
            .get_json(
                &format!("/chains/main/blocks/{block}/context/contracts/{address}/delegate"),
                cancel,
            )
            .await?;
        Ok(v.as_str().map(Address::new))
    }

    async fn contract_unstake_requests(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<UnstakeRequests> {
        let v = self
            .get_json(
                &format!(
                    "/chains/main/blocks/{block}/context/contracts/{address}/unstake_requests"
                ),
                cancel,
            )
            .await?;
        if v.is_null() {
            return Ok(UnstakeRequests::default());
        }

        let finalizable = v
            .get("finalizable")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|r| FinalizableUnstakeRequest {
                        delegate: addr_of(r, "delegate").unwrap_or_else(|| Address::new("")),
                        amount: z_of(r, "amount"),
                        cycle: r.get("cycle").and_then(Value::as_i64).unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let unfinalizable = v.get("unfinalizable").map(|u| UnfinalizableUnstakeRequests {
            delegate: addr_of(u, "delegate"),
            requests: u
                .get("requests")
                .and_then(Value::as_array)
                .map(|arr| {
                    arr.iter()
                        .map(|r| UnstakeRequestAmount {
                            amount: z_of(r, "amount"),
                            cycle: r.get("cycle").and_then(Value::as_i64).unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default(),
        });

        Ok(UnstakeRequests {
            finalizable,
            unfinalizable,
        })
    }

    async fn delegate_active_staking_parameters(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<StakingParameters> {
        let v = self
            .get_json(
                &format!(
                    "/chains/main/blocks/{block}/context/delegates/{address}/active_staking_parameters"
                ),
                cancel,
            )
            .await?;
        Ok(StakingParameters {
            limit_of_staking_over_baking_millionth: v
                .get("limit_of_staking_over_baking_millionth")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            edge_of_baking_over_staking_billionth: v
                .get("edge_of_baking_over_staking_billionth")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        })
    }

    async fn delegate_delegated_contracts(
        &self,
        address: &Address,
        block: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<DelegatedContracts> {
        let v = self
            .get_json(
                &format!(
                    "/chains/main/blocks/{block}/context/delegates/{address}/delegated_contracts"
                ),
                cancel,
            )
            .await?;
        if v.get("delegate.not_registered").is_some() {
            return Ok(DelegatedContracts::NotRegistered);
        }
        Ok(DelegatedContracts::Contracts(addresses(&v)))
    }

    async fn block(&self, level: BlockLevel, cancel: &CancellationToken) -> Result<Block> {
        let v = self
            .get_json(&format!("/chains/main/blocks/{level}"), cancel)
            .await?;

        let metadata = BlockMetadata {
            balance_updates: parse_balance_updates(
                v.get("metadata").and_then(|m| m.get("balance_updates")),
            ),
        };

        let operations = v
            .get("operations")
            .and_then(Value::as_array)
            .map(|passes| {
                passes
                    .iter()
                    .map(|pass| {
                        pass.as_array()
                            .map(|ops| ops.iter().map(parse_operation).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Block {
            level,
            operations,
            metadata,
        })
    }

    async fn unstake_request_candidates(
        &self,
        baker: &Address,
        upto_level: BlockLevel,
        cancel: &CancellationToken,
    ) -> Result<Vec<Address>> {
        let v = self
            .get_json_indexer(
                &format!(
                    "/v1/operations/unstake_requests?delegate={baker}&level.le={upto_level}"
                ),
                cancel,
            )
            .await?;
        let mut out: Vec<Address> = v
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| r.get("sender").and_then(Value::as_str))
                    .map(Address::new)
                    .collect()
            })
            .unwrap_or_default();
        out.retain(|a| a != baker);
        Ok(out)
    }
}

fn parse_balance_updates(v: Option<&Value>) -> Vec<crate::types::BalanceUpdate> {
    v.and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|u| crate::types::BalanceUpdate {
                    address: addr_of(u, "contract")
                        .or_else(|| addr_of(u, "delegate"))
                        .unwrap_or_else(|| Address::new("")),
                    amount: u
                        .get("change")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<i64>().ok())
                        .map(Z::from_i64)
                        .unwrap_or_else(Z::zero),
                    kind: u
                        .get("kind")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    category: u
                        .get("category")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_operation(v: &Value) -> Operation {
    let hash = v
        .get("hash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let contents = v
        .get("contents")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(parse_operation_content).collect())
        .unwrap_or_default();

    Operation { hash, contents }
}

fn parse_operation_content(c: &Value) -> OperationContent {
    let kind = c.get("kind").and_then(Value::as_str).unwrap_or_default();
    let is_delegation = kind == "delegation";

    let meta_balance_updates = parse_balance_updates(
        c.get("metadata").and_then(|m| m.get("balance_updates")),
    );

    let result = c
        .get("metadata")
        .and_then(|m| m.get("operation_result"))
        .map(|r| OperationResult {
            balance_updates: parse_balance_updates(r.get("balance_updates")),
        })
        .unwrap_or(OperationResult {
            balance_updates: Vec::new(),
        });

    let internal_results = c
        .get("metadata")
        .and_then(|m| m.get("internal_operation_results"))
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|ir| {
                    let ir_kind = ir.get("kind").and_then(Value::as_str).unwrap_or_default();
                    let is_ir_delegation = ir_kind == "delegation";
                    InternalResult {
                        is_delegation: is_ir_delegation,
                        delegation_source: if is_ir_delegation {
                            addr_of(ir, "source")
                        } else {
                            None
                        },
                        delegation_target: if is_ir_delegation {
                            addr_of(ir, "delegate")
                        } else {
                            None
                        },
                        result: ir
                            .get("result")
                            .map(|r| OperationResult {
                                balance_updates: parse_balance_updates(r.get("balance_updates")),
                            })
                            .unwrap_or(OperationResult {
                                balance_updates: Vec::new(),
                            }),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    OperationContent {
        is_delegation,
        delegation_source: if is_delegation {
            addr_of(c, "source")
        } else {
            None
        },
        delegation_target: if is_delegation {
            addr_of(c, "delegate")
        } else {
            None
        },
        meta_balance_updates,
        result,
        internal_results,
    }
}
