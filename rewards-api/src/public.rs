use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rewards_core::{Address, DelegationStateStatus, StoredDelegationState};
use serde::Serialize;
use serde_json::json;

use crate::ApiState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn json_ok<T: Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

/// Rewrites a caller-supplied cycle into the cycle the state was actually
/// stored under: the service's read surface addresses delegation state by
/// the cycle that granted the requested one's baking rights, not by the
/// cycle number itself.
async fn resolve_storage_cycle(state: &ApiState, cycle: i64) -> Result<i64, Response> {
    state
        .chain
        .baking_power_origin(cycle, &state.cancel)
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

async fn load_state(
    state: &ApiState,
    cycle: i64,
    address: &Address,
) -> Result<StoredDelegationState, Response> {
    let storage_cycle = resolve_storage_cycle(state, cycle).await?;
    match state.store.get_delegation_state(address, storage_cycle).await {
        Ok(Some(stored)) => Ok(stored),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            "Delegation state not found",
        )),
        Err(err) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

pub async fn get_delegation_state(
    State(state): State<ApiState>,
    Path((cycle, address)): Path<(i64, String)>,
) -> Response {
    state.metrics.record_request();
    let address = Address::new(address);
    match load_state(&state, cycle, &address).await {
        Ok(stored) => json_ok(stored),
        Err(resp) => {
            state.metrics.record_error();
            resp
        }
    }
}

pub async fn get_delegation_state_available(
    State(state): State<ApiState>,
    Path((cycle, address)): Path<(i64, String)>,
) -> Response {
    state.metrics.record_request();
    let address = Address::new(address);
    let storage_cycle = match resolve_storage_cycle(&state, cycle).await {
        Ok(c) => c,
        Err(resp) => {
            state.metrics.record_error();
            return resp;
        }
    };
    match state.store.get_delegation_state(&address, storage_cycle).await {
        Ok(stored) => json_ok(stored.is_some()),
        Err(err) => {
            state.metrics.record_error();
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

#[derive(Serialize)]
struct DelegateStatistics {
    external_staked: i64,
    own_staked: i64,
    external_delegated: i64,
    own_delegated: i64,
}

fn statistics_for(stored: &StoredDelegationState) -> DelegateStatistics {
    let mut own_staked = 0i64;
    let mut own_delegated = 0i64;
    let mut external_staked = 0i64;
    let mut external_delegated = 0i64;

    for (address, balance) in &stored.balances {
        if *address == stored.delegate {
            own_staked += balance.staked_balance;
            own_delegated += balance.delegated_balance;
        } else {
            external_staked += balance.staked_balance;
            external_delegated += balance.delegated_balance;
        }
    }

    DelegateStatistics {
        external_staked,
        own_staked,
        external_delegated,
        own_delegated,
    }
}

pub async fn get_statistics(State(state): State<ApiState>, Path(cycle): Path<i64>) -> Response {
    state.metrics.record_request();
    let states = match state.store.get_delegation_states_for_cycle(cycle).await {
        Ok(states) => states,
        Err(err) => {
            state.metrics.record_error();
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };

    let by_delegate: BTreeMap<Address, DelegateStatistics> = states
        .iter()
        .map(|stored| (stored.delegate.clone(), statistics_for(stored)))
        .collect();

    json_ok(by_delegate)
}

#[derive(Serialize)]
struct RewardsSplitDelegator {
    address: Address,
    #[serde(rename = "delegatedBalance")]
    delegated_balance: i64,
    #[serde(rename = "stakedBalance")]
    staked_balance: i64,
}

#[derive(Serialize)]
struct RewardsSplit {
    cycle: i64,
    #[serde(rename = "ownDelegatedBalance")]
    own_delegated_balance: i64,
    #[serde(rename = "ownStakedBalance")]
    own_staked_balance: i64,
    #[serde(rename = "externalDelegatedBalance")]
    external_delegated_balance: i64,
    #[serde(rename = "externalStakedBalance")]
    external_staked_balance: i64,
    #[serde(rename = "delegatorsCount")]
    delegators_count: usize,
    delegators: Vec<RewardsSplitDelegator>,
}

pub async fn get_rewards_split(
    State(state): State<ApiState>,
    Path((address, cycle)): Path<(String, i64)>,
) -> Response {
    state.metrics.record_request();
    let address = Address::new(address);
    let stored = match load_state(&state, cycle, &address).await {
        Ok(stored) => stored,
        Err(resp) => {
            state.metrics.record_error();
            return resp;
        }
    };

    if stored.status == DelegationStateStatus::MinimumNotAvailable {
        return (
            StatusCode::NO_CONTENT,
            Json(json!({ "error": "relevant minimum does not exist" })),
        )
            .into_response();
    }

    let mut own_delegated_balance = 0i64;
    let mut own_staked_balance = 0i64;
    let mut external_delegated_balance = 0i64;
    let mut external_staked_balance = 0i64;
    let mut delegators = Vec::new();

    for (delegator, balance) in &stored.balances {
        if *delegator == stored.delegate {
            own_delegated_balance += balance.delegated_balance;
            own_staked_balance += balance.staked_balance;
            continue;
        }
        external_delegated_balance += balance.delegated_balance;
        external_staked_balance += balance.staked_balance;
        delegators.push(RewardsSplitDelegator {
            address: delegator.clone(),
            delegated_balance: balance.delegated_balance,
            staked_balance: balance.staked_balance,
        });
    }

    json_ok(RewardsSplit {
        cycle,
        own_delegated_balance,
        own_staked_balance,
        external_delegated_balance,
        external_staked_balance,
        delegators_count: delegators.len(),
        delegators,
    })
}

pub async fn health(State(state): State<ApiState>) -> Response {
    match state.store.last_fetched_cycle().await {
        Ok(cycle) => json_ok(json!({ "status": "ok", "last_fetched_cycle": cycle })),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn metrics(State(state): State<ApiState>) -> Response {
    (StatusCode::OK, state.metrics.export()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewards_core::StoredBalanceInfo;
    use std::collections::BTreeMap;

    fn balance(delegated: i64, staked: i64) -> StoredBalanceInfo {
        StoredBalanceInfo {
            delegated_balance: delegated,
            staked_balance: staked,
            overstaked_balance: 0,
        }
    }

    #[test]
    fn statistics_splits_own_from_external() {
        let delegate = Address::new("tz1Baker");
        let mut balances = BTreeMap::new();
        balances.insert(delegate.clone(), balance(100, 1000));
        balances.insert(Address::new("tz1Delegator1"), balance(200, 0));
        balances.insert(Address::new("tz1Delegator2"), balance(300, 0));

        let stored = StoredDelegationState {
            delegate: delegate.clone(),
            cycle: 750,
            status: DelegationStateStatus::Ok,
            balances,
        };

        let stats = statistics_for(&stored);
        assert_eq!(stats.own_delegated, 100);
        assert_eq!(stats.own_staked, 1000);
        assert_eq!(stats.external_delegated, 500);
        assert_eq!(stats.external_staked, 0);
    }
}
