use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rewards_core::Address;
use serde_json::json;

use crate::ApiState;

fn force_flag(query: &HashMap<String, String>) -> bool {
    query.get("force").map(|v| v == "true").unwrap_or(false)
}

/// Triggers `fetch_cycle` in the background and returns immediately; the
/// caller polls the public read surface for the result.
pub async fn fetch_cycle(
    State(state): State<ApiState>,
    Path(cycle): Path<i64>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.metrics.record_request();
    let force = force_flag(&query);
    let scheduler = state.scheduler.clone();
    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler.fetch_cycle(cycle, force, &cancel).await {
            tracing::warn!(cycle, error = %err, "force-triggered cycle fetch failed");
        }
    });
    (StatusCode::OK, Json(json!({ "cycle": cycle }))).into_response()
}

pub async fn fetch_delegate(
    State(state): State<ApiState>,
    Path((cycle, address)): Path<(i64, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.metrics.record_request();
    let force = force_flag(&query);
    let address = Address::new(address);
    let scheduler = state.scheduler.clone();
    let cancel = state.cancel.clone();
    let address_for_spawn = address.clone();
    tokio::spawn(async move {
        if let Err(err) = scheduler
            .fetch_delegate(cycle, address_for_spawn.clone(), force, &cancel)
            .await
        {
            tracing::warn!(cycle, baker = %address_for_spawn, error = %err, "force-triggered delegate fetch failed");
        }
    });
    (
        StatusCode::OK,
        Json(json!({ "cycle": cycle, "address": address.as_str() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_flag_defaults_to_false() {
        assert!(!force_flag(&HashMap::new()));
    }

    #[test]
    fn force_flag_requires_exact_literal_true() {
        let mut query = HashMap::new();
        query.insert("force".to_string(), "1".to_string());
        assert!(!force_flag(&query));

        query.insert("force".to_string(), "true".to_string());
        assert!(force_flag(&query));
    }
}
