//! Persistence for reconstructed delegation state: a Postgres-backed
//! store offering `(delegate, cycle)`-keyed upserts, rolling-window
//! pruning, and the `last_fetched_cycle` watermark the scheduler reads
//! on startup.

pub mod error;

use rewards_core::{
    Address, DelegationStateStatus, FetchedCycles, StoredBalanceInfo, StoredDelegationState,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

pub use error::{Result, StoreError};

/// `None` means archive mode: `prune` is a no-op regardless of what it's
/// called with.
#[derive(Clone, Copy, Debug, Default)]
pub struct StoreConfig {
    pub stored_cycles: Option<i64>,
}

pub struct Store {
    pool: PgPool,
    config: StoreConfig,
}

impl Store {
    pub async fn connect(database_url: &str, config: StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool, config })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delegation_states (
                delegate TEXT NOT NULL,
                cycle BIGINT NOT NULL,
                status TEXT NOT NULL,
                balances JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (delegate, cycle)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_delegation_states_cycle ON delegation_states(cycle)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fetched_cycles (
                cycle BIGINT PRIMARY KEY,
                state_count BIGINT NOT NULL,
                state_with_balance_count BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("store migrations complete");
        Ok(())
    }

    /// `INSERT ... ON CONFLICT (delegate, cycle) DO UPDATE` — the store
    /// MUST serialize conflicting writes to the same key (§5).
    pub async fn upsert_delegation_state(&self, state: &StoredDelegationState) -> Result<()> {
        let balances = serde_json::to_value(&state.balances)?;
        sqlx::query(
            r#"
            INSERT INTO delegation_states (delegate, cycle, status, balances, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (delegate, cycle) DO UPDATE SET
                status = EXCLUDED.status,
                balances = EXCLUDED.balances,
                updated_at = NOW()
            "#,
        )
        .bind(state.delegate.as_str())
        .bind(state.cycle)
        .bind(status_to_str(state.status))
        .bind(balances)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_delegation_state(
        &self,
        delegate: &Address,
        cycle: i64,
    ) -> Result<Option<StoredDelegationState>> {
        let row = sqlx::query(
            "SELECT delegate, cycle, status, balances FROM delegation_states WHERE delegate = $1 AND cycle = $2",
        )
        .bind(delegate.as_str())
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_state).transpose()
    }

    /// Every stored record for a cycle, ordered by delegate — backs the
    /// `/statistics/{cycle}` read endpoint's per-delegate rollup.
    pub async fn get_delegation_states_for_cycle(
        &self,
        cycle: i64,
    ) -> Result<Vec<StoredDelegationState>> {
        let rows = sqlx::query(
            "SELECT delegate, cycle, status, balances FROM delegation_states WHERE cycle = $1 ORDER BY delegate",
        )
        .bind(cycle)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_state).collect()
    }

    /// `prune`: removes every record with `cycle < current_cycle −
    /// stored_cycles`. A no-op in archive mode (`stored_cycles == None`).
    pub async fn prune(&self, current_cycle: i64) -> Result<u64> {
        let Some(threshold) = prune_threshold(current_cycle, self.config.stored_cycles) else {
            return Ok(0);
        };
        let result = sqlx::query("DELETE FROM delegation_states WHERE cycle < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await?;
        tracing::info!(threshold, removed = result.rows_affected(), "pruned delegation states");
        Ok(result.rows_affected())
    }

    /// Maximum stored cycle, or zero if the store is empty.
    pub async fn last_fetched_cycle(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(cycle), 0) AS max_cycle FROM delegation_states")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("max_cycle")?)
    }

    /// Recomputes the cycle's `state_count`/`state_with_balance_count`
    /// rollup from whatever is currently persisted for it and upserts the
    /// result. Called once a cycle's reconstructions have all settled, so
    /// `/statistics/{cycle}`'s sibling `fetched_cycles` row always reflects
    /// the states actually on disk.
    pub async fn refresh_fetched_cycles(&self, cycle: i64) -> Result<FetchedCycles> {
        let states = self.get_delegation_states_for_cycle(cycle).await?;
        let stats = fetched_cycles_from_states(cycle, &states);
        self.upsert_fetched_cycles(&stats).await?;
        Ok(stats)
    }

    pub async fn upsert_fetched_cycles(&self, stats: &FetchedCycles) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetched_cycles (cycle, state_count, state_with_balance_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (cycle) DO UPDATE SET
                state_count = EXCLUDED.state_count,
                state_with_balance_count = EXCLUDED.state_with_balance_count
            "#,
        )
        .bind(stats.cycle)
        .bind(stats.state_count)
        .bind(stats.state_with_balance_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_fetched_cycles(&self, cycle: i64) -> Result<Option<FetchedCycles>> {
        let row = sqlx::query(
            "SELECT cycle, state_count, state_with_balance_count FROM fetched_cycles WHERE cycle = $1",
        )
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(FetchedCycles {
                cycle: r.try_get("cycle")?,
                state_count: r.try_get("state_count")?,
                state_with_balance_count: r.try_get("state_with_balance_count")?,
            })
        })
        .transpose()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// The cutoff cycle below which rows are pruned, or `None` in archive mode
/// (`stored_cycles == None`) where nothing is ever pruned.
fn prune_threshold(current_cycle: i64, stored_cycles: Option<i64>) -> Option<i64> {
    stored_cycles.map(|stored| current_cycle - stored)
}

/// A state "has balance" if any entry beyond bookkeeping zeros carries a
/// nonzero delegated, staked, or overstaked amount — i.e. the delegate
/// actually has something on the books for the cycle, as opposed to an
/// all-zero record.
fn fetched_cycles_from_states(cycle: i64, states: &[StoredDelegationState]) -> FetchedCycles {
    let state_with_balance_count = states
        .iter()
        .filter(|state| {
            state.balances.values().any(|b| {
                b.delegated_balance != 0 || b.staked_balance != 0 || b.overstaked_balance != 0
            })
        })
        .count() as i64;

    FetchedCycles {
        cycle,
        state_count: states.len() as i64,
        state_with_balance_count,
    }
}

fn status_to_str(status: DelegationStateStatus) -> &'static str {
    match status {
        DelegationStateStatus::Ok => "Ok",
        DelegationStateStatus::MinimumNotAvailable => "MinimumNotAvailable",
    }
}

fn str_to_status(s: &str) -> Result<DelegationStateStatus> {
    match s {
        "Ok" => Ok(DelegationStateStatus::Ok),
        "MinimumNotAvailable" => Ok(DelegationStateStatus::MinimumNotAvailable),
        other => Err(StoreError::UnknownStatus(other.to_string())),
    }
}

fn row_to_state(row: sqlx::postgres::PgRow) -> Result<StoredDelegationState> {
    let delegate: String = row.try_get("delegate")?;
    let cycle: i64 = row.try_get("cycle")?;
    let status: String = row.try_get("status")?;
    let balances_json: serde_json::Value = row.try_get("balances")?;
    let balances: std::collections::BTreeMap<Address, StoredBalanceInfo> =
        serde_json::from_value(balances_json)?;

    Ok(StoredDelegationState {
        delegate: Address::new(delegate),
        cycle,
        status: str_to_status(&status)?,
        balances,
    })
}
