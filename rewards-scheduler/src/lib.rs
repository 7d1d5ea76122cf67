//! Cycle Scheduler: detects newly completed cycles, fans reconstruction out
//! across bakers with an in-flight dedupe set, and drives the store's
//! rolling-window pruning.

pub mod error;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rewards_chain::ChainAccess;
use rewards_core::Address;
use rewards_engine::{reconstruct, ReconstructConfig};
use rewards_notify::Notifier;
use rewards_store::Store;
use tokio_util::sync::CancellationToken;

pub use error::{Result, SchedulerError};

/// How often the automatic loop checks for newly completed cycles.
pub const AUTOMATIC_LOOP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Bakers reconstructed concurrently per `fetch_cycle` call.
pub const RECONSTRUCTION_CONCURRENCY: usize = 8;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub reconstruction_concurrency: usize,
    pub automatic_loop_interval: Duration,
    /// Restricts `fetch_cycle` to this subset of bakers when set, mirroring
    /// the config's optional `delegates` filter.
    pub delegate_filter: Option<Vec<Address>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconstruction_concurrency: RECONSTRUCTION_CONCURRENCY,
            automatic_loop_interval: AUTOMATIC_LOOP_INTERVAL,
            delegate_filter: None,
        }
    }
}

/// `Idle → Fetching → (Stored | Failed)` per (cycle, baker) pair, tracked
/// only for the pairs currently `Fetching` (the in-flight dedupe set);
/// `Idle`/`Stored`/`Failed` are never materialized as a record, only
/// observed via the store and the absence of an in-flight entry.
struct InFlight {
    set: RwLock<HashSet<(i64, Address)>>,
}

impl InFlight {
    fn new() -> Self {
        Self {
            set: RwLock::new(HashSet::new()),
        }
    }

    fn try_enter(&self, cycle: i64, baker: &Address) -> bool {
        self.set.write().insert((cycle, baker.clone()))
    }

    fn contains(&self, cycle: i64, baker: &Address) -> bool {
        self.set.read().contains(&(cycle, baker.clone()))
    }

    fn leave(&self, cycle: i64, baker: &Address) {
        self.set.write().remove(&(cycle, baker.clone()));
    }
}

pub struct Scheduler {
    chain: Arc<dyn ChainAccess>,
    store: Arc<Store>,
    notifier: Option<Notifier>,
    reconstruct_config: ReconstructConfig,
    config: SchedulerConfig,
    in_flight: InFlight,
    last_fetched_cycle: RwLock<Option<i64>>,
}

impl Scheduler {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        store: Arc<Store>,
        notifier: Option<Notifier>,
        reconstruct_config: ReconstructConfig,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain,
            store,
            notifier,
            reconstruct_config,
            config,
            in_flight: InFlight::new(),
            last_fetched_cycle: RwLock::new(None),
        })
    }

    /// Reconstructs and persists a single (cycle, baker) pair.
    ///
    /// `force=true` bypasses both the in-flight dedupe and the
    /// already-stored short-circuit; without it, a caller racing an
    /// in-flight or already-completed fetch for the same pair returns
    /// immediately without duplicating work.
    pub async fn fetch_delegate(
        self: &Arc<Self>,
        cycle: i64,
        baker: Address,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (_, last_completed) = self.chain.last_completed_cycle(cancel).await?;
        if cycle > last_completed {
            return Err(SchedulerError::CycleDidNotEndYet(cycle));
        }

        if !force {
            if self.store.get_delegation_state(&baker, cycle).await?.is_some() {
                return Ok(());
            }
            if !self.in_flight.try_enter(cycle, &baker) {
                return Ok(());
            }
        } else {
            self.in_flight.try_enter(cycle, &baker);
        }

        let result = self.fetch_delegate_internal(cycle, &baker, cancel).await;
        self.in_flight.leave(cycle, &baker);
        result
    }

    async fn fetch_delegate_internal(
        &self,
        cycle: i64,
        baker: &Address,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        let last_block = self.chain.cycle_end_height(cycle, cancel).await?;
        let state = reconstruct(
            self.chain.clone(),
            baker.clone(),
            cycle,
            last_block,
            &self.reconstruct_config,
            cancel,
        )
        .await;

        match state {
            Ok(state) => {
                self.store.upsert_delegation_state(&state).await?;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(cycle, baker = %baker, error = %err, "failed to fetch delegate delegation state");
                rewards_notify::notify(
                    self.notifier.as_ref(),
                    &format!("reconstruction failed for {baker} @ cycle {cycle}: {err}"),
                )
                .await;
                Err(err.into())
            }
        }
    }

    /// Reconstructs every active delegate of a cycle, continuing past
    /// individual baker failures.
    pub async fn fetch_cycle(
        self: &Arc<Self>,
        cycle: i64,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (_, last_completed) = self.chain.last_completed_cycle(cancel).await?;
        if cycle > last_completed {
            return Err(SchedulerError::CycleDidNotEndYet(cycle));
        }

        let last_block = self.chain.cycle_end_height(cycle, cancel).await?;
        let mut bakers = self.chain.active_delegates(last_block, cancel).await?;
        if let Some(filter) = &self.config.delegate_filter {
            let allowed: HashSet<&Address> = filter.iter().collect();
            bakers.retain(|b| allowed.contains(b));
        }

        tracing::info!(cycle, baker_count = bakers.len(), "fetching cycle");

        let concurrency = self.config.reconstruction_concurrency;
        let scheduler = self.clone();
        let cancel_for_pool = cancel.clone();
        rewards_engine::run_pool(bakers, concurrency, cancel_for_pool.clone(), move |baker| {
            let scheduler = scheduler.clone();
            let cancel = cancel_for_pool.clone();
            async move {
                if let Err(err) = scheduler.fetch_delegate(cycle, baker.clone(), force, &cancel).await {
                    tracing::warn!(cycle, baker = %baker, error = %err, "baker reconstruction failed; continuing with the rest of the cycle");
                }
            }
        })
        .await;

        let stats = self.store.refresh_fetched_cycles(cycle).await?;
        tracing::info!(
            cycle,
            state_count = stats.state_count,
            state_with_balance_count = stats.state_with_balance_count,
            "cycle fetch complete"
        );

        Ok(())
    }

    /// Runs until `cancel` fires: every [`SchedulerConfig::automatic_loop_interval`],
    /// detects newly completed cycles and fetches each of them in order,
    /// pruning the store after each one.
    pub async fn run_automatic_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            if let Err(err) = self.tick(&cancel).await {
                tracing::warn!(error = %err, "automatic scheduler tick failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.automatic_loop_interval) => {}
            }
        }
    }

    async fn tick(self: &Arc<Self>, cancel: &CancellationToken) -> Result<()> {
        let (on_chain_last_cycle, _) = self.chain.last_completed_cycle(cancel).await?;

        let start = {
            let mut guard = self.last_fetched_cycle.write();
            if guard.is_none() {
                let stored = self.store.last_fetched_cycle().await?;
                *guard = Some(if stored == 0 {
                    on_chain_last_cycle - 1
                } else {
                    stored
                });
            }
            guard.unwrap()
        };

        for cycle in (start + 1)..=on_chain_last_cycle {
            self.fetch_cycle(cycle, false, cancel).await?;
            self.store.prune(cycle).await?;
            *self.last_fetched_cycle.write() = Some(cycle);
        }

        Ok(())
    }

    pub fn last_fetched_cycle(&self) -> Option<i64> {
        *self.last_fetched_cycle.read()
    }

    pub fn is_fetching(&self, cycle: i64, baker: &Address) -> bool {
        self.in_flight.contains(cycle, baker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `Scheduler` owns a live `Store` (a real Postgres pool), so its
    // dedupe/loop behavior is exercised here against the in-flight set
    // directly rather than against a constructed `Scheduler` — the store-
    // and chain-dependent paths are covered by `rewards-engine`'s and
    // `rewards-store`'s own suites.

    #[test]
    fn in_flight_set_dedupes_concurrent_entries() {
        let in_flight = InFlight::new();
        let baker = Address::new("tz1Baker");
        assert!(in_flight.try_enter(10, &baker));
        assert!(!in_flight.try_enter(10, &baker));
        assert!(in_flight.contains(10, &baker));
        in_flight.leave(10, &baker);
        assert!(!in_flight.contains(10, &baker));
    }

    #[test]
    fn in_flight_set_tracks_cycles_independently() {
        let in_flight = InFlight::new();
        let baker = Address::new("tz1Baker");
        assert!(in_flight.try_enter(10, &baker));
        assert!(in_flight.try_enter(11, &baker));
        assert!(in_flight.contains(10, &baker));
        assert!(in_flight.contains(11, &baker));
    }

    #[test]
    fn default_config_matches_spec_constants() {
        let config = SchedulerConfig::default();
        assert_eq!(config.reconstruction_concurrency, 8);
        assert_eq!(config.automatic_loop_interval, Duration::from_secs(300));
    }
}
