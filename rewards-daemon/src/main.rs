//! Service entry point: loads configuration, wires the chain access layer,
//! store, scheduler and HTTP routers together, and runs until a shutdown
//! signal (or, under `--test`, runs a single reconstruction and exits).

mod cli;
mod config;

use std::sync::Arc;

use clap::Parser;
use cli::{parse_test_target, Cli, TestTarget};
use config::AppConfig;
use rewards_chain::{ChainAccess, ChainAccessConfig, RpcChainAccess};
use rewards_core::Address;
use rewards_engine::ReconstructConfig;
use rewards_notify::{Notifier, NotifierConfig};
use rewards_scheduler::{Scheduler, SchedulerConfig};
use rewards_store::{Store, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(level: Option<&str>) {
    let filter = level
        .map(|s| s.to_string())
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    if let Some(cache) = &cli.cache {
        tracing::debug!(
            path = %cache,
            "--cache accepted for compatibility; this service keeps no on-disk chain cache"
        );
    }

    let app_config = AppConfig::load(&cli.config)?;

    let chain: Arc<dyn ChainAccess> = Arc::new(
        RpcChainAccess::connect(ChainAccessConfig {
            rpc_providers: app_config.providers.clone(),
            indexer_providers: app_config.tzkt_providers.clone(),
            ..Default::default()
        })
        .await?,
    );

    let store = Arc::new(
        Store::connect(
            &app_config.database.url(),
            StoreConfig {
                stored_cycles: app_config.stored_cycles(),
            },
        )
        .await?,
    );
    store.run_migrations().await?;

    let notifier = app_config
        .notifier
        .as_ref()
        .map(|n| {
            Notifier::new(&NotifierConfig {
                webhook_url: n.webhook_url.clone(),
                webhook_id: n.webhook_id.clone(),
                webhook_token: n.webhook_token.clone(),
            })
        })
        .transpose()?;

    let delegate_filter = app_config
        .delegates
        .as_ref()
        .map(|addrs| addrs.iter().cloned().map(Address::new).collect());

    let scheduler = Scheduler::new(
        chain.clone(),
        store.clone(),
        notifier,
        ReconstructConfig::default(),
        SchedulerConfig {
            delegate_filter,
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();

    if let Some(test) = cli.test.clone() {
        return run_test(&scheduler, &test, &cancel).await;
    }

    tokio::spawn({
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        async move { scheduler.run_automatic_loop(cancel).await }
    });

    let metrics = Arc::new(rewards_api::ApiMetrics::new());
    let state = rewards_api::ApiState {
        chain: chain.clone(),
        scheduler: scheduler.clone(),
        store: store.clone(),
        metrics,
        cancel: cancel.clone(),
    };

    let public = rewards_api::public_router(state.clone());
    let public_listen = app_config.listen.clone();
    let public_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&public_listen).await?;
        tracing::info!(addr = %public_listen, "public API listening");
        axum::serve(listener, public).await
    });

    let private_handle = if !app_config.private_listen.is_empty() {
        let private = rewards_api::private_router(state);
        let private_listen = app_config.private_listen.clone();
        Some(tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&private_listen).await?;
            tracing::info!(addr = %private_listen, "private API listening");
            axum::serve(listener, private).await
        }))
    } else {
        tracing::info!("private API disabled (no private_listen configured)");
        None
    };

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
    cancel.cancel();
    public_handle.abort();
    if let Some(handle) = private_handle {
        handle.abort();
    }

    Ok(())
}

async fn run_test(
    scheduler: &Arc<Scheduler>,
    raw: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match parse_test_target(raw)? {
        TestTarget::Delegate { address, cycle } => {
            scheduler
                .fetch_delegate(cycle, Address::new(address), true, cancel)
                .await?;
        }
        TestTarget::Cycle(cycle) => {
            scheduler.fetch_cycle(cycle, true, cancel).await?;
        }
    }
    Ok(())
}
