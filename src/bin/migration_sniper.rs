//! Process entry point: loads configuration, wires every collaborator
//! together, and runs the migration detector, orchestrator, and snipe
//! worker concurrently for the lifetime of the process.

use anyhow::Result;
use migration_sniper_core::{
    AppConfig, EventBus, ExternalAdapter, KvStore, Migration, MigrationDetector, Orchestrator,
    Persistence, PoolResolver, SnipeWorker, WalletManager,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("🚀 starting migration-sniper");

    let kv = KvStore::connect(&config.shared_kv_url).await?;
    let events = EventBus::new(kv.clone());
    let persistence = Persistence::open(&config.database_path)?;
    let wallet_manager = WalletManager::new(&config.master_encryption_key);

    let adapter = Arc::new(ExternalAdapter::new(&config.rpc_primary_url, config.bundle_endpoints.clone()));
    let blockhash_cache = Arc::new(migration_sniper_core::blockhash_cache::BlockhashCache::new(
        solana_client::nonblocking::rpc_client::RpcClient::new(config.rpc_primary_url.clone()).into(),
    ));
    Arc::clone(&blockhash_cache).spawn_refresh_task();
    let pool_resolver = Arc::new(PoolResolver::new(adapter.rpc()));

    let detector = Arc::new(MigrationDetector::new(
        config.ws_rpc_url.clone(),
        config.enhanced_tx_endpoint_url.clone(),
        Arc::clone(&adapter),
    ));
    let mut migration_rx = detector.subscribe();

    let orchestrator = Arc::new(Orchestrator::new(
        persistence.clone(),
        kv.clone(),
        events.clone(),
        Arc::clone(&adapter),
        config.enrichment_endpoint_url.clone(),
    ));

    let worker = Arc::new(SnipeWorker::new(
        persistence.clone(),
        kv.clone(),
        events.clone(),
        Arc::clone(&adapter),
        Arc::clone(&blockhash_cache),
        Arc::clone(&pool_resolver),
        wallet_manager,
        config.platform_fee_address,
        config.platform_fee_bps,
        config.sol_price_usd,
    ));

    let detector_handle = tokio::spawn({
        let detector = Arc::clone(&detector);
        async move { detector.run().await }
    });

    let orchestrator_handle = tokio::spawn(async move {
        loop {
            match migration_rx.recv().await {
                Ok(migration) => dispatch_migration(&orchestrator, migration).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "orchestrator lagged behind migration stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let worker_handle = tokio::spawn(async move { worker.run().await });

    tokio::select! {
        _ = detector_handle => tracing::error!("migration detector task exited"),
        _ = orchestrator_handle => tracing::error!("orchestrator task exited"),
        _ = worker_handle => tracing::error!("snipe worker task exited"),
    }

    Ok(())
}

async fn dispatch_migration(orchestrator: &Orchestrator, migration: Migration) {
    match orchestrator.handle_migration(&migration).await {
        Ok(matched) if matched > 0 => {
            tracing::info!(mint = %migration.mint, matched, "✅ migration matched sniper(s)");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(mint = %migration.mint, error = %e, "migration handling failed"),
    }
}
