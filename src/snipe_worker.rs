//! Snipe worker (C10): the single consumer of the priority queue. Drains
//! one job at a time, executes a buy through C5+C7, persists the
//! resulting position, and emits user-facing events.
//!
//! The decrypt-verify-execute-release shape follows this codebase's
//! `bot_coordinator.rs` execution-request handling, generalized from an
//! in-process channel consumer to a Redis-backed queue consumer so any
//! worker process can pick up any job.

use crate::blockhash_cache::BlockhashCache;
use crate::constants::{sol_to_lamports, DEFAULT_SOL_PRICE_USD, TOTAL_SUPPLY, WORKER_QUEUE_POLL_INTERVAL};
use crate::errors::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::external_adapter::ExternalAdapter;
use crate::kv_store::KvStore;
use crate::persistence::Persistence;
use crate::pool_resolver::PoolResolver;
use crate::quote_engine::{self, PoolReserves};
use crate::submission_engine::{self, RebuildFn};
use crate::tx_builder::{self, BuildParams};
use crate::types::{ExecutionResult, Position, PositionStatus, SnipeJob};
use crate::wallet_lock::WalletLock;
use crate::wallet_manager::WalletManager;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SnipeWorker {
    persistence: Persistence,
    kv: KvStore,
    events: EventBus,
    adapter: Arc<ExternalAdapter>,
    blockhash_cache: Arc<BlockhashCache>,
    pool_resolver: Arc<PoolResolver>,
    wallet_lock: WalletLock,
    wallet_manager: WalletManager,
    platform_fee_address: Pubkey,
    platform_fee_bps: u64,
    sol_price_usd: f64,
}

impl SnipeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Persistence,
        kv: KvStore,
        events: EventBus,
        adapter: Arc<ExternalAdapter>,
        blockhash_cache: Arc<BlockhashCache>,
        pool_resolver: Arc<PoolResolver>,
        wallet_manager: WalletManager,
        platform_fee_address: Pubkey,
        platform_fee_bps: u64,
        sol_price_usd: f64,
    ) -> Self {
        let wallet_lock = WalletLock::new(kv.clone());
        Self {
            persistence,
            kv,
            events,
            adapter,
            blockhash_cache,
            pool_resolver,
            wallet_lock,
            wallet_manager,
            platform_fee_address,
            platform_fee_bps,
            sol_price_usd,
        }
    }

    /// Drain loop: pops a job, runs it to completion, and never lets one
    /// job's failure stop the loop from reaching the next.
    pub async fn run(self: Arc<Self>) -> ! {
        loop {
            match self.kv.queue_pop("snipe-jobs").await {
                Ok(Some(payload)) => {
                    if let Err(e) = self.process_payload(&payload).await {
                        warn!(error = %e, "snipe job failed");
                    }
                }
                Ok(None) => tokio::time::sleep(WORKER_QUEUE_POLL_INTERVAL).await,
                Err(e) => {
                    warn!(error = %e, "queue pop failed, backing off");
                    tokio::time::sleep(WORKER_QUEUE_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn process_payload(&self, payload: &str) -> CoreResult<()> {
        let job: SnipeJob = serde_json::from_str(payload)
            .map_err(|e| CoreError::fatal(format!("malformed snipe job payload: {e}")))?;
        self.process_job(&job).await
    }

    async fn process_job(&self, job: &SnipeJob) -> CoreResult<()> {
        let sniper = self.persistence.load_sniper(&job.sniper_id)?;
        if !sniper.active {
            return Err(CoreError::duplicate(format!("sniper {} deactivated before job ran", sniper.id)));
        }

        let guard = match self.wallet_lock.acquire(&sniper.wallet_id).await {
            Ok(guard) => guard,
            Err(e) => {
                self.events
                    .emit_snipe(&sniper.user, "failed", &job.mint.to_string(), json!({ "error": e.to_string() }))
                    .await;
                return Err(e);
            }
        };

        let result = self.execute_buy(job, &sniper).await;

        if let Err(e) = guard.release().await {
            warn!(wallet_id = %sniper.wallet_id, error = %e, "wallet lock release failed, relying on TTL");
        }

        match result {
            Ok(signature) => {
                self.events
                    .emit_snipe(&sniper.user, "confirmed", &job.mint.to_string(), json!({ "signature": signature }))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.events
                    .emit_snipe(&sniper.user, "failed", &job.mint.to_string(), json!({ "error": e.to_string() }))
                    .await;
                Err(e)
            }
        }
    }

    async fn execute_buy(&self, job: &SnipeJob, sniper: &crate::types::SniperConfig) -> CoreResult<String> {
        let wallet = self.persistence.load_wallet(&sniper.wallet_id)?;
        let keypair = self.wallet_manager.decrypt_wallet(&wallet)?;

        let resolved = self.pool_resolver.resolve_pool(&job.mint, Some(job.migration_snapshot.pool)).await?;
        let token_program = self.pool_resolver.detect_token_program(&job.mint).await?;
        let coin_creator = self
            .pool_resolver
            .resolve_coin_creator(&resolved.pool, job.migration_snapshot.coin_creator)
            .await?;

        let reserves = fetch_reserves(&self.adapter, &resolved.base_vault, &resolved.quote_vault).await?;

        let sol_in_lamports = sol_to_lamports(sniper.snipe_amount);
        let quote = quote_engine::quote_buy(
            job.mint,
            resolved.pool,
            resolved.base_vault,
            resolved.quote_vault,
            coin_creator,
            token_program,
            &reserves,
            sol_in_lamports,
        )?;

        let platform_fee_lamports = sol_in_lamports * self.platform_fee_bps / 10_000;
        let base_tip_lamports = sol_to_lamports(sniper.priority_fee);
        let platform_fee_address = self.platform_fee_address;

        let blockhash_cache = Arc::clone(&self.blockhash_cache);
        let rebuild: Box<RebuildFn<'_>> = Box::new(move |tip_sol: f64| {
            let quote = quote.clone();
            let signer = keypair.insecure_clone();
            let blockhash_cache = Arc::clone(&blockhash_cache);
            Box::pin(async move {
                let params = BuildParams {
                    signer: &signer,
                    platform_fee_address,
                    platform_fee_lamports,
                    tip_lamports: sol_to_lamports(tip_sol),
                    via_router: false,
                };
                tx_builder::build_buy_transaction(&quote, &params, &blockhash_cache, None, &[]).await
            })
        });

        let user = sniper.user.clone();
        let outcome = submission_engine::run_attempt_sequence(
            &self.adapter,
            &self.blockhash_cache,
            sniper.mev_protected,
            sniper.priority_fee,
            &rebuild,
            |event| info!(user = %user, event, mint = %job.mint, "📡 snipe event"),
        )
        .await;

        let execution_result = match &outcome {
            Ok(outcome) => ExecutionResult {
                success: outcome.success,
                signature: outcome.signature.clone(),
                tokens: Some(quote.expected_tokens as f64),
                sol_spent: Some(quote.max_sol_spend as f64),
                sol_received: None,
                fees: crate::types::ExecutionFees {
                    platform: platform_fee_lamports as f64,
                    tip: base_tip_lamports as f64,
                    network: 0.0,
                },
                error: None,
            },
            Err(e) => ExecutionResult::failure(e.to_string()),
        };
        self.persistence.record_execution_result(None, Some(&job.job_id), "buy", &execution_result)?;

        let outcome = outcome?;
        if !outcome.success {
            return Err(CoreError::rejected("buy did not confirm on-chain"));
        }

        let decimals = fetch_mint_decimals(&self.adapter, &job.mint).await.unwrap_or(6);
        let entry_tokens_ui = quote.expected_tokens as f64 / 10f64.powi(decimals as i32);
        let entry_sol = crate::constants::lamports_to_sol(quote.max_sol_spend);
        let entry_price = if entry_tokens_ui > 0.0 { entry_sol / entry_tokens_ui } else { 0.0 };
        let sol_price_usd = if self.sol_price_usd > 0.0 { self.sol_price_usd } else { DEFAULT_SOL_PRICE_USD };
        let entry_mcap = if entry_tokens_ui > 0.0 {
            Some(entry_price * TOTAL_SUPPLY * sol_price_usd)
        } else {
            job.migration_snapshot.initial_mcap
        };

        let position = Position {
            id: Uuid::new_v4().to_string(),
            user: sniper.user.clone(),
            wallet: sniper.wallet_id.clone(),
            sniper: sniper.id.clone(),
            mint: job.mint,
            status: PositionStatus::Open,
            entry_sol,
            entry_tokens: entry_tokens_ui,
            entry_price,
            entry_mcap,
            current_tokens: entry_tokens_ui,
            exit_sol: None,
            exit_price: None,
            opened_at: chrono::Utc::now(),
            closed_at: None,
        };
        self.persistence.insert_position(&position)?;
        self.events
            .emit_position(&sniper.user, "opened", &position.id, json!({ "mint": job.mint.to_string() }))
            .await;

        Ok(outcome.signature.unwrap_or_default())
    }
}

async fn fetch_reserves(
    adapter: &ExternalAdapter,
    base_vault: &Pubkey,
    quote_vault: &Pubkey,
) -> CoreResult<PoolReserves> {
    let rpc = adapter.rpc();
    let base_vault = *base_vault;
    let token_reserve = tokio::task::spawn_blocking(move || rpc.get_token_account_balance(&base_vault))
        .await
        .map_err(|e| CoreError::transient(format!("reserve fetch task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("base vault balance fetch failed: {e}")))?
        .amount
        .parse::<u64>()
        .map_err(|e| CoreError::transient(format!("base vault balance not numeric: {e}")))?;

    let rpc = adapter.rpc();
    let quote_vault = *quote_vault;
    let sol_reserve = tokio::task::spawn_blocking(move || rpc.get_balance(&quote_vault))
        .await
        .map_err(|e| CoreError::transient(format!("reserve fetch task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("quote vault balance fetch failed: {e}")))?;

    Ok(PoolReserves { token_reserve, sol_reserve })
}

/// Read the SPL mint's decimals byte (offset 44 in the raw mint account),
/// the same technique `token_decimal_cache.rs` uses.
async fn fetch_mint_decimals(adapter: &ExternalAdapter, mint: &Pubkey) -> CoreResult<u8> {
    let rpc = adapter.rpc();
    let mint = *mint;
    let account = tokio::task::spawn_blocking(move || rpc.get_account(&mint))
        .await
        .map_err(|e| CoreError::transient(format!("mint fetch task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("mint account fetch failed: {e}")))?;

    account
        .data
        .get(44)
        .copied()
        .ok_or_else(|| CoreError::rejected("mint account too short to contain decimals byte"))
}
