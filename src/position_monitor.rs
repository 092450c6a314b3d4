//! Position monitor entry point (C11): the sell-side mirror of the snipe
//! worker. Upstream exit logic (take-profit/stop-loss/trailing-stop
//! triggers, or a manual sell request) calls [`PositionMonitor::sell`]
//! with a position id, an optional partial amount, and a reason; this
//! module owns nothing about *when* to sell, only *how*.
//!
//! Wallet-lock-then-execute-then-release mirrors `snipe_worker.rs`/C10;
//! the balance-gate-before-building-a-quote step is new, since a buy never
//! needs to ask "do we actually hold this."

use crate::blockhash_cache::BlockhashCache;
use crate::constants::{lamports_to_sol, MIN_WALLET_SOL_RESERVE};
use crate::errors::{CoreError, CoreResult};
use crate::events::EventBus;
use crate::external_adapter::ExternalAdapter;
use crate::persistence::Persistence;
use crate::pool_resolver::PoolResolver;
use crate::quote_engine::{self, PoolReserves};
use crate::submission_engine::{self, RebuildFn};
use crate::tx_builder::{self, BuildParams};
use crate::types::{ExecutionResult, Position, PositionStatus, SellReason};
use crate::wallet_lock::WalletLock;
use crate::wallet_manager::WalletManager;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::sync::Arc;
use tracing::{info, warn};

pub struct SellRequest {
    pub position_id: String,
    pub token_amount: Option<f64>,
    pub reason: SellReason,
}

pub struct PositionMonitor {
    persistence: Persistence,
    events: EventBus,
    adapter: Arc<ExternalAdapter>,
    blockhash_cache: Arc<BlockhashCache>,
    pool_resolver: Arc<PoolResolver>,
    wallet_lock: WalletLock,
    wallet_manager: WalletManager,
    platform_fee_address: Pubkey,
    platform_fee_bps: u64,
}

impl PositionMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Persistence,
        events: EventBus,
        adapter: Arc<ExternalAdapter>,
        blockhash_cache: Arc<BlockhashCache>,
        pool_resolver: Arc<PoolResolver>,
        wallet_lock: WalletLock,
        wallet_manager: WalletManager,
        platform_fee_address: Pubkey,
        platform_fee_bps: u64,
    ) -> Self {
        Self {
            persistence,
            events,
            adapter,
            blockhash_cache,
            pool_resolver,
            wallet_lock,
            wallet_manager,
            platform_fee_address,
            platform_fee_bps,
        }
    }

    pub async fn sell(&self, request: SellRequest) -> CoreResult<String> {
        let position = self.persistence.load_position(&request.position_id)?;
        if position.status != PositionStatus::Open {
            return Err(CoreError::rejected(format!(
                "position {} is not open (status: {:?})",
                position.id, position.status
            )));
        }

        let guard = self.wallet_lock.acquire(&position.wallet).await?;
        let result = self.execute_sell(&position, &request).await;

        if let Err(e) = guard.release().await {
            warn!(wallet_id = %position.wallet, error = %e, "wallet lock release failed, relying on TTL");
        }

        match &result {
            Ok(signature) => {
                self.events
                    .emit_position(&position.user, "closed", &position.id, json!({ "signature": signature }))
                    .await;
            }
            Err(e) => {
                self.events
                    .emit_position(&position.user, "sell_failed", &position.id, json!({ "error": e.to_string() }))
                    .await;
            }
        }

        result
    }

    async fn execute_sell(&self, position: &Position, request: &SellRequest) -> CoreResult<String> {
        self.persistence.update_position_status(&position.id, PositionStatus::Selling)?;

        let wallet = self.persistence.load_wallet(&position.wallet)?;
        let keypair = self.wallet_manager.decrypt_wallet(&wallet)?;
        let owner = keypair.pubkey();

        let token_program = self.pool_resolver.detect_token_program(&position.mint).await?;
        let resolved = self.pool_resolver.resolve_pool(&position.mint, None).await?;

        let sol_lamports = fetch_sol_balance(&self.adapter, &owner).await?;
        if sol_lamports < MIN_WALLET_SOL_RESERVE {
            self.persistence.update_position_status(&position.id, PositionStatus::Open)?;
            return Err(CoreError::rejected(format!(
                "wallet SOL balance {} lamports is below the {} lamport reserve required to sell",
                sol_lamports, MIN_WALLET_SOL_RESERVE
            )));
        }

        let ata = get_associated_token_address_with_program_id(&owner, &position.mint, &token_program);
        let decimals = fetch_mint_decimals(&self.adapter, &position.mint).await.unwrap_or(6);
        let on_chain_tokens_raw = fetch_token_balance(&self.adapter, &ata).await?;

        if on_chain_tokens_raw == 0 {
            self.persistence.update_position_status(&position.id, PositionStatus::Open)?;
            return Err(CoreError::rejected("on-chain token balance is zero, nothing to sell"));
        }

        let sell_amount_raw = match request.token_amount {
            Some(ui_amount) => {
                let requested = (ui_amount * 10f64.powi(decimals as i32)).round() as u64;
                requested.min(on_chain_tokens_raw)
            }
            None => on_chain_tokens_raw,
        };

        let reserves =
            fetch_reserves(&self.adapter, &resolved.base_vault, &resolved.quote_vault).await?;
        let coin_creator = self
            .pool_resolver
            .resolve_coin_creator(&resolved.pool, None)
            .await
            .unwrap_or(self.platform_fee_address);

        let sniper = self.persistence.load_sniper(&position.sniper)?;
        let quote = quote_engine::quote_sell(
            position.mint,
            resolved.pool,
            resolved.base_vault,
            resolved.quote_vault,
            coin_creator,
            token_program,
            &reserves,
            sell_amount_raw,
            sniper.slippage_bps,
        )?;

        let platform_fee_lamports = quote.expected_sol * self.platform_fee_bps / 10_000;
        let base_tip_sol = sniper.priority_fee;
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
                    tip_lamports: crate::constants::sol_to_lamports(tip_sol),
                    via_router: false,
                };
                tx_builder::build_sell_transaction(&quote, &params, &blockhash_cache, None, &[]).await
            })
        });

        let user = position.user.clone();
        let mint = position.mint;
        let outcome = submission_engine::run_attempt_sequence(
            &self.adapter,
            &self.blockhash_cache,
            sniper.mev_protected,
            base_tip_sol,
            &rebuild,
            |event| info!(user = %user, event, mint = %mint, "📡 sell event"),
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) if outcome.success => outcome,
            _ => {
                if let Some(signature) =
                    submission_engine::check_silent_sell_success(&self.adapter, &owner, &token_program, &position.mint)
                        .await?
                {
                    info!(position_id = %position.id, %signature, "✅ recovered silent sell success from on-chain balance");
                    let execution_result = ExecutionResult {
                        success: true,
                        signature: Some(signature.clone()),
                        tokens: Some(sell_amount_raw as f64),
                        sol_spent: None,
                        sol_received: Some(quote.expected_sol as f64),
                        fees: crate::types::ExecutionFees {
                            platform: platform_fee_lamports as f64,
                            tip: 0.0,
                            network: 0.0,
                        },
                        error: None,
                    };
                    self.persistence.record_execution_result(Some(&position.id), None, "sell", &execution_result)?;
                    self.finalize_close(position, &quote, decimals, request.reason)?;
                    return Ok(signature);
                }
                self.persistence.update_position_status(&position.id, PositionStatus::Open)?;
                return Err(CoreError::rejected("all sell attempts exhausted and no silent success detected"));
            }
        };

        let execution_result = ExecutionResult {
            success: true,
            signature: outcome.signature.clone(),
            tokens: Some(sell_amount_raw as f64),
            sol_spent: None,
            sol_received: Some(quote.expected_sol as f64),
            fees: crate::types::ExecutionFees {
                platform: platform_fee_lamports as f64,
                tip: 0.0,
                network: 0.0,
            },
            error: None,
        };
        self.persistence.record_execution_result(Some(&position.id), None, "sell", &execution_result)?;
        self.finalize_close(position, &quote, decimals, request.reason)?;

        Ok(outcome.signature.unwrap_or_default())
    }

    fn finalize_close(
        &self,
        position: &Position,
        quote: &crate::types::SellQuote,
        decimals: u8,
        _reason: SellReason,
    ) -> CoreResult<()> {
        let exit_sol = lamports_to_sol(quote.expected_sol);
        let exit_price = if quote.token_amount > 0 {
            exit_sol / (quote.token_amount as f64 / 10f64.powi(decimals as i32))
        } else {
            0.0
        };
        self.persistence.close_position(&position.id, exit_sol, exit_price)
    }
}

async fn fetch_sol_balance(adapter: &ExternalAdapter, owner: &Pubkey) -> CoreResult<u64> {
    let rpc = adapter.rpc();
    let owner = *owner;
    tokio::task::spawn_blocking(move || rpc.get_balance(&owner))
        .await
        .map_err(|e| CoreError::transient(format!("balance fetch task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("getBalance failed: {e}")))
}

async fn fetch_token_balance(adapter: &ExternalAdapter, ata: &Pubkey) -> CoreResult<u64> {
    let rpc = adapter.rpc();
    let ata = *ata;
    let balance = tokio::task::spawn_blocking(move || rpc.get_token_account_balance(&ata))
        .await
        .map_err(|e| CoreError::transient(format!("token balance fetch task panicked: {e}")))?;

    match balance {
        Ok(balance) => balance
            .amount
            .parse::<u64>()
            .map_err(|e| CoreError::transient(format!("token balance not numeric: {e}"))),
        Err(_) => Ok(0),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sell_request_reason_roundtrips() {
        let req = SellRequest { position_id: "p1".into(), token_amount: None, reason: SellReason::Manual };
        assert_eq!(req.reason, SellReason::Manual);
    }
}
