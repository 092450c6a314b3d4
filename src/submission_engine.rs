//! Submission engine (C7): drives the fixed attempt schedule across
//! mev-parallel, staked-rpc, and direct-rpc paths, confirms or times out,
//! and on total sell failure, checks on-chain balance to catch a silent
//! success.
//!
//! The bundle-then-poll shape is this codebase's `jito_bundle_manager.rs`
//! `submit_bundle` + status poll, generalized from one endpoint to
//! "first-fulfilled-success across every configured endpoint" and paired
//! with the plain `sendRawTransaction` staked/direct paths that file never
//! needed because it only ever went through Jito.

use crate::blockhash_cache::BlockhashCache;
use crate::constants::{
    ATTEMPT_GAP, BUNDLE_POLL_INTERVAL, BUNDLE_POLL_TIMEOUT, CONFIRM_INITIAL_INTERVAL,
    CONFIRM_INTERVAL_GROWTH, CONFIRM_MAX_INTERVAL, CONFIRM_TOTAL_TIMEOUT, DIRECT_RPC_MAX_RETRIES,
    STAKED_RPC_MAX_RETRIES,
};
use crate::errors::{CoreError, CoreResult};
use crate::external_adapter::ExternalAdapter;
use crate::types::{attempt_schedule, SubmissionPath};
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, warn};

pub struct SubmissionOutcome {
    pub signature: Option<String>,
    pub success: bool,
    pub bundle_endpoints_accepted: usize,
}

/// Callback the caller supplies to rebuild the transaction with a fresh
/// blockhash and the next attempt's tip. Returning `None` aborts the
/// whole attempt sequence (used when a sell's balance check fails).
pub type RebuildFn<'a> = dyn Fn(f64) -> futures::future::BoxFuture<'a, CoreResult<VersionedTransaction>> + Send + Sync + 'a;

pub async fn run_attempt_sequence(
    adapter: &ExternalAdapter,
    blockhash_cache: &BlockhashCache,
    mev_protected: bool,
    base_tip_sol: f64,
    rebuild: &RebuildFn<'_>,
    on_event: impl Fn(&str),
) -> CoreResult<SubmissionOutcome> {
    let schedule = attempt_schedule(mev_protected);

    for (idx, step) in schedule.iter().enumerate() {
        if idx > 0 {
            blockhash_cache.force_refresh().await?;
            tokio::time::sleep(ATTEMPT_GAP).await;
        }

        let tip_sol = base_tip_sol * step.tip_multiplier;
        let tx = rebuild(tip_sol).await?;

        on_event("snipe:submitting");

        let outcome = match step.path {
            SubmissionPath::MevParallel => submit_mev_parallel(adapter, &tx).await,
            SubmissionPath::StakedRpc => submit_rpc(adapter, &tx, STAKED_RPC_MAX_RETRIES).await,
            SubmissionPath::DirectRpc => submit_rpc(adapter, &tx, DIRECT_RPC_MAX_RETRIES).await,
        };

        match outcome {
            Ok(outcome) if outcome.success => return Ok(outcome),
            Ok(_) => {
                on_event("snipe:retrying");
                warn!(attempt = idx, path = ?step.path, "attempt did not confirm, continuing to next");
            }
            Err(e) => {
                on_event("snipe:retrying");
                warn!(attempt = idx, path = ?step.path, error = %e, "attempt failed, continuing to next");
            }
        }
    }

    Err(CoreError::rejected("all submission attempts exhausted"))
}

async fn submit_mev_parallel(adapter: &ExternalAdapter, tx: &VersionedTransaction) -> CoreResult<SubmissionOutcome> {
    let signed_b58 = bs58::encode(bincode::serialize(tx).expect("transaction serializes")).into_string();
    let n = adapter.bundle_endpoint_count();
    if n == 0 {
        return Err(CoreError::rejected("no bundle endpoints configured for mev-parallel path"));
    }

    let futures = (0..n).map(|i| {
        let signed_b58 = signed_b58.clone();
        async move { (i, adapter.send_bundle(i, &[signed_b58]).await) }
    });

    let results = futures::future::join_all(futures).await;
    let accepted: Vec<_> = results.iter().filter(|(_, r)| r.is_ok()).collect();

    let Some((winning_idx, Ok(bundle_id))) = results.into_iter().find(|(_, r)| r.is_ok()) else {
        return Err(CoreError::transient("no bundle endpoint accepted the bundle"));
    };

    info!(
        endpoints_accepted = accepted.len(),
        total_endpoints = n,
        "📨 bundle accepted by {}/{} endpoints",
        accepted.len(),
        n
    );

    let deadline = Instant::now() + BUNDLE_POLL_TIMEOUT;
    loop {
        if Instant::now() >= deadline {
            return Ok(SubmissionOutcome {
                signature: None,
                success: false,
                bundle_endpoints_accepted: accepted.len(),
            });
        }

        if let Some(status) = adapter.get_bundle_status(winning_idx, &bundle_id).await? {
            let confirmation_status = status["confirmation_status"].as_str().unwrap_or("");
            let err = &status["transactions"][0]["err"];

            if matches!(confirmation_status, "confirmed" | "finalized") && err.is_null() {
                let signature = status["transactions"][0].as_str().map(str::to_string);
                return Ok(SubmissionOutcome {
                    signature,
                    success: true,
                    bundle_endpoints_accepted: accepted.len(),
                });
            }
            if confirmation_status == "failed" || !err.is_null() {
                return Ok(SubmissionOutcome {
                    signature: None,
                    success: false,
                    bundle_endpoints_accepted: accepted.len(),
                });
            }
        }

        tokio::time::sleep(BUNDLE_POLL_INTERVAL).await;
    }
}

async fn submit_rpc(
    adapter: &ExternalAdapter,
    tx: &VersionedTransaction,
    max_retries: usize,
) -> CoreResult<SubmissionOutcome> {
    let config = RpcSendTransactionConfig {
        skip_preflight: false,
        max_retries: Some(max_retries),
        ..Default::default()
    };

    let rpc = adapter.rpc();
    let tx = tx.clone();
    let signature = tokio::task::spawn_blocking(move || {
        rpc.send_transaction_with_config(&tx, config)
    })
    .await
    .map_err(|e| CoreError::transient(format!("submit task panicked: {e}")))?
    .map_err(|e| CoreError::transient(format!("sendRawTransaction failed: {e}")))?;

    let confirmed = poll_confirmation(adapter, &signature).await?;
    Ok(SubmissionOutcome {
        signature: Some(signature.to_string()),
        success: confirmed,
        bundle_endpoints_accepted: 0,
    })
}

async fn poll_confirmation(adapter: &ExternalAdapter, signature: &Signature) -> CoreResult<bool> {
    let deadline = Instant::now() + CONFIRM_TOTAL_TIMEOUT;
    let mut interval = CONFIRM_INITIAL_INTERVAL;
    let signature = *signature;

    loop {
        if Instant::now() >= deadline {
            return Ok(false);
        }

        let rpc = adapter.rpc();
        let status = tokio::task::spawn_blocking(move || rpc.get_signature_status(&signature))
            .await
            .map_err(|e| CoreError::transient(format!("confirmation poll task panicked: {e}")))?
            .map_err(|e| CoreError::transient(format!("getSignatureStatus failed: {e}")))?;

        match status {
            Some(Ok(())) => return Ok(true),
            Some(Err(_)) => return Ok(false),
            None => {}
        }

        tokio::time::sleep(interval).await;
        interval = (interval.mul_f64(CONFIRM_INTERVAL_GROWTH)).min(CONFIRM_MAX_INTERVAL);
    }
}

/// Silent-success recovery: after every attempt fails on a sell, check
/// whether the token balance is already zero, meaning the swap landed
/// despite confirmation giving up. Checks the ATA under the detected
/// token program first, since that's the common case, and falls back to
/// the other SPL token program's ATA before concluding the sell truly
/// didn't land — detection can itself have raced the migration and
/// picked the wrong program. Returns the wallet's most recent signature
/// as a best-effort attribution.
pub async fn check_silent_sell_success(
    adapter: &ExternalAdapter,
    owner: &solana_sdk::pubkey::Pubkey,
    token_program: &solana_sdk::pubkey::Pubkey,
    mint: &solana_sdk::pubkey::Pubkey,
) -> CoreResult<Option<String>> {
    let other_program = other_token_program(token_program);

    let zero_balance = token_account_is_empty(adapter, owner, token_program, mint).await?
        || token_account_is_empty(adapter, owner, &other_program, mint).await?;

    if !zero_balance {
        return Ok(None);
    }

    let rpc = adapter.rpc();
    let owner = *owner;
    let signatures = tokio::task::spawn_blocking(move || rpc.get_signatures_for_address(&owner))
        .await
        .map_err(|e| CoreError::transient(format!("signature lookup task panicked: {e}")))?
        .unwrap_or_default();

    Ok(signatures.into_iter().next().map(|s| s.signature))
}

/// SPL Token <-> Token-2022, the two programs a mint can be owned by.
fn other_token_program(program: &solana_sdk::pubkey::Pubkey) -> solana_sdk::pubkey::Pubkey {
    let token = solana_sdk::pubkey::Pubkey::from_str(crate::constants::TOKEN_PROGRAM_ID)
        .expect("valid token program id");
    let token_2022 = solana_sdk::pubkey::Pubkey::from_str(crate::constants::TOKEN_2022_PROGRAM_ID)
        .expect("valid token-2022 program id");
    if *program == token {
        token_2022
    } else {
        token
    }
}

async fn token_account_is_empty(
    adapter: &ExternalAdapter,
    owner: &solana_sdk::pubkey::Pubkey,
    token_program: &solana_sdk::pubkey::Pubkey,
    mint: &solana_sdk::pubkey::Pubkey,
) -> CoreResult<bool> {
    use spl_associated_token_account::get_associated_token_address_with_program_id;

    let ata = get_associated_token_address_with_program_id(owner, mint, token_program);
    let rpc = adapter.rpc();
    let balance = tokio::task::spawn_blocking(move || rpc.get_token_account_balance(&ata))
        .await
        .map_err(|e| CoreError::transient(format!("balance check task panicked: {e}")))?;

    match balance {
        Ok(balance) => Ok(balance.amount.parse::<u64>().unwrap_or(1) == 0),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_interval_growth_is_capped() {
        let mut interval = CONFIRM_INITIAL_INTERVAL;
        for _ in 0..20 {
            interval = interval.mul_f64(CONFIRM_INTERVAL_GROWTH).min(CONFIRM_MAX_INTERVAL);
        }
        assert!(interval <= CONFIRM_MAX_INTERVAL);
    }
}
