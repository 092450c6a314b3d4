//! Pool & creator resolver (C3).
//!
//! Discovers the AMM pool account for a migrated mint via a size + memcmp
//! `getProgramAccounts` filter, parses vault addresses out of the raw
//! account bytes, and resolves the pool's "coin creator" — falling back to
//! a signature scan when the migration event didn't already carry it.
//!
//! Owner-routing and byte-offset parsing follow this codebase's
//! `dex_pool_state.rs` / `pumpswap_state.rs` pattern; the account discovery
//! itself is new since the teacher always received the pool address
//! pre-resolved from its ShredStream feed.

use crate::constants::{
    AMM_COIN_CREATOR_ACCOUNT_IDX, AMM_PROGRAM_ID, CREATOR_RESOLUTION_SIGNATURE_LIMIT,
    POOL_ACCOUNT_SIZE, POOL_BASE_MINT_OFFSET, POOL_BASE_VAULT_OFFSET, POOL_CACHE_TTL,
    POOL_DISCOVERY_RETRY_DELAYS_MS, POOL_QUOTE_MINT_OFFSET, POOL_QUOTE_VAULT_OFFSET,
    TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID,
};
use crate::errors::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use solana_client::rpc_client::RpcClient;
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiInstruction, UiMessage,
    UiParsedInstruction, UiTransactionEncoding,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ResolvedPool {
    pub pool: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
}

struct CacheEntry {
    pool: ResolvedPool,
    cached_at: DateTime<Utc>,
}

pub struct PoolResolver {
    rpc: Arc<RpcClient>,
    amm_program: Pubkey,
    token_program: Pubkey,
    token_2022_program: Pubkey,
    pool_cache: Mutex<HashMap<Pubkey, CacheEntry>>,
    /// Permanent creator cache; a pool's creator never changes once resolved.
    creator_cache: Mutex<HashMap<Pubkey, Pubkey>>,
}

impl PoolResolver {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            amm_program: Pubkey::from_str(AMM_PROGRAM_ID).expect("valid amm program id"),
            token_program: Pubkey::from_str(TOKEN_PROGRAM_ID).expect("valid token program id"),
            token_2022_program: Pubkey::from_str(TOKEN_2022_PROGRAM_ID)
                .expect("valid token-2022 program id"),
            pool_cache: Mutex::new(HashMap::new()),
            creator_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the AMM pool for `mint`, retrying up to 3 times with
    /// progressive delays while the indexer catches up, and caching the
    /// result for 5 seconds per mint.
    pub async fn resolve_pool(&self, mint: &Pubkey, hint: Option<Pubkey>) -> CoreResult<ResolvedPool> {
        if let Some(pool) = hint {
            let resolved = self.fetch_pool_account(&pool).await?;
            self.cache_pool(mint, &resolved).await;
            return Ok(resolved);
        }

        {
            let cache = self.pool_cache.lock().await;
            if let Some(entry) = cache.get(mint) {
                if (Utc::now() - entry.cached_at).to_std().unwrap_or_default() < POOL_CACHE_TTL {
                    return Ok(entry.pool.clone());
                }
            }
        }

        let mut last_err = CoreError::transient("pool discovery did not run");
        for delay_ms in std::iter::once(0).chain(POOL_DISCOVERY_RETRY_DELAYS_MS) {
            if delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
            match self.discover_pool_by_mint(mint).await {
                Ok(resolved) => {
                    self.cache_pool(mint, &resolved).await;
                    return Ok(resolved);
                }
                Err(e) => {
                    debug!(%mint, delay_ms, error = %e, "pool not yet indexed, retrying");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn cache_pool(&self, mint: &Pubkey, pool: &ResolvedPool) {
        self.pool_cache.lock().await.insert(
            *mint,
            CacheEntry {
                pool: pool.clone(),
                cached_at: Utc::now(),
            },
        );
    }

    async fn discover_pool_by_mint(&self, mint: &Pubkey) -> CoreResult<ResolvedPool> {
        let rpc = Arc::clone(&self.rpc);
        let amm_program = self.amm_program;
        let mint = *mint;

        let accounts = tokio::task::spawn_blocking(move || {
            let config = solana_client::rpc_config::RpcProgramAccountsConfig {
                filters: Some(vec![
                    RpcFilterType::DataSize(POOL_ACCOUNT_SIZE as u64),
                    RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                        POOL_BASE_MINT_OFFSET,
                        mint.as_ref().to_vec(),
                    )),
                ]),
                account_config: solana_client::rpc_config::RpcAccountInfoConfig::default(),
                with_context: None,
                sort_results: None,
            };
            rpc.get_program_accounts_with_config(&amm_program, config)
        })
        .await
        .map_err(|e| CoreError::transient(format!("pool discovery task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("getProgramAccounts failed: {e}")))?;

        let (pool_pubkey, data) = accounts
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::transient("no pool account found for mint yet"))?;

        self.parse_pool_account(pool_pubkey, &data)
    }

    async fn fetch_pool_account(&self, pool: &Pubkey) -> CoreResult<ResolvedPool> {
        let rpc = Arc::clone(&self.rpc);
        let pool = *pool;
        let account = tokio::task::spawn_blocking(move || rpc.get_account(&pool))
            .await
            .map_err(|e| CoreError::transient(format!("pool fetch task panicked: {e}")))?
            .map_err(|e| CoreError::transient(format!("getAccountInfo failed for pool: {e}")))?;
        self.parse_pool_account(pool, &account.data)
    }

    fn parse_pool_account(&self, pool: Pubkey, data: &[u8]) -> CoreResult<ResolvedPool> {
        if data.len() != POOL_ACCOUNT_SIZE {
            return Err(CoreError::rejected(format!(
                "pool account {pool} has unexpected size {} (expected {POOL_ACCOUNT_SIZE})",
                data.len()
            )));
        }

        let base_mint = read_pubkey(data, POOL_BASE_MINT_OFFSET)?;
        let quote_mint = read_pubkey(data, POOL_QUOTE_MINT_OFFSET)?;
        let base_vault = read_pubkey(data, POOL_BASE_VAULT_OFFSET)?;
        let quote_vault = read_pubkey(data, POOL_QUOTE_VAULT_OFFSET)?;

        Ok(ResolvedPool {
            pool,
            base_mint,
            quote_mint,
            base_vault,
            quote_vault,
        })
    }

    /// Resolve the pool's coin creator: prefer the migration-provided
    /// value, then the permanent cache, then scan the pool's most recent
    /// signatures for an AMM instruction whose account[0] is the pool and
    /// take account[18]. Never reads the bogus offset-235 field.
    pub async fn resolve_coin_creator(
        &self,
        pool: &Pubkey,
        from_migration: Option<Pubkey>,
    ) -> CoreResult<Pubkey> {
        if let Some(creator) = from_migration {
            self.creator_cache.lock().await.insert(*pool, creator);
            return Ok(creator);
        }

        if let Some(creator) = self.creator_cache.lock().await.get(pool) {
            return Ok(*creator);
        }

        let rpc = Arc::clone(&self.rpc);
        let pool_key = *pool;
        let signatures = tokio::task::spawn_blocking(move || {
            rpc.get_signatures_for_address(&pool_key)
        })
        .await
        .map_err(|e| CoreError::transient(format!("signature scan task panicked: {e}")))?
        .map_err(|e| CoreError::transient(format!("getSignaturesForAddress failed: {e}")))?;

        let amm_program = self.amm_program;
        for sig_info in signatures.into_iter().take(CREATOR_RESOLUTION_SIGNATURE_LIMIT) {
            let rpc = Arc::clone(&self.rpc);
            let signature = sig_info.signature.clone();
            let tx = tokio::task::spawn_blocking(move || {
                let sig = signature.parse().ok()?;
                rpc.get_transaction(&sig, UiTransactionEncoding::JsonParsed).ok()
            })
            .await
            .map_err(|e| CoreError::transient(format!("tx fetch task panicked: {e}")))?;

            let Some(tx) = tx else { continue };
            let Some(keys) = find_amm_instruction_accounts(&tx, pool, &amm_program) else { continue };

            if let Some(creator) = extract_coin_creator_from_keys(&keys) {
                debug!(%pool, %creator, "coin creator resolved from fallback signature scan");
                self.creator_cache.lock().await.insert(*pool, creator);
                return Ok(creator);
            }
        }

        Err(CoreError::rejected(format!(
            "could not resolve coin creator for pool {pool} from recent signatures"
        )))
    }

    /// Determine which token program owns `mint`'s account: standard SPL
    /// Token or the Token-2022 extended program.
    pub async fn detect_token_program(&self, mint: &Pubkey) -> CoreResult<Pubkey> {
        let rpc = Arc::clone(&self.rpc);
        let mint = *mint;
        let account = tokio::task::spawn_blocking(move || rpc.get_account(&mint))
            .await
            .map_err(|e| CoreError::transient(format!("mint fetch task panicked: {e}")))?
            .map_err(|e| CoreError::transient(format!("getAccountInfo failed for mint: {e}")))?;

        if account.owner == self.token_2022_program {
            Ok(self.token_2022_program)
        } else if account.owner == self.token_program {
            Ok(self.token_program)
        } else {
            Err(CoreError::rejected(format!(
                "mint {mint} is not owned by a known token program"
            )))
        }
    }
}

fn read_pubkey(data: &[u8], offset: usize) -> CoreResult<Pubkey> {
    let slice = data
        .get(offset..offset + 32)
        .ok_or_else(|| CoreError::rejected(format!("account data too short for offset {offset}")))?;
    Ok(Pubkey::try_from(slice).expect("32-byte slice converts to Pubkey"))
}

/// Walk a flat account-key list looking for an AMM-owned instruction whose
/// first account is the pool, returning account index 18 (the coin creator
/// slot). Offset 235 in the raw pool bytes is never consulted (see
/// `POOL_BOGUS_CREATOR_OFFSET`).
fn extract_coin_creator_from_keys(keys: &[Pubkey]) -> Option<Pubkey> {
    keys.get(AMM_COIN_CREATOR_ACCOUNT_IDX).copied()
}

/// Walks a JSON-parsed transaction's top-level and inner instructions for
/// the one whose program is the AMM and whose first account is `pool`,
/// returning its full account-key list (pubkeys, already resolved by the
/// `jsonParsed` encoding rather than indices into the message).
fn find_amm_instruction_accounts(
    tx: &EncodedConfirmedTransactionWithStatusMeta,
    pool: &Pubkey,
    amm_program: &Pubkey,
) -> Option<Vec<Pubkey>> {
    let EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction else { return None };
    let UiMessage::Parsed(message) = &ui_tx.message else { return None };

    let top_level = message.instructions.iter();
    let inner = match &tx.transaction.meta {
        Some(meta) => match &meta.inner_instructions {
            OptionSerializer::Some(groups) => {
                itertools_flatten_inner(groups)
            }
            _ => Vec::new(),
        },
        None => Vec::new(),
    };

    top_level
        .chain(inner.iter())
        .find_map(|ix| instruction_accounts_if_match(ix, pool, amm_program))
}

fn itertools_flatten_inner(
    groups: &[solana_transaction_status::UiInnerInstructions],
) -> Vec<UiInstruction> {
    groups.iter().flat_map(|g| g.instructions.clone()).collect()
}

fn instruction_accounts_if_match(
    ix: &UiInstruction,
    pool: &Pubkey,
    amm_program: &Pubkey,
) -> Option<Vec<Pubkey>> {
    let UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(ix)) = ix else { return None };
    if ix.program_id != amm_program.to_string() {
        return None;
    }
    if ix.accounts.first().map(|s| s.as_str()) != Some(pool.to_string().as_str()) {
        return None;
    }
    let keys: Vec<Pubkey> = ix.accounts.iter().filter_map(|s| Pubkey::from_str(s).ok()).collect();
    Some(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_pubkey_rejects_short_buffers() {
        let data = vec![0u8; 10];
        assert!(read_pubkey(&data, 0).is_err());
    }

    #[test]
    fn extract_coin_creator_uses_fixed_index() {
        let mut keys = vec![Pubkey::new_unique(); 19];
        let expected = Pubkey::new_unique();
        keys[AMM_COIN_CREATOR_ACCOUNT_IDX] = expected;
        assert_eq!(extract_coin_creator_from_keys(&keys), Some(expected));
    }
}
