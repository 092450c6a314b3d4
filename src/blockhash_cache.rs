//! Blockhash & lookup-table cache (C2).
//!
//! Keeps one background-refreshed blockhash so the submission path never
//! blocks on RPC, plus a short-TTL cache of resolved address-lookup-table
//! accounts. Mirrors the read-check-refresh shape of `route_cache.rs` and
//! `token_decimal_cache.rs`, adapted to `tokio::sync::RwLock` since both
//! the refresher task and every caller need async access.

use crate::constants::LOOKUP_TABLE_CACHE_TTL;
use crate::errors::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::address_lookup_table::state::AddressLookupTable;
use solana_sdk::address_lookup_table::AddressLookupTableAccount;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{debug, error, warn};

struct LookupTableEntry {
    account: AddressLookupTableAccount,
    cached_at: DateTime<Utc>,
}

pub struct BlockhashCache {
    rpc: Arc<RpcClient>,
    blockhash: RwLock<Option<Hash>>,
    lookup_tables: RwLock<HashMap<Pubkey, LookupTableEntry>>,
}

impl BlockhashCache {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            blockhash: RwLock::new(None),
            lookup_tables: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn the 5-second background refresh loop. Runs for the lifetime
    /// of the process; failures are logged and retried on the next tick.
    pub fn spawn_refresh_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "⚠️ blockhash refresh failed, keeping stale value");
                }
            }
        });
    }

    async fn refresh(&self) -> CoreResult<()> {
        let hash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| CoreError::transient(format!("get_latest_blockhash failed: {e}")))?;
        *self.blockhash.write().await = Some(hash);
        debug!(%hash, "🔄 blockhash refreshed");
        Ok(())
    }

    /// Current cached blockhash. C7 calls [`force_refresh`] before a retry
    /// attempt rather than trusting a possibly-stale cached value.
    pub async fn current(&self) -> CoreResult<Hash> {
        if let Some(hash) = *self.blockhash.read().await {
            return Ok(hash);
        }
        self.refresh().await?;
        self.blockhash
            .read()
            .await
            .ok_or_else(|| CoreError::transient("blockhash cache empty after refresh"))
    }

    /// Force-invalidate and block on a fresh fetch. Used by the submission
    /// engine before a retry so a stale cached hash can't cause a second
    /// consecutive rejection.
    pub async fn force_refresh(&self) -> CoreResult<Hash> {
        self.refresh().await?;
        self.current().await
    }

    /// Resolve an address lookup table, using the 5-minute TTL cache when
    /// possible and falling back to `getAccountInfo` on miss/expiry.
    pub async fn lookup_table(&self, address: Pubkey) -> CoreResult<AddressLookupTableAccount> {
        {
            let cache = self.lookup_tables.read().await;
            if let Some(entry) = cache.get(&address) {
                let age = Utc::now() - entry.cached_at;
                if age.to_std().unwrap_or(Duration::MAX) < LOOKUP_TABLE_CACHE_TTL {
                    return Ok(entry.account.clone());
                }
            }
        }

        let raw = self
            .rpc
            .get_account(&address)
            .await
            .map_err(|e| CoreError::transient(format!("lookup table fetch failed: {e}")))?;

        let table = AddressLookupTable::deserialize(&raw.data).map_err(|e| {
            error!(%address, error = %e, "❌ lookup table account did not deserialize");
            CoreError::transient(format!("lookup table deserialize failed: {e}"))
        })?;

        let account = AddressLookupTableAccount {
            key: address,
            addresses: table.addresses.to_vec(),
        };

        self.lookup_tables.write().await.insert(
            address,
            LookupTableEntry {
                account: account.clone(),
                cached_at: Utc::now(),
            },
        );

        Ok(account)
    }
}
