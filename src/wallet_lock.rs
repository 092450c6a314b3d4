//! Wallet lock (C6): a distributed mutex keyed by wallet id so at most one
//! transaction is in flight per wallet at any instant, with bounded wait
//! and owner-verified release.
//!
//! Built on [`KvStore::try_acquire_lock`]/[`release_lock`], generalizing
//! this codebase's async-task coordination idioms (as in
//! `bot_coordinator.rs`'s shared-state guards) to a cross-process SETNX
//! mutex instead of an in-process one, since wallet exclusivity must hold
//! across every worker process sharing the same Redis.

use crate::constants::{WALLET_LOCK_ACQUIRE_TIMEOUT, WALLET_LOCK_POLL_INTERVAL, WALLET_LOCK_TTL};
use crate::errors::{CoreError, CoreResult};
use crate::kv_store::KvStore;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Held for the duration of one transaction attempt sequence. Releases
/// the lock on drop via a blocking best-effort release is not possible in
/// async Rust, so callers must explicitly call [`release`].
pub struct WalletLockGuard {
    key: String,
    owner: String,
    store: KvStore,
    released: bool,
}

impl WalletLockGuard {
    pub async fn release(mut self) -> CoreResult<()> {
        self.store.release_lock(&self.key, &self.owner).await?;
        self.released = true;
        Ok(())
    }
}

impl Drop for WalletLockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(key = %self.key, "⚠️ wallet lock guard dropped without explicit release, relying on TTL expiry");
        }
    }
}

pub struct WalletLock {
    store: KvStore,
}

impl WalletLock {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Poll for up to [`WALLET_LOCK_ACQUIRE_TIMEOUT`] at
    /// [`WALLET_LOCK_POLL_INTERVAL`] cadence. Returns a "busy" rejection
    /// without consuming a job attempt if the wait times out.
    pub async fn acquire(&self, wallet_id: &str) -> CoreResult<WalletLockGuard> {
        let key = format!("wallet-lock:{wallet_id}");
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + WALLET_LOCK_ACQUIRE_TIMEOUT;

        loop {
            if self.store.try_acquire_lock(&key, &owner, WALLET_LOCK_TTL).await? {
                debug!(wallet_id, "🔒 wallet lock acquired");
                return Ok(WalletLockGuard {
                    key,
                    owner,
                    store: self.store.clone(),
                    released: false,
                });
            }

            if Instant::now() >= deadline {
                return Err(CoreError::rejected(format!("wallet {wallet_id} is busy")));
            }

            tokio::time::sleep(WALLET_LOCK_POLL_INTERVAL).await;
        }
    }
}
