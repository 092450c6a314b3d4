//! Redis-backed shared primitives (C6's lock backing store, the
//! per-(sniper,mint) dedup lock, pub/sub event fan-out, and the persistent
//! priority queue), all built on `redis::cmd` the way this codebase's
//! enhanced-sniper module drives its DragonflyDB cache — raw commands via
//! `ConnectionManager` rather than a higher-level ORM.

use crate::errors::{CoreError, CoreResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CoreError::fatal(format!("invalid SHARED_KV_URL: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| CoreError::fatal(format!("could not connect to shared K/V store: {e}")))?;
        Ok(Self { conn })
    }

    /// Atomic `SET key value NX EX ttl`; returns true if the lock was
    /// acquired (key did not already exist).
    pub async fn try_acquire_lock(&self, key: &str, owner: &str, ttl: Duration) -> CoreResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::transient(format!("lock acquire failed: {e}")))?;
        Ok(result.is_some())
    }

    /// Owner-verified release: only deletes the key if it still holds our
    /// owner token, so a lock we lost to TTL expiry can't be stolen back.
    pub async fn release_lock(&self, key: &str, owner: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let current: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| CoreError::transient(format!("lock release read failed: {e}")))?;
        if current.as_deref() == Some(owner) {
            let _: () = conn
                .del(key)
                .await
                .map_err(|e| CoreError::transient(format!("lock release delete failed: {e}")))?;
        }
        Ok(())
    }

    /// `SETNX` with a TTL and no release path, used for the one-shot
    /// per-(sniper,mint) dedup lock.
    pub async fn set_once(&self, key: &str, ttl: Duration) -> CoreResult<bool> {
        self.try_acquire_lock(key, "1", ttl).await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| CoreError::transient(format!("publish failed: {e}")))?;
        Ok(())
    }

    /// `ZADD` a job id with its priority as score, for the persistent
    /// priority queue.
    pub async fn queue_push(&self, queue: &str, member: &str, priority: u32) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .zadd(queue, member, priority)
            .await
            .map_err(|e| CoreError::transient(format!("queue push failed: {e}")))?;
        Ok(())
    }

    /// `ZPOPMIN`: the lowest-priority-number job, since job priority is
    /// "lower numeric value dequeues first".
    pub async fn queue_pop(&self, queue: &str) -> CoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn
            .zpopmin(queue, 1)
            .await
            .map_err(|e| CoreError::transient(format!("queue pop failed: {e}")))?;
        Ok(popped.into_iter().next().map(|(member, _)| member))
    }
}
