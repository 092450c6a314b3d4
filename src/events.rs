//! Outbound user-event fan-out: `snipe:*`, `position:*`, `migration:*`
//! notifications, published both to an in-process broadcast channel (for
//! a local websocket layer to pick up) and to the cross-process pub/sub
//! channel so other workers see the same stream.
//!
//! Mirrors `websocket_dashboard.rs`'s broadcast-channel-to-client-fan-out
//! shape, swapping its periodic metrics snapshot for discrete fire-and-
//! forget event records.

use crate::kv_store::KvStore;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    pub kind: String,
    pub user: String,
    pub payload: serde_json::Value,
}

#[derive(Clone)]
pub struct EventBus {
    local: broadcast::Sender<UserEvent>,
    kv: KvStore,
}

impl EventBus {
    pub fn new(kv: KvStore) -> Self {
        let (local, _) = broadcast::channel(4096);
        Self { local, kv }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.local.subscribe()
    }

    /// Fire-and-forget emit: local subscribers get it immediately; the
    /// cross-process publish is best-effort and never blocks the caller's
    /// main flow on a Redis outage.
    pub async fn emit(&self, kind: &str, user: &str, payload: serde_json::Value) {
        let event = UserEvent { kind: kind.to_string(), user: user.to_string(), payload };
        let _ = self.local.send(event.clone());

        let channel = format!("events:{user}");
        let body = json!({ "kind": event.kind, "payload": event.payload }).to_string();
        if let Err(e) = self.kv.publish(&channel, &body).await {
            debug!(kind, user, error = %e, "cross-process event publish failed, local subscribers still notified");
        }
    }

    pub async fn emit_migration_matched(&self, user: &str, mint: &str, sniper_id: &str) {
        self.emit("migration:matched", user, json!({ "mint": mint, "sniper_id": sniper_id })).await;
    }

    pub async fn emit_snipe(&self, user: &str, phase: &str, mint: &str, detail: serde_json::Value) {
        self.emit(&format!("snipe:{phase}"), user, json!({ "mint": mint, "detail": detail })).await;
    }

    pub async fn emit_position(&self, user: &str, phase: &str, position_id: &str, detail: serde_json::Value) {
        self.emit(&format!("position:{phase}"), user, json!({ "position_id": position_id, "detail": detail })).await;
    }
}
