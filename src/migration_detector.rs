//! Migration detector (C8): subscribes to the launchpad program's logs,
//! deduplicates by signature, fetches and parses each migrate transaction
//! into a [`Migration`] event, and fans it out locally and cross-process.
//!
//! The background-task-with-cleanup shape (bounded in-memory state, a tick
//! loop pruning stale entries) mirrors `migration_manager.rs`'s position
//! monitor; the transport itself is new, since that module polled
//! on-chain state rather than subscribing to a log stream. Connects over
//! `tokio-tungstenite` (already used for this codebase's dashboard server,
//! here as a client instead) with the reconnect/backoff idiom generalized
//! from the same exponential patterns used around this codebase's RPC
//! fallbacks.

use crate::constants::{
    AMM_PROGRAM_ID, DETECTOR_BACKOFF_CAP, DETECTOR_MAX_RECONNECT_ATTEMPTS, DETECTOR_PING_INTERVAL,
    DETECTOR_STALE_AFTER, ELIGIBLE_MINT_SUFFIX, FETCH_QUEUE_INTERVAL, LAUNCHPAD_PROGRAM_ID,
    MAX_MIGRATION_AGE_DETECTION, MCAP_FDV_MULTIPLIER, MIGRATE_LOG_LINE,
    MIGRATE_MINT_ACCOUNT_IDX, MIGRATE_POOL_ACCOUNT_IDX, MIGRATE_TOKEN_PROGRAM_ACCOUNT_IDX,
    MINT_DEDUP_WINDOW, PROCESSED_SIGNATURE_EVICT_FRACTION, PROCESSED_SIGNATURE_SET_MAX,
    STANDARD_GRADUATION_MCAP_USD, TOKEN_2022_PROGRAM_ID,
};
use crate::external_adapter::ExternalAdapter;
use crate::types::{Migration, ParsedInstructionView, ParsedTransactionView};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    OpenUnsubscribed,
    OpenSubscribed,
    Stale,
    Closed,
}

struct DetectorState {
    processed_signatures: VecDeque<String>,
    mint_last_seen: HashMap<Pubkey, Instant>,
    connection: ConnectionState,
}

pub struct MigrationDetector {
    ws_url: String,
    enhanced_tx_endpoint_url: String,
    adapter: Arc<ExternalAdapter>,
    state: Mutex<DetectorState>,
    launchpad_program: Pubkey,
    amm_program: Pubkey,
    token_2022_program: Pubkey,
    events: broadcast::Sender<Migration>,
}

impl MigrationDetector {
    pub fn new(ws_url: String, enhanced_tx_endpoint_url: String, adapter: Arc<ExternalAdapter>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            ws_url,
            enhanced_tx_endpoint_url,
            adapter,
            state: Mutex::new(DetectorState {
                processed_signatures: VecDeque::new(),
                mint_last_seen: HashMap::new(),
                connection: ConnectionState::Disconnected,
            }),
            launchpad_program: Pubkey::from_str(LAUNCHPAD_PROGRAM_ID).expect("valid launchpad program id"),
            amm_program: Pubkey::from_str(AMM_PROGRAM_ID).expect("valid amm program id"),
            token_2022_program: Pubkey::from_str(TOKEN_2022_PROGRAM_ID).expect("valid token-2022 program id"),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Migration> {
        self.events.subscribe()
    }

    /// Drive the connect -> subscribe -> receive -> reconnect loop for the
    /// lifetime of the process. Caps at `DETECTOR_MAX_RECONNECT_ATTEMPTS`
    /// consecutive failures before giving up entirely.
    pub async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;

        loop {
            self.set_connection_state(ConnectionState::Connecting).await;

            match self.connect_and_stream().await {
                Ok(()) => {
                    attempt = 0;
                }
                Err(e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "⚠️ detector connection lost");
                }
            }

            self.set_connection_state(ConnectionState::Disconnected).await;

            if attempt >= DETECTOR_MAX_RECONNECT_ATTEMPTS {
                error!("❌ detector exhausted reconnect attempts, giving up");
                self.set_connection_state(ConnectionState::Closed).await;
                return;
            }

            let backoff = Duration::from_secs(2u64.saturating_pow(attempt.min(6))).min(DETECTOR_BACKOFF_CAP);
            info!(attempt, backoff_secs = backoff.as_secs(), "🔄 reconnecting after backoff");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        self.state.lock().await.connection = state;
    }

    async fn connect_and_stream(&self) -> Result<(), String> {
        let (ws_stream, _) = connect_async(&self.ws_url).await.map_err(|e| e.to_string())?;
        let (mut write, mut read) = ws_stream.split();
        self.set_connection_state(ConnectionState::OpenUnsubscribed).await;

        let subscribe_msg = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [self.launchpad_program.to_string()] },
                { "commitment": "confirmed" },
            ],
        });
        write
            .send(Message::Text(subscribe_msg.to_string()))
            .await
            .map_err(|e| e.to_string())?;
        self.set_connection_state(ConnectionState::OpenSubscribed).await;

        let mut last_message = Instant::now();
        let mut ping_ticker = interval(DETECTOR_PING_INTERVAL);
        let mut fetch_ticker = interval(FETCH_QUEUE_INTERVAL);
        let mut pending_signatures: VecDeque<String> = VecDeque::new();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_message = Instant::now();
                            if let Some(signature) = extract_migrate_signature(&text) {
                                pending_signatures.push_back(signature);
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_message = Instant::now();
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.to_string()),
                        None => return Err("websocket stream closed".to_string()),
                    }
                }
                _ = ping_ticker.tick() => {
                    if last_message.elapsed() > DETECTOR_STALE_AFTER {
                        self.set_connection_state(ConnectionState::Stale).await;
                        return Err("no messages received within stale threshold".to_string());
                    }
                    let _ = write.send(Message::Ping(Vec::new())).await;
                }
                _ = fetch_ticker.tick() => {
                    if let Some(signature) = pending_signatures.pop_front() {
                        if let Err(e) = self.process_signature(&signature).await {
                            debug!(signature, error = %e, "skipped candidate signature");
                        }
                    }
                }
            }
        }
    }

    async fn process_signature(&self, signature: &str) -> Result<(), String> {
        {
            let mut state = self.state.lock().await;
            if state.processed_signatures.iter().any(|s| s == signature) {
                return Err("duplicate signature".to_string());
            }
            state.processed_signatures.push_back(signature.to_string());
            if state.processed_signatures.len() > PROCESSED_SIGNATURE_SET_MAX {
                let evict_count =
                    (PROCESSED_SIGNATURE_SET_MAX as f64 * PROCESSED_SIGNATURE_EVICT_FRACTION) as usize;
                for _ in 0..evict_count {
                    state.processed_signatures.pop_front();
                }
            }
        }

        let view = self
            .fetch_parsed_transaction(signature)
            .await
            .map_err(|e| format!("enhanced-tx fetch failed: {e}"))?;

        let migration = self.extract_migration(&view, signature)?;

        if migration.age() > chrono::Duration::from_std(MAX_MIGRATION_AGE_DETECTION).unwrap() {
            debug!(%signature, "migration event dropped as stale at detection");
            return Err("stale migration".to_string());
        }

        {
            let mut state = self.state.lock().await;
            if let Some(last_seen) = state.mint_last_seen.get(&migration.mint) {
                if last_seen.elapsed() < MINT_DEDUP_WINDOW {
                    return Err("mint within dedup window".to_string());
                }
            }
            state.mint_last_seen.insert(migration.mint, Instant::now());
        }

        let _ = self.events.send(migration);
        Ok(())
    }

    async fn fetch_parsed_transaction(&self, signature: &str) -> Result<ParsedTransactionView, String> {
        let body = self
            .adapter
            .fetch_enhanced_transaction(&self.enhanced_tx_endpoint_url, signature)
            .await
            .map_err(|e| e.to_string())?;

        parse_enhanced_transaction(&body, signature)
    }

    fn extract_migration(&self, view: &ParsedTransactionView, signature: &str) -> Result<Migration, String> {
        let migrate_ix = view
            .all_instructions()
            .find(|ix| ix.program_id == self.launchpad_program)
            .ok_or_else(|| "no migrate instruction found".to_string())?;

        let mint = *migrate_ix
            .accounts
            .get(MIGRATE_MINT_ACCOUNT_IDX)
            .ok_or_else(|| "migrate instruction missing mint account".to_string())?;
        let pool = *migrate_ix
            .accounts
            .get(MIGRATE_POOL_ACCOUNT_IDX)
            .ok_or_else(|| "migrate instruction missing pool account".to_string())?;
        let token_program = *migrate_ix
            .accounts
            .get(MIGRATE_TOKEN_PROGRAM_ACCOUNT_IDX)
            .ok_or_else(|| "migrate instruction missing token program account".to_string())?;

        let amm_ix = view.all_instructions().find(|ix| {
            ix.program_id == self.amm_program && ix.accounts.first() == Some(&pool)
        });
        let coin_creator = amm_ix
            .and_then(|ix| ix.accounts.get(crate::constants::AMM_COIN_CREATOR_ACCOUNT_IDX))
            .copied();

        let detected_at = Utc::now();
        let source_timestamp = view.timestamp.unwrap_or(detected_at);
        let detection_latency_ms = (detected_at - source_timestamp).num_milliseconds();

        let largest_transfer = view.largest_native_transfer_lamports();
        let initial_liquidity = largest_transfer
            .map(|l| crate::constants::lamports_to_sol(l))
            .unwrap_or(0.0);
        let initial_mcap = largest_transfer
            .map(|_| initial_liquidity * crate::constants::DEFAULT_SOL_PRICE_USD * MCAP_FDV_MULTIPLIER)
            .or(Some(STANDARD_GRADUATION_MCAP_USD));

        let migration = Migration {
            mint,
            pool,
            coin_creator,
            name: None,
            symbol: None,
            initial_liquidity,
            initial_mcap,
            source_timestamp,
            detected_at,
            detection_latency_ms,
            signature: signature.to_string(),
        };

        if !migration.is_eligible_mint(&token_program, &self.token_2022_program) {
            return Err(format!("mint {mint} does not end with .{ELIGIBLE_MINT_SUFFIX} and is not token-2022"));
        }

        Ok(migration)
    }
}

/// Maps an enhanced-tx endpoint's JSON response (one transaction, Helius-
/// style: top-level `instructions`/`innerInstructions` with base58
/// `programId`/`accounts`/`data`, plus flat `nativeTransfers`/
/// `tokenTransfers`) onto the narrow [`ParsedTransactionView`].
fn parse_enhanced_transaction(body: &serde_json::Value, signature: &str) -> Result<ParsedTransactionView, String> {
    let tx = body.as_array().and_then(|a| a.first()).unwrap_or(body);

    let slot = tx["slot"].as_u64().unwrap_or_default();
    let timestamp = tx["timestamp"]
        .as_i64()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    let instructions = tx["instructions"]
        .as_array()
        .map(|ixs| ixs.iter().filter_map(parse_instruction_view).collect())
        .unwrap_or_default();

    let mut inner_instructions = HashMap::new();
    if let Some(groups) = tx["innerInstructions"].as_array() {
        for group in groups {
            let Some(index) = group["index"].as_u64() else { continue };
            let parsed = group["instructions"]
                .as_array()
                .map(|ixs| ixs.iter().filter_map(parse_instruction_view).collect())
                .unwrap_or_default();
            inner_instructions.insert(index as usize, parsed);
        }
    }

    let native_transfers = tx["nativeTransfers"]
        .as_array()
        .map(|ts| ts.iter().filter_map(parse_native_transfer).collect())
        .unwrap_or_default();
    let token_transfers = tx["tokenTransfers"]
        .as_array()
        .map(|ts| ts.iter().filter_map(parse_native_transfer).collect())
        .unwrap_or_default();

    Ok(ParsedTransactionView {
        signature: signature.to_string(),
        slot,
        timestamp,
        instructions,
        inner_instructions,
        native_transfers,
        token_transfers,
    })
}

fn parse_instruction_view(raw: &serde_json::Value) -> Option<ParsedInstructionView> {
    let program_id = Pubkey::from_str(raw["programId"].as_str()?).ok()?;
    let accounts = raw["accounts"]
        .as_array()?
        .iter()
        .filter_map(|a| a.as_str().and_then(|s| Pubkey::from_str(s).ok()))
        .collect();
    let data = raw["data"]
        .as_str()
        .and_then(|s| bs58::decode(s).into_vec().ok())
        .unwrap_or_default();
    Some(ParsedInstructionView { program_id, accounts, data })
}

fn parse_native_transfer(raw: &serde_json::Value) -> Option<(Pubkey, Pubkey, u64)> {
    let from = Pubkey::from_str(raw["fromUserAccount"].as_str()?).ok()?;
    let to = Pubkey::from_str(raw["toUserAccount"].as_str()?).ok()?;
    let amount = raw["amount"].as_u64()?;
    Some((from, to, amount))
}

fn extract_migrate_signature(log_notification: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(log_notification).ok()?;
    let logs = value["params"]["result"]["value"]["logs"].as_array()?;
    if !logs.iter().any(|l| l.as_str() == Some(MIGRATE_LOG_LINE)) {
        return None;
    }
    value["params"]["result"]["value"]["signature"]
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_migrate_signature_requires_migrate_log_line() {
        let notif = serde_json::json!({
            "params": { "result": { "value": {
                "signature": "sig123",
                "logs": ["Program log: Instruction: Buy"]
            }}}
        });
        assert!(extract_migrate_signature(&notif.to_string()).is_none());
    }

    #[test]
    fn extract_migrate_signature_matches_on_migrate_log() {
        let notif = serde_json::json!({
            "params": { "result": { "value": {
                "signature": "sig456",
                "logs": [MIGRATE_LOG_LINE]
            }}}
        });
        assert_eq!(extract_migrate_signature(&notif.to_string()), Some("sig456".to_string()));
    }
}
