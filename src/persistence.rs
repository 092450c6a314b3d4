//! Persistence (C14): a `rusqlite` wrapper loading `schema.sql` via
//! `include_str!`, with one method per row-shaped operation the pipeline
//! needs, plus the startup-recovery routine.
//!
//! Connection handling and schema loading follow this codebase's
//! `database_tracker.rs` exactly (`Arc<Mutex<Connection>>`, schema loaded
//! once via `execute_batch`); the table set itself is new since this
//! system tracks sniper configs and positions rather than opportunities.

use crate::errors::{CoreError, CoreResult};
use crate::types::{ExecutionResult, Migration, Position, PositionStatus, SniperConfig};
use crate::wallet_manager::EncryptedWallet;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::str::FromStr;
use tracing::info;

#[derive(Clone)]
pub struct Persistence {
    conn: Arc<Mutex<Connection>>,
}

impl Persistence {
    pub fn open(db_path: &str) -> CoreResult<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::fatal(format!("could not create data directory: {e}")))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::fatal(format!("could not open database at {db_path}: {e}")))?;

        let schema = include_str!("../schema.sql");
        conn.execute_batch(schema)
            .map_err(|e| CoreError::fatal(format!("could not initialize schema: {e}")))?;

        info!("✅ database initialized: {}", db_path);

        let store = Self { conn: Arc::new(Mutex::new(conn)) };
        store.recover_stuck_positions()?;
        Ok(store)
    }

    /// Startup recovery: any position stuck in `selling` across a crash
    /// is transient state and reverts to `open`.
    fn recover_stuck_positions(&self) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute("UPDATE positions SET status = 'open' WHERE status = 'selling'", [])
            .map_err(|e| CoreError::fatal(format!("startup recovery failed: {e}")))?;
        if updated > 0 {
            info!(updated, "🔧 recovered positions stuck mid-sell at startup");
        }
        Ok(())
    }

    pub fn record_migration(&self, migration: &Migration) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO migrations (
                mint, pool, coin_creator, name, symbol, initial_liquidity, initial_mcap,
                source_timestamp, detected_at, detection_latency_ms, signature, stored_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                migration.mint.to_string(),
                migration.pool.to_string(),
                migration.coin_creator.map(|c| c.to_string()),
                migration.name,
                migration.symbol,
                migration.initial_liquidity,
                migration.initial_mcap,
                migration.source_timestamp.to_rfc3339(),
                migration.detected_at.to_rfc3339(),
                migration.detection_latency_ms,
                migration.signature,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::transient(format!("failed to persist migration: {e}")))?;
        Ok(())
    }

    pub fn signature_already_processed(&self, signature: &str) -> CoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM processed_signatures WHERE signature = ?1)",
                params![signature],
                |row| row.get(0),
            )
            .map_err(|e| CoreError::transient(format!("signature lookup failed: {e}")))?;
        Ok(exists)
    }

    pub fn mark_signature_processed(&self, signature: &str, mint: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO processed_signatures (signature, mint, processed_at) VALUES (?1, ?2, ?3)",
            params![signature, mint, Utc::now().to_rfc3339()],
        )
        .map_err(|e| CoreError::transient(format!("failed to mark signature processed: {e}")))?;
        Ok(())
    }

    pub fn load_active_snipers(&self) -> CoreResult<Vec<SniperConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, wallet_id, name, snipe_amount_sol, slippage_bps, priority_fee_sol,
                        take_profit_pct, stop_loss_pct, trailing_stop_pct, cover_initials, mev_protected,
                        filters_json
                 FROM sniper_configs WHERE active = 1",
            )
            .map_err(|e| CoreError::transient(format!("prepare failed: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let filters_json: String = row.get(12)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, u64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, Option<f64>>(7)?,
                    row.get::<_, Option<f64>>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                    row.get::<_, Option<bool>>(10)?,
                    row.get::<_, bool>(11)?,
                    filters_json,
                ))
            })
            .map_err(|e| CoreError::transient(format!("query failed: {e}")))?;

        let mut snipers = Vec::new();
        for row in rows {
            let (id, user, wallet_id, name, snipe_amount, slippage_bps, priority_fee, take_profit_pct,
                 stop_loss_pct, trailing_stop_pct, cover_initials, mev_protected, filters_json) =
                row.map_err(|e| CoreError::transient(format!("row decode failed: {e}")))?;
            let filters = serde_json::from_str(&filters_json).unwrap_or_default();
            snipers.push(SniperConfig {
                id,
                user,
                wallet_id,
                name,
                active: true,
                snipe_amount,
                slippage_bps,
                priority_fee,
                take_profit_pct,
                stop_loss_pct,
                trailing_stop_pct,
                cover_initials,
                mev_protected,
                filters,
            });
        }
        Ok(snipers)
    }

    /// Reload one sniper config by id, used by the worker when a queued
    /// job's snapshot needs the latest trade parameters rather than
    /// whatever was active at enqueue time.
    pub fn load_sniper(&self, sniper_id: &str) -> CoreResult<SniperConfig> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, wallet_id, name, snipe_amount_sol, slippage_bps, priority_fee_sol,
                    take_profit_pct, stop_loss_pct, trailing_stop_pct, cover_initials, mev_protected,
                    filters_json
             FROM sniper_configs WHERE id = ?1",
            params![sniper_id],
            |row| {
                let filters_json: String = row.get(12)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, u64>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, Option<f64>>(7)?,
                    row.get::<_, Option<f64>>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                    row.get::<_, Option<bool>>(10)?,
                    row.get::<_, bool>(11)?,
                    filters_json,
                ))
            },
        )
        .map_err(|e| CoreError::rejected(format!("sniper {sniper_id} not found: {e}")))
        .map(|(id, user, wallet_id, name, snipe_amount, slippage_bps, priority_fee, take_profit_pct,
               stop_loss_pct, trailing_stop_pct, cover_initials, mev_protected, filters_json)| {
            SniperConfig {
                id,
                user,
                wallet_id,
                name,
                active: true,
                snipe_amount,
                slippage_bps,
                priority_fee,
                take_profit_pct,
                stop_loss_pct,
                trailing_stop_pct,
                cover_initials,
                mev_protected,
                filters: serde_json::from_str(&filters_json).unwrap_or_default(),
            }
        })
    }

    pub fn insert_sniper(&self, sniper: &SniperConfig) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let filters_json = serde_json::to_string(&sniper.filters)
            .map_err(|e| CoreError::fatal(format!("sniper filters did not serialize: {e}")))?;
        conn.execute(
            "INSERT INTO sniper_configs (
                id, user_id, wallet_id, name, active, snipe_amount_sol, slippage_bps, priority_fee_sol,
                take_profit_pct, stop_loss_pct, trailing_stop_pct, cover_initials, mev_protected, filters_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                sniper.id,
                sniper.user,
                sniper.wallet_id,
                sniper.name,
                sniper.active,
                sniper.snipe_amount,
                sniper.slippage_bps,
                sniper.priority_fee,
                sniper.take_profit_pct,
                sniper.stop_loss_pct,
                sniper.trailing_stop_pct,
                sniper.cover_initials,
                sniper.mev_protected,
                filters_json,
            ],
        )
        .map_err(|e| CoreError::fatal(format!("failed to persist sniper config: {e}")))?;
        Ok(())
    }

    pub fn increment_tokens_filtered(&self, sniper_id: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE sniper_configs SET tokens_filtered = tokens_filtered + 1 WHERE id = ?1",
            params![sniper_id],
        )
        .map_err(|e| CoreError::transient(format!("failed to bump tokens_filtered: {e}")))?;
        Ok(())
    }

    pub fn insert_position(&self, position: &Position) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO positions (
                id, user_id, wallet_id, sniper_id, mint, status, entry_sol, entry_tokens,
                entry_price, entry_mcap, current_tokens, opened_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                position.id,
                position.user,
                position.wallet,
                position.sniper,
                position.mint.to_string(),
                status_str(position.status),
                position.entry_sol,
                position.entry_tokens,
                position.entry_price,
                position.entry_mcap,
                position.current_tokens,
                position.opened_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::transient(format!("failed to persist position: {e}")))?;
        Ok(())
    }

    pub fn load_position(&self, position_id: &str) -> CoreResult<Position> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, wallet_id, sniper_id, mint, status, entry_sol, entry_tokens,
                    entry_price, entry_mcap, current_tokens, exit_sol, exit_price, opened_at, closed_at
             FROM positions WHERE id = ?1",
            params![position_id],
            |row| {
                let status_txt: String = row.get(5)?;
                let opened_at: String = row.get(13)?;
                let closed_at: Option<String> = row.get(14)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    status_txt,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, Option<f64>>(9)?,
                    row.get::<_, f64>(10)?,
                    row.get::<_, Option<f64>>(11)?,
                    row.get::<_, Option<f64>>(12)?,
                    opened_at,
                    closed_at,
                ))
            },
        )
        .map_err(|e| CoreError::rejected(format!("position {position_id} not found: {e}")))
        .and_then(
            |(id, user, wallet, sniper, mint, status_txt, entry_sol, entry_tokens, entry_price,
              entry_mcap, current_tokens, exit_sol, exit_price, opened_at, closed_at)| {
                Ok(Position {
                    id,
                    user,
                    wallet,
                    sniper,
                    mint: solana_sdk::pubkey::Pubkey::from_str(&mint)
                        .map_err(|e| CoreError::fatal(format!("corrupt position mint: {e}")))?,
                    status: status_from_str(&status_txt)?,
                    entry_sol,
                    entry_tokens,
                    entry_price,
                    entry_mcap,
                    current_tokens,
                    exit_sol,
                    exit_price,
                    opened_at: chrono::DateTime::parse_from_rfc3339(&opened_at)
                        .map_err(|e| CoreError::fatal(format!("corrupt opened_at: {e}")))?
                        .with_timezone(&Utc),
                    closed_at: closed_at
                        .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                        .transpose()
                        .map_err(|e| CoreError::fatal(format!("corrupt closed_at: {e}")))?,
                })
            },
        )
    }

    pub fn update_position_status(&self, position_id: &str, status: PositionStatus) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE positions SET status = ?1 WHERE id = ?2",
            params![status_str(status), position_id],
        )
        .map_err(|e| CoreError::transient(format!("failed to update position status: {e}")))?;
        Ok(())
    }

    pub fn close_position(&self, position_id: &str, exit_sol: f64, exit_price: f64) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE positions SET status = 'closed', exit_sol = ?1, exit_price = ?2, closed_at = ?3 WHERE id = ?4",
            params![exit_sol, exit_price, Utc::now().to_rfc3339(), position_id],
        )
        .map_err(|e| CoreError::transient(format!("failed to close position: {e}")))?;
        Ok(())
    }

    pub fn record_execution_result(
        &self,
        position_id: Option<&str>,
        job_id: Option<&str>,
        kind: &str,
        result: &ExecutionResult,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_results (
                position_id, job_id, kind, success, signature, tokens, sol_spent, sol_received,
                fee_platform, fee_tip, fee_network, error, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                position_id,
                job_id,
                kind,
                result.success,
                result.signature,
                result.tokens,
                result.sol_spent,
                result.sol_received,
                result.fees.platform,
                result.fees.tip,
                result.fees.network,
                result.error,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::transient(format!("failed to persist execution result: {e}")))?;
        Ok(())
    }
    pub fn insert_wallet(&self, wallet: &EncryptedWallet) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO wallets (wallet_id, public_key, encrypted_private_key, nonce, key_derivation_salt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                wallet.wallet_id,
                wallet.public_key.to_string(),
                wallet.encrypted_private_key,
                wallet.nonce.to_vec(),
                wallet.key_derivation_salt.to_vec(),
            ],
        )
        .map_err(|e| CoreError::fatal(format!("failed to persist wallet: {e}")))?;
        Ok(())
    }

    pub fn load_wallet(&self, wallet_id: &str) -> CoreResult<EncryptedWallet> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT wallet_id, public_key, encrypted_private_key, nonce, key_derivation_salt
             FROM wallets WHERE wallet_id = ?1",
            params![wallet_id],
            |row| {
                let public_key: String = row.get(1)?;
                let nonce: Vec<u8> = row.get(3)?;
                let salt: Vec<u8> = row.get(4)?;
                Ok((row.get::<_, String>(0)?, public_key, row.get::<_, Vec<u8>>(2)?, nonce, salt))
            },
        )
        .map_err(|e| CoreError::rejected(format!("wallet {wallet_id} not found: {e}")))
        .and_then(|(wallet_id, public_key, encrypted_private_key, nonce, salt)| {
            Ok(EncryptedWallet {
                wallet_id,
                public_key: solana_sdk::pubkey::Pubkey::from_str(&public_key)
                    .map_err(|e| CoreError::fatal(format!("corrupt wallet public key: {e}")))?,
                encrypted_private_key,
                nonce: nonce
                    .try_into()
                    .map_err(|_| CoreError::fatal("corrupt wallet nonce length"))?,
                key_derivation_salt: salt
                    .try_into()
                    .map_err(|_| CoreError::fatal("corrupt wallet salt length"))?,
            })
        })
    }
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Opening => "opening",
        PositionStatus::Open => "open",
        PositionStatus::Selling => "selling",
        PositionStatus::Closed => "closed",
    }
}

fn status_from_str(s: &str) -> CoreResult<PositionStatus> {
    match s {
        "opening" => Ok(PositionStatus::Opening),
        "open" => Ok(PositionStatus::Open),
        "selling" => Ok(PositionStatus::Selling),
        "closed" => Ok(PositionStatus::Closed),
        other => Err(CoreError::fatal(format!("corrupt position status: {other}"))),
    }
}
