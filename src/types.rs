//! Core data model: Migration, SniperConfig, Quote, SnipeJob, Position,
//! ExecutionResult, and the supporting enums the rest of the pipeline
//! passes around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

/// The on-chain event by which a token graduates from the bonding-curve
/// launchpad to the AMM. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub coin_creator: Option<Pubkey>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub initial_liquidity: f64,
    pub initial_mcap: Option<f64>,
    pub source_timestamp: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub detection_latency_ms: i64,
    pub signature: String,
}

impl Migration {
    /// `detected_at − source_timestamp`, used for freshness checks at
    /// both the detector and the orchestrator.
    pub fn age(&self) -> chrono::Duration {
        self.detected_at - self.source_timestamp
    }

    pub fn is_eligible_mint(&self, token_program: &Pubkey, token_2022_program: &Pubkey) -> bool {
        self.mint.to_string().ends_with(crate::constants::ELIGIBLE_MINT_SUFFIX)
            || token_program == token_2022_program
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SniperFilters {
    pub min_liquidity: Option<f64>,
    pub max_mcap: Option<f64>,
    pub min_volume_usd: Option<f64>,
    pub max_migration_age_minutes: Option<i64>,
    pub min_holders: Option<u64>,
    pub max_dev_pct: Option<f64>,
    pub max_top10_pct: Option<f64>,
    pub require_twitter: Option<bool>,
    pub require_telegram: Option<bool>,
    pub require_website: Option<bool>,
    pub min_twitter_followers: Option<u64>,
    pub min_creator_score: Option<f64>,
    pub require_lp_lock: Option<bool>,
    pub require_dex_paid: Option<bool>,
    pub name_patterns: Vec<String>,
    pub excluded_patterns: Vec<String>,
}

impl SniperFilters {
    /// Whether any field requires an on-demand enrichment call (§4.2's
    /// "predicates are pure functions of the migration plus, when needed,
    /// on-demand enrichment calls"). Liquidity/mcap/age/name filters read
    /// `Migration` directly and never trigger this.
    pub fn needs_enrichment(&self) -> bool {
        self.min_volume_usd.is_some()
            || self.min_holders.is_some()
            || self.max_dev_pct.is_some()
            || self.max_top10_pct.is_some()
            || self.require_twitter.is_some()
            || self.require_telegram.is_some()
            || self.require_website.is_some()
            || self.min_twitter_followers.is_some()
            || self.min_creator_score.is_some()
            || self.require_lp_lock.is_some()
            || self.require_dex_paid.is_some()
    }
}

/// On-demand enrichment data (§4.2) for a mint: volume, holder/concentration
/// stats, socials, and LP/dev-paid flags. The enrichment service itself is
/// an out-of-scope external collaborator (fire-and-forget token-metadata
/// enrichment per SPEC_FULL.md's Out-of-scope list); this is the narrow
/// typed view of its response the filter predicates read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichmentData {
    pub volume_usd: Option<f64>,
    pub holders: Option<u64>,
    pub dev_pct: Option<f64>,
    pub top10_pct: Option<f64>,
    pub has_twitter: Option<bool>,
    pub has_telegram: Option<bool>,
    pub has_website: Option<bool>,
    pub twitter_followers: Option<u64>,
    pub creator_score: Option<f64>,
    pub lp_locked: Option<bool>,
    pub dex_paid: Option<bool>,
}

/// User-owned predicate + trade parameters. Dispatches an automated buy
/// when a matching migration occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniperConfig {
    pub id: String,
    pub user: String,
    pub wallet_id: String,
    pub name: String,
    pub active: bool,
    pub snipe_amount: f64,
    pub slippage_bps: u64,
    pub priority_fee: f64,
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    pub cover_initials: Option<bool>,
    pub mev_protected: bool,
    pub filters: SniperFilters,
}

impl SniperConfig {
    /// `priority = max(1, 100 − floor(priority_fee × 10_000))`.
    pub fn job_priority(&self) -> u32 {
        let raw = 100i64 - (self.priority_fee * 10_000.0).floor() as i64;
        raw.max(1) as u32
    }
}

/// Token-reserve-adjusted buy or sell quote, carrying every account the
/// transaction builder needs.
#[derive(Debug, Clone)]
pub struct BuyQuote {
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub coin_creator: Pubkey,
    pub token_program: Pubkey,
    pub token_reserve: u64,
    pub sol_reserve: u64,
    pub expected_tokens: u64,
    pub min_tokens_out: u64,
    pub max_sol_spend: u64,
    pub price_impact: f64,
}

#[derive(Debug, Clone)]
pub struct SellQuote {
    pub mint: Pubkey,
    pub pool: Pubkey,
    pub base_vault: Pubkey,
    pub quote_vault: Pubkey,
    pub coin_creator: Pubkey,
    pub token_program: Pubkey,
    pub token_amount: u64,
    pub expected_sol: u64,
    pub min_sol_out: u64,
    pub price_impact: f64,
}

/// A unit of work enqueued by the orchestrator and drained by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipeJob {
    pub job_id: String,
    pub sniper_id: String,
    pub mint: Pubkey,
    pub migration_snapshot: Migration,
    pub created_at: DateTime<Utc>,
    pub priority: u32,
    pub attempts: u32,
}

impl SnipeJob {
    pub fn new(sniper: &SniperConfig, migration: &Migration) -> Self {
        let now = Utc::now();
        Self {
            job_id: format!("{}-{}-{}", sniper.id, migration.mint, now.timestamp_millis()),
            sniper_id: sniper.id.clone(),
            mint: migration.mint,
            migration_snapshot: migration.clone(),
            created_at: now,
            priority: sniper.job_priority(),
            attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Opening,
    Open,
    Selling,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user: String,
    pub wallet: String,
    pub sniper: String,
    pub mint: Pubkey,
    pub status: PositionStatus,
    pub entry_sol: f64,
    pub entry_tokens: f64,
    pub entry_price: f64,
    pub entry_mcap: Option<f64>,
    pub current_tokens: f64,
    pub exit_sol: Option<f64>,
    pub exit_price: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellReason {
    Manual,
    TakeProfit,
    StopLoss,
    TrailingStop,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFees {
    pub platform: f64,
    pub tip: f64,
    pub network: f64,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub signature: Option<String>,
    pub tokens: Option<f64>,
    pub sol_spent: Option<f64>,
    pub sol_received: Option<f64>,
    pub fees: ExecutionFees,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            signature: None,
            tokens: None,
            sol_spent: None,
            sol_received: None,
            fees: ExecutionFees::default(),
            error: Some(error.into()),
        }
    }
}

/// Snapshot of every account the enhanced-tx parser needs to surface,
/// per the "narrow typed view" redesign note (SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub struct ParsedInstructionView {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedTransactionView {
    pub signature: String,
    pub slot: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub instructions: Vec<ParsedInstructionView>,
    pub inner_instructions: HashMap<usize, Vec<ParsedInstructionView>>,
    pub native_transfers: Vec<(Pubkey, Pubkey, u64)>,
    pub token_transfers: Vec<(Pubkey, Pubkey, u64)>,
}

impl ParsedTransactionView {
    /// All top-level and inner instructions in a single flat iterator,
    /// used by the coin-creator and migration-account extraction walks.
    pub fn all_instructions(&self) -> impl Iterator<Item = &ParsedInstructionView> {
        self.instructions
            .iter()
            .chain(self.inner_instructions.values().flatten())
    }

    pub fn largest_native_transfer_lamports(&self) -> Option<u64> {
        self.native_transfers.iter().map(|(_, _, amount)| *amount).max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPath {
    MevParallel,
    StakedRpc,
    DirectRpc,
}

#[derive(Debug, Clone, Copy)]
pub struct AttemptStep {
    pub path: SubmissionPath,
    pub tip_multiplier: f64,
}

pub fn attempt_schedule(mev_protected: bool) -> &'static [AttemptStep] {
    const MEV_SCHEDULE: [AttemptStep; 4] = [
        AttemptStep { path: SubmissionPath::MevParallel, tip_multiplier: 1.5 },
        AttemptStep { path: SubmissionPath::MevParallel, tip_multiplier: 2.5 },
        AttemptStep { path: SubmissionPath::StakedRpc, tip_multiplier: 3.5 },
        AttemptStep { path: SubmissionPath::DirectRpc, tip_multiplier: 5.0 },
    ];
    const NON_MEV_SCHEDULE: [AttemptStep; 3] = [
        AttemptStep { path: SubmissionPath::StakedRpc, tip_multiplier: 1.5 },
        AttemptStep { path: SubmissionPath::StakedRpc, tip_multiplier: 2.5 },
        AttemptStep { path: SubmissionPath::DirectRpc, tip_multiplier: 4.0 },
    ];
    if mev_protected {
        &MEV_SCHEDULE
    } else {
        &NON_MEV_SCHEDULE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sniper(priority_fee: f64) -> SniperConfig {
        SniperConfig {
            id: "s1".into(),
            user: "u1".into(),
            wallet_id: "w1".into(),
            name: "test".into(),
            active: true,
            snipe_amount: 0.1,
            slippage_bps: 1000,
            priority_fee,
            take_profit_pct: None,
            stop_loss_pct: None,
            trailing_stop_pct: None,
            cover_initials: None,
            mev_protected: true,
            filters: SniperFilters::default(),
        }
    }

    #[test]
    fn job_priority_matches_formula() {
        assert_eq!(sniper(0.003).job_priority(), 70);
        assert_eq!(sniper(0.0).job_priority(), 100);
        // Large priority fees floor at 1, never go negative or to 0.
        assert_eq!(sniper(1.0).job_priority(), 1);
    }

    #[test]
    fn attempt_schedule_tips_are_nondecreasing() {
        for schedule in [attempt_schedule(true), attempt_schedule(false)] {
            let mut last = 0.0;
            for step in schedule {
                assert!(step.tip_multiplier >= last);
                last = step.tip_multiplier;
            }
        }
    }
}
