/// Global constants for the migration-snipe pipeline.
///
/// Centralizes magic numbers from the specification so they have one
/// definition site instead of being scattered through the components
/// that consume them.
use std::time::Duration;

// ============================================================================
// SOLANA BLOCKCHAIN CONSTANTS
// ============================================================================

/// 1 SOL = 1 billion lamports
pub const SOL_DECIMALS: u64 = 1_000_000_000;

pub const fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / SOL_DECIMALS as f64
}

pub const fn sol_to_lamports(sol: f64) -> u64 {
    (sol * SOL_DECIMALS as f64) as u64
}

pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111111111111";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

// ============================================================================
// MIGRATION DETECTOR (C8)
// ============================================================================

/// Launchpad bonding-curve program whose logs we subscribe to.
pub const LAUNCHPAD_PROGRAM_ID: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// AMM program the launchpad migrates tokens into.
pub const AMM_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";

/// Log line that marks a migration instruction.
pub const MIGRATE_LOG_LINE: &str = "Program log: Instruction: Migrate";

/// Account index of the mint within the migrate instruction's account list.
pub const MIGRATE_MINT_ACCOUNT_IDX: usize = 2;
/// Account index of the pool within the migrate instruction's account list.
pub const MIGRATE_POOL_ACCOUNT_IDX: usize = 9;
/// Account index that distinguishes the standard vs. extended token program.
pub const MIGRATE_TOKEN_PROGRAM_ACCOUNT_IDX: usize = 19;
/// Account index of the coin creator within the nested AMM instruction.
pub const AMM_COIN_CREATOR_ACCOUNT_IDX: usize = 18;

/// Eligible-mint suffix rule.
pub const ELIGIBLE_MINT_SUFFIX: &str = "pump";

/// Maximum age of a migration event at detection time before it is dropped.
pub const MAX_MIGRATION_AGE_DETECTION: Duration = Duration::from_secs(60);
/// Maximum age of a migration event at orchestration time before it is dropped.
pub const MAX_MIGRATION_AGE_ORCHESTRATION: Duration = Duration::from_secs(30);

/// Bounded in-memory processed-signature set (detector).
pub const PROCESSED_SIGNATURE_SET_MAX: usize = 1_000;
/// Fraction evicted (oldest-first) when the set overflows.
pub const PROCESSED_SIGNATURE_EVICT_FRACTION: f64 = 0.20;

/// In-memory mint dedup window (detector).
pub const MINT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Rate-limited signature fetch queue cadence.
pub const FETCH_QUEUE_INTERVAL: Duration = Duration::from_millis(100);

/// Socket idle threshold before a connection is declared stale.
pub const DETECTOR_STALE_AFTER: Duration = Duration::from_secs(60);
/// Application-level keep-alive ping cadence.
pub const DETECTOR_PING_INTERVAL: Duration = Duration::from_secs(30);
/// Reconnect backoff cap.
pub const DETECTOR_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Reconnect attempts before declaring the detector fatally disconnected.
pub const DETECTOR_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Fixed SOL-price constant used for the market-cap fallback estimate.
/// Superseded at runtime by the configured `SOL_PRICE_USD` (see AppConfig);
/// kept here only as the hardcoded default the spec calls out.
pub const DEFAULT_SOL_PRICE_USD: f64 = 120.0;
/// Fully-diluted-valuation multiplier applied to the largest observed native transfer.
pub const MCAP_FDV_MULTIPLIER: f64 = 1.0;
/// Standard graduation default market cap (USD) when no native transfer is observed.
pub const STANDARD_GRADUATION_MCAP_USD: f64 = 69_000.0;
/// Fixed token supply assumed for market-cap math: `entry_sol / tokens_received * TOTAL_SUPPLY * SOL_PRICE_USD`.
pub const TOTAL_SUPPLY: f64 = 1_000_000_000.0;
/// Minimum wallet SOL balance a sell must leave behind to cover fees; below this the sell aborts outright.
pub const MIN_WALLET_SOL_RESERVE: u64 = 5_000_000; // 0.005 SOL

// ============================================================================
// POOL & CREATOR RESOLVER (C3)
// ============================================================================

/// Expected pool account size in bytes; accounts of any other size are rejected.
pub const POOL_ACCOUNT_SIZE: usize = 301;
pub const POOL_BASE_MINT_OFFSET: usize = 43;
pub const POOL_QUOTE_MINT_OFFSET: usize = 75;
pub const POOL_BASE_VAULT_OFFSET: usize = 139;
pub const POOL_QUOTE_VAULT_OFFSET: usize = 171;
/// Pool-data offset that looks like it contains the coin creator but does not;
/// real-world data showed it wrong for many tokens. Never read from here.
pub const POOL_BOGUS_CREATOR_OFFSET: usize = 235;

pub const POOL_DISCOVERY_MAX_RETRIES: u32 = 3;
pub const POOL_DISCOVERY_RETRY_DELAYS_MS: [u64; 3] = [500, 1000, 1500];
pub const POOL_CACHE_TTL: Duration = Duration::from_secs(5);

/// How many recent pool signatures to scan when resolving the coin creator.
pub const CREATOR_RESOLUTION_SIGNATURE_LIMIT: usize = 20;

// ============================================================================
// QUOTE ENGINE (C4)
// ============================================================================

/// Execution tolerance applied to buy quotes (this AMM family is "exact-output-ish").
pub const BUY_EXECUTION_TOLERANCE_BPS: u64 = 500; // 5%

// ============================================================================
// TRANSACTION BUILDER (C5)
// ============================================================================

pub const SWAP_COMPUTE_UNIT_LIMIT: u32 = 400_000;

/// Swap instruction discriminators (8 bytes each).
pub const BUY_DISCRIMINATOR: [u8; 8] = [0x66, 0x06, 0x3D, 0x12, 0x01, 0xDA, 0xEB, 0xEA];
pub const SELL_DISCRIMINATOR: [u8; 8] = [0x33, 0xE6, 0x85, 0xA4, 0x01, 0x7F, 0x83, 0xAD];

/// Fixed-length account lists for the AMM swap instructions.
pub const BUY_ACCOUNT_COUNT: usize = 23;
pub const SELL_ACCOUNT_COUNT: usize = 21;

/// PDA seeds for the AMM-program-owned accounts the swap instruction needs
/// beyond the pool/vaults/mints (global config, event authority, and the
/// two volume-accumulator PDAs buys must debit).
pub const AMM_GLOBAL_CONFIG_SEED: &[u8] = b"global_config";
pub const AMM_EVENT_AUTHORITY_SEED: &[u8] = b"__event_authority";
pub const AMM_GLOBAL_VOLUME_ACCUMULATOR_SEED: &[u8] = b"global_volume_accumulator";
pub const AMM_USER_VOLUME_ACCUMULATOR_SEED: &[u8] = b"user_volume_accumulator";

/// Separate fee program the AMM swap instruction reads a fee-config PDA
/// from (distinct from the AMM program itself).
pub const AMM_FEE_PROGRAM_ID: &str = "pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ";
pub const AMM_FEE_CONFIG_SEED: &[u8] = b"fee_config";

/// Protocol fee recipient the swap instruction pays its own (non-platform)
/// fee cut to, and the wrapped-SOL ATA that receives it.
pub const AMM_PROTOCOL_FEE_RECIPIENT: &str = "62qc2CNXwrYqQScmEdiZFFAnJR262PxWEuNQtxfafNgV";

pub const LOOKUP_TABLE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// SUBMISSION ENGINE (C7)
// ============================================================================

pub const BUNDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const BUNDLE_POLL_TIMEOUT: Duration = Duration::from_secs(3);

pub const CONFIRM_INITIAL_INTERVAL: Duration = Duration::from_millis(400);
pub const CONFIRM_INTERVAL_GROWTH: f64 = 1.3;
pub const CONFIRM_MAX_INTERVAL: Duration = Duration::from_millis(1_500);
pub const CONFIRM_TOTAL_TIMEOUT: Duration = Duration::from_secs(12);

pub const ATTEMPT_GAP: Duration = Duration::from_millis(25);

pub const STAKED_RPC_MAX_RETRIES: usize = 2;
pub const DIRECT_RPC_MAX_RETRIES: usize = 3;

// ============================================================================
// WALLET LOCK (C6)
// ============================================================================

pub const WALLET_LOCK_TTL: Duration = Duration::from_secs(60);
pub const WALLET_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const WALLET_LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// TTL on the per-(sniper,mint) exactly-once dedup lock.
pub const SNIPE_LOCK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// SNIPE WORKER (C10)
// ============================================================================

/// Idle backoff between queue-empty polls of the persistent job queue.
pub const WORKER_QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ============================================================================
// CIRCUIT BREAKER (C1, §7)
// ============================================================================

pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const CIRCUIT_BREAKER_FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const CIRCUIT_BREAKER_OPEN_COOLDOWN: Duration = Duration::from_secs(30);

// ============================================================================
// SECURITY CONSTANTS (wallet decryption collaborator)
// ============================================================================

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const AES_KEY_SIZE: usize = 32;
pub const AES_NONCE_SIZE: usize = 12;
pub const SALT_SIZE: usize = 32;

// ============================================================================
// HELPERS
// ============================================================================

pub const fn bps_to_fraction(bps: u64) -> f64 {
    bps as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sol_lamports_roundtrip() {
        assert_eq!(sol_to_lamports(1.0), SOL_DECIMALS);
        assert_eq!(lamports_to_sol(SOL_DECIMALS), 1.0);
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
    }

    #[test]
    fn bps_to_fraction_basic() {
        assert_eq!(bps_to_fraction(500), 0.05);
        assert_eq!(bps_to_fraction(10_000), 1.0);
    }

    #[test]
    fn pool_offsets_fit_account_size() {
        assert!(POOL_QUOTE_VAULT_OFFSET + 32 <= POOL_ACCOUNT_SIZE);
        assert!(POOL_BOGUS_CREATOR_OFFSET < POOL_ACCOUNT_SIZE);
    }
}
