//! Error taxonomy for the migration-snipe pipeline.
//!
//! Each variant maps to exactly one of the propagation classes: fatal
//! configuration (abort process), transient (retry within the attempt
//! schedule), logical reject (surface to user, no retry), duplicate
//! (silent, logged), or simulation failure (structured, per-request fatal).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing/invalid platform fee address, missing RPC key, missing
    /// encryption key. The caller should abort the process.
    #[error("fatal configuration error: {0}")]
    Fatal(String),

    /// Submission failure, confirmation timeout, pool-not-yet-indexed,
    /// rate-limited enrichment. Retried within the attempt schedule.
    #[error("transient error: {0}")]
    Transient(String),

    /// Wallet not found, wallet type not server-signable, decryption
    /// mismatch, busy-wallet, insufficient SOL, zero token balance at
    /// sell, no liquidity at quote, all attempts exhausted.
    #[error("{0}")]
    Rejected(String),

    /// Per-(sniper,mint) lock already held, signature already processed,
    /// mint already in dedup window, migration stale. Silent, logged.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Simulation pre-gate failed with a known instruction error.
    #[error("simulation failed (code {code}): {last_log}")]
    SimulationFailed {
        code: i64,
        last_log: String,
        logs: Vec<String>,
    },
}

impl CoreError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    /// Translate a known Anchor-style instruction error code into a short
    /// human-readable reason, per the simulation-gate requirements.
    pub fn describe_instruction_error_code(code: i64) -> &'static str {
        match code {
            3005 => "account-not-enough-keys",
            3004 => "account-did-not-deserialize",
            3012 => "account-not-initialized",
            _ => "unknown-instruction-error",
        }
    }

    /// Whether this error class should be retried by the caller's own
    /// attempt schedule (C7) rather than surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
