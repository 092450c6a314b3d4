//! Startup configuration (C13): typed, loaded from the environment via
//! `dotenvy` + `std::env`, validated fail-fast before any task spawns.

use crate::errors::{CoreError, CoreResult};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_primary_url: String,
    pub rpc_backup_url: Option<String>,
    pub ws_rpc_url: String,
    pub enhanced_tx_endpoint_url: String,
    /// Token-metadata enrichment endpoint (volume/holders/socials). Optional:
    /// enrichment is an out-of-scope external collaborator, so snipers with
    /// no enrichment-dependent filters run fine without it configured.
    pub enrichment_endpoint_url: Option<String>,
    pub bundle_endpoints: Vec<String>,
    pub platform_fee_address: Pubkey,
    pub platform_fee_bps: u64,
    pub master_encryption_key: String,
    pub jwt_secret: String,
    pub admin_secret: String,
    pub shared_kv_url: String,
    pub queue_backend_url: String,
    pub database_path: String,
    pub sol_price_usd: f64,
    pub paper_trading: bool,
}

impl AppConfig {
    /// Load from the process environment, applying the defaults and
    /// fail-fast validation rules in SPEC_FULL.md §6.
    pub fn from_env() -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let rpc_primary_url = require_env("RPC_PRIMARY_URL")?;
        let rpc_backup_url = std::env::var("RPC_BACKUP_URL").ok();
        let ws_rpc_url = require_env("WS_RPC_URL")?;
        let enhanced_tx_endpoint_url = require_env("ENHANCED_TX_ENDPOINT_URL")?;
        let enrichment_endpoint_url = std::env::var("ENRICHMENT_ENDPOINT_URL").ok();

        let bundle_endpoints = std::env::var("BUNDLE_ENDPOINTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if bundle_endpoints.is_empty() {
            warn!("⚠️ BUNDLE_ENDPOINTS is empty — mev-parallel submission will be skipped");
        }

        let platform_fee_address_raw = require_env("PLATFORM_FEE_ADDRESS")?;
        let platform_fee_address = Pubkey::from_str(&platform_fee_address_raw)
            .map_err(|e| CoreError::fatal(format!("PLATFORM_FEE_ADDRESS does not parse: {e}")))?;
        let system_program = Pubkey::from_str(crate::constants::SYSTEM_PROGRAM_ID)
            .expect("system program id constant is valid");
        if platform_fee_address == system_program {
            return Err(CoreError::fatal(
                "PLATFORM_FEE_ADDRESS must not equal the system program address",
            ));
        }

        let platform_fee_bps = std::env::var("PLATFORM_FEE_BPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let master_encryption_key = require_env("MASTER_ENCRYPTION_KEY")?;
        let jwt_secret = require_env("JWT_SECRET")?;
        let admin_secret = require_env("ADMIN_SECRET")?;
        let shared_kv_url = require_env("SHARED_KV_URL")?;
        let queue_backend_url = require_env("QUEUE_BACKEND_URL")?;

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/sniper.db".to_string());
        let sol_price_usd = std::env::var("SOL_PRICE_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(crate::constants::DEFAULT_SOL_PRICE_USD);
        let paper_trading = std::env::var("PAPER_TRADING")
            .ok()
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let config = Self {
            rpc_primary_url,
            rpc_backup_url,
            ws_rpc_url,
            enhanced_tx_endpoint_url,
            enrichment_endpoint_url,
            bundle_endpoints,
            platform_fee_address,
            platform_fee_bps,
            master_encryption_key,
            jwt_secret,
            admin_secret,
            shared_kv_url,
            queue_backend_url,
            database_path,
            sol_price_usd,
            paper_trading,
        };

        info!(
            "⚙️ Config loaded | paper_trading={} | fee_bps={} | bundle_endpoints={}",
            config.paper_trading,
            config.platform_fee_bps,
            config.bundle_endpoints.len()
        );

        Ok(config)
    }
}

fn require_env(key: &str) -> CoreResult<String> {
    std::env::var(key).map_err(|_| CoreError::fatal(format!("missing required env var {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_system_program_as_fee_address() {
        std::env::set_var("RPC_PRIMARY_URL", "https://example.invalid");
        std::env::set_var("WS_RPC_URL", "wss://example.invalid");
        std::env::set_var("ENHANCED_TX_ENDPOINT_URL", "https://example.invalid/tx");
        std::env::set_var("PLATFORM_FEE_ADDRESS", crate::constants::SYSTEM_PROGRAM_ID);
        std::env::set_var("MASTER_ENCRYPTION_KEY", "k");
        std::env::set_var("JWT_SECRET", "s");
        std::env::set_var("ADMIN_SECRET", "s");
        std::env::set_var("SHARED_KV_URL", "redis://localhost");
        std::env::set_var("QUEUE_BACKEND_URL", "redis://localhost");

        let result = AppConfig::from_env();
        assert!(matches!(result, Err(CoreError::Fatal(_))));
    }
}
