//! Quote engine (C4): constant-product buy/sell quoting against the pool's
//! on-chain reserves, entirely in fixed-width integer arithmetic.
//!
//! The `k = reserve_a * reserve_b` shape is the same one this codebase's
//! pre-migration `pumpfun_executor.rs` used for bonding-curve quotes;
//! adapted here to the post-migration AMM pool's vault balances instead of
//! virtual bonding-curve reserves, and extended with slippage bounds and
//! price-impact reporting neither bonding-curve quote needed.

use crate::constants::{bps_to_fraction, BUY_EXECUTION_TOLERANCE_BPS};
use crate::errors::{CoreError, CoreResult};
use crate::types::{BuyQuote, SellQuote};
use solana_sdk::pubkey::Pubkey;

pub struct PoolReserves {
    pub token_reserve: u64,
    pub sol_reserve: u64,
}

#[allow(clippy::too_many_arguments)]
pub fn quote_buy(
    mint: Pubkey,
    pool: Pubkey,
    base_vault: Pubkey,
    quote_vault: Pubkey,
    coin_creator: Pubkey,
    token_program: Pubkey,
    reserves: &PoolReserves,
    sol_in_lamports: u64,
) -> CoreResult<BuyQuote> {
    if reserves.token_reserve == 0 || reserves.sol_reserve == 0 {
        return Err(CoreError::rejected("pool has no liquidity"));
    }

    // x * y = k; solving for token output given a SOL input.
    let k = (reserves.sol_reserve as u128) * (reserves.token_reserve as u128);
    let new_sol_reserve = reserves.sol_reserve as u128 + sol_in_lamports as u128;
    let new_token_reserve = k / new_sol_reserve;
    let expected_tokens = (reserves.token_reserve as u128)
        .saturating_sub(new_token_reserve)
        .min(u64::MAX as u128) as u64;

    if expected_tokens == 0 {
        return Err(CoreError::rejected("buy quote produced zero expected tokens"));
    }

    // This AMM family is "exact-output-ish": max_sol_spend is the exact
    // input, and min_tokens_out is a fixed 5% execution tolerance off the
    // constant-product estimate, not the sniper's own slippage_bps, which
    // governs sell quotes only.
    let min_tokens_out = apply_downward_tolerance(expected_tokens, bps_to_fraction(BUY_EXECUTION_TOLERANCE_BPS));

    let price_impact = sol_in_lamports as f64 / reserves.sol_reserve as f64;

    Ok(BuyQuote {
        mint,
        pool,
        base_vault,
        quote_vault,
        coin_creator,
        token_program,
        token_reserve: reserves.token_reserve,
        sol_reserve: reserves.sol_reserve,
        expected_tokens,
        min_tokens_out,
        max_sol_spend: sol_in_lamports,
        price_impact,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn quote_sell(
    mint: Pubkey,
    pool: Pubkey,
    base_vault: Pubkey,
    quote_vault: Pubkey,
    coin_creator: Pubkey,
    token_program: Pubkey,
    reserves: &PoolReserves,
    token_amount: u64,
    slippage_bps: u64,
) -> CoreResult<SellQuote> {
    if reserves.token_reserve == 0 || reserves.sol_reserve == 0 {
        return Err(CoreError::rejected("pool has no liquidity"));
    }

    let k = (reserves.sol_reserve as u128) * (reserves.token_reserve as u128);
    let new_token_reserve = reserves.token_reserve as u128 + token_amount as u128;
    let new_sol_reserve = k / new_token_reserve;
    let expected_sol = (reserves.sol_reserve as u128)
        .saturating_sub(new_sol_reserve)
        .min(u64::MAX as u128) as u64;

    if expected_sol == 0 {
        return Err(CoreError::rejected("sell quote produced zero expected SOL"));
    }

    let slippage = bps_to_fraction(slippage_bps);
    let min_sol_out = apply_downward_tolerance(expected_sol, slippage);

    let price_before = reserves.sol_reserve as f64 / reserves.token_reserve as f64;
    let price_after = new_sol_reserve as f64 / new_token_reserve as f64;
    let price_impact = if price_before > 0.0 {
        (price_before - price_after) / price_before
    } else {
        0.0
    };

    Ok(SellQuote {
        mint,
        pool,
        base_vault,
        quote_vault,
        coin_creator,
        token_program,
        token_amount,
        expected_sol,
        min_sol_out,
        price_impact,
    })
}

fn apply_downward_tolerance(amount: u64, fraction: f64) -> u64 {
    let reduced = amount as f64 * (1.0 - fraction);
    reduced.max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserves() -> PoolReserves {
        PoolReserves {
            token_reserve: 1_000_000_000,
            sol_reserve: 30_000_000_000,
        }
    }

    fn keys() -> (Pubkey, Pubkey, Pubkey, Pubkey, Pubkey, Pubkey) {
        (
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
        )
    }

    #[test]
    fn buy_quote_min_tokens_respects_execution_tolerance() {
        let (mint, pool, bv, qv, creator, tp) = keys();
        let quote = quote_buy(mint, pool, bv, qv, creator, tp, &reserves(), 1_000_000_000).unwrap();
        assert!(quote.min_tokens_out < quote.expected_tokens);
        assert!(quote.max_sol_spend == 1_000_000_000);
    }

    #[test]
    fn sell_quote_min_sol_respects_slippage() {
        let (mint, pool, bv, qv, creator, tp) = keys();
        let quote = quote_sell(mint, pool, bv, qv, creator, tp, &reserves(), 10_000_000, 500).unwrap();
        assert!(quote.min_sol_out < quote.expected_sol);
    }

    #[test]
    fn empty_pool_is_rejected() {
        let (mint, pool, bv, qv, creator, tp) = keys();
        let empty = PoolReserves { token_reserve: 0, sol_reserve: 0 };
        assert!(quote_buy(mint, pool, bv, qv, creator, tp, &empty, 1_000).is_err());
    }
}
