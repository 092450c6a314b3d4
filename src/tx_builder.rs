//! Transaction builder (C5): assembles a signed versioned transaction for
//! either side of a swap, in the AMM-direct path or the router-mediated
//! path, followed by an optional simulation gate.
//!
//! Instruction assembly and the pre-submission simulate-then-decode-error
//! shape follow `jito_bundle_manager.rs`'s `build_transaction` /
//! `simulate_bundle`; this module only ever builds one transaction at a
//! time rather than a bundle, since the submission engine (C7) owns the
//! attempt sequence.

use crate::blockhash_cache::BlockhashCache;
use crate::constants::{
    AMM_EVENT_AUTHORITY_SEED, AMM_FEE_CONFIG_SEED, AMM_FEE_PROGRAM_ID, AMM_GLOBAL_CONFIG_SEED,
    AMM_GLOBAL_VOLUME_ACCUMULATOR_SEED, AMM_PROGRAM_ID, AMM_PROTOCOL_FEE_RECIPIENT,
    AMM_USER_VOLUME_ACCUMULATOR_SEED, BUY_ACCOUNT_COUNT, BUY_DISCRIMINATOR, SELL_ACCOUNT_COUNT,
    SELL_DISCRIMINATOR, SWAP_COMPUTE_UNIT_LIMIT, WRAPPED_SOL_MINT,
};
use crate::errors::{CoreError, CoreResult};
use crate::types::{BuyQuote, SellQuote};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::system_instruction;
use solana_sdk::transaction::VersionedTransaction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::str::FromStr;
use tracing::{debug, warn};

/// Fixed pool of tip accounts the MEV-parallel path load-balances across.
pub const TIP_ACCOUNTS: &[&str] = &[
    "96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5",
    "HFqU5x63VTqvQss8hp11i4wVV8szGtaMq4zP6rC6R8jc",
    "Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY",
    "ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49",
];

pub struct BuildParams<'a> {
    pub signer: &'a Keypair,
    pub platform_fee_address: Pubkey,
    pub platform_fee_lamports: u64,
    pub tip_lamports: u64,
    pub via_router: bool,
}

pub async fn build_buy_transaction(
    quote: &BuyQuote,
    params: &BuildParams<'_>,
    blockhash_cache: &BlockhashCache,
    router_swap_ixs: Option<Vec<Instruction>>,
    lookup_tables: &[solana_sdk::address_lookup_table::AddressLookupTableAccount],
) -> CoreResult<VersionedTransaction> {
    let mut instructions = Vec::new();
    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(SWAP_COMPUTE_UNIT_LIMIT));
    instructions.push(ComputeBudgetInstruction::set_compute_unit_price(compute_unit_price(
        params.tip_lamports,
    )));

    // Buys separate the platform fee out of the input before the swap.
    instructions.push(system_instruction::transfer(
        &params.signer.pubkey(),
        &params.platform_fee_address,
        params.platform_fee_lamports,
    ));

    let wsol_mint = Pubkey::from_str(WRAPPED_SOL_MINT).expect("valid wrapped sol mint");
    let user_token_ata =
        get_associated_token_address_with_program_id(&params.signer.pubkey(), &quote.mint, &quote.token_program);
    let user_wsol_ata =
        get_associated_token_address_with_program_id(&params.signer.pubkey(), &wsol_mint, &quote.token_program);

    instructions.push(spl_associated_token_account::instruction::create_associated_token_account_idempotent(
        &params.signer.pubkey(),
        &params.signer.pubkey(),
        &quote.mint,
        &quote.token_program,
    ));
    instructions.push(spl_associated_token_account::instruction::create_associated_token_account_idempotent(
        &params.signer.pubkey(),
        &params.signer.pubkey(),
        &wsol_mint,
        &quote.token_program,
    ));
    instructions.push(system_instruction::transfer(
        &params.signer.pubkey(),
        &user_wsol_ata,
        quote.max_sol_spend,
    ));
    instructions.push(
        spl_token::instruction::sync_native(&spl_token::id(), &user_wsol_ata)
            .map_err(|e| CoreError::fatal(format!("sync_native instruction failed: {e}")))?,
    );

    if params.via_router {
        let mut swap_ixs = router_swap_ixs
            .ok_or_else(|| CoreError::fatal("router-mediated build requested without router instructions"))?;
        strip_compute_budget_instructions(&mut swap_ixs);
        instructions.extend(swap_ixs);
    } else {
        instructions.push(build_buy_swap_instruction(quote, &user_token_ata, &user_wsol_ata, params)?);
    }

    push_tip_and_cleanup(&mut instructions, params, &user_wsol_ata);

    finalize_transaction(instructions, params.signer, blockhash_cache, lookup_tables).await
}

pub async fn build_sell_transaction(
    quote: &SellQuote,
    params: &BuildParams<'_>,
    blockhash_cache: &BlockhashCache,
    router_swap_ixs: Option<Vec<Instruction>>,
    lookup_tables: &[solana_sdk::address_lookup_table::AddressLookupTableAccount],
) -> CoreResult<VersionedTransaction> {
    let mut instructions = Vec::new();
    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(SWAP_COMPUTE_UNIT_LIMIT));
    instructions.push(ComputeBudgetInstruction::set_compute_unit_price(compute_unit_price(
        params.tip_lamports,
    )));

    let wsol_mint = Pubkey::from_str(WRAPPED_SOL_MINT).expect("valid wrapped sol mint");
    let user_token_ata =
        get_associated_token_address_with_program_id(&params.signer.pubkey(), &quote.mint, &quote.token_program);
    let user_wsol_ata =
        get_associated_token_address_with_program_id(&params.signer.pubkey(), &wsol_mint, &quote.token_program);

    if params.via_router {
        let mut swap_ixs = router_swap_ixs
            .ok_or_else(|| CoreError::fatal("router-mediated build requested without router instructions"))?;
        strip_compute_budget_instructions(&mut swap_ixs);
        instructions.extend(swap_ixs);
    } else {
        instructions.push(build_sell_swap_instruction(quote, &user_token_ata, &user_wsol_ata, params)?);
    }

    // Sells transfer the platform fee out of proceeds after the swap.
    instructions.push(system_instruction::transfer(
        &params.signer.pubkey(),
        &params.platform_fee_address,
        params.platform_fee_lamports,
    ));

    push_tip_and_cleanup(&mut instructions, params, &user_wsol_ata);

    finalize_transaction(instructions, params.signer, blockhash_cache, lookup_tables).await
}

/// Micro-lamports per compute unit: `tip_lamports * 1_000_000 / compute_unit_limit`.
fn compute_unit_price(tip_lamports: u64) -> u64 {
    tip_lamports.saturating_mul(1_000_000) / SWAP_COMPUTE_UNIT_LIMIT as u64
}

/// The AMM-program- and fee-program-owned accounts every swap instruction
/// needs beyond the pool/vaults/mints/user ATAs: global config, event
/// authority, protocol fee recipient + its wrapped-SOL ATA, and the
/// fee-config PDA on the separate fee program.
struct SharedSwapAccounts {
    amm_program: Pubkey,
    global_config: Pubkey,
    event_authority: Pubkey,
    protocol_fee_recipient: Pubkey,
    protocol_fee_recipient_token_account: Pubkey,
    fee_program: Pubkey,
    fee_config: Pubkey,
}

fn derive_shared_swap_accounts(token_program: &Pubkey) -> SharedSwapAccounts {
    let amm_program = Pubkey::from_str(AMM_PROGRAM_ID).expect("valid amm program id");
    let fee_program = Pubkey::from_str(AMM_FEE_PROGRAM_ID).expect("valid fee program id");
    let protocol_fee_recipient =
        Pubkey::from_str(AMM_PROTOCOL_FEE_RECIPIENT).expect("valid protocol fee recipient");
    let wsol_mint = Pubkey::from_str(WRAPPED_SOL_MINT).expect("valid wrapped sol mint");

    let (global_config, _) = Pubkey::find_program_address(&[AMM_GLOBAL_CONFIG_SEED], &amm_program);
    let (event_authority, _) = Pubkey::find_program_address(&[AMM_EVENT_AUTHORITY_SEED], &amm_program);
    let (fee_config, _) =
        Pubkey::find_program_address(&[AMM_FEE_CONFIG_SEED, amm_program.as_ref()], &fee_program);
    let protocol_fee_recipient_token_account =
        get_associated_token_address_with_program_id(&protocol_fee_recipient, &wsol_mint, token_program);

    SharedSwapAccounts {
        amm_program,
        global_config,
        event_authority,
        protocol_fee_recipient,
        protocol_fee_recipient_token_account,
        fee_program,
        fee_config,
    }
}

fn build_buy_swap_instruction(
    quote: &BuyQuote,
    user_token_ata: &Pubkey,
    user_wsol_ata: &Pubkey,
    params: &BuildParams<'_>,
) -> CoreResult<Instruction> {
    let shared = derive_shared_swap_accounts(&quote.token_program);
    let fee_wsol_ata = get_associated_token_address_with_program_id(
        &params.platform_fee_address,
        &Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(),
        &quote.token_program,
    );
    let creator_wsol_ata = get_associated_token_address_with_program_id(
        &quote.coin_creator,
        &Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(),
        &quote.token_program,
    );
    let (global_volume_accumulator, _) =
        Pubkey::find_program_address(&[AMM_GLOBAL_VOLUME_ACCUMULATOR_SEED], &shared.amm_program);
    let (user_volume_accumulator, _) = Pubkey::find_program_address(
        &[AMM_USER_VOLUME_ACCUMULATOR_SEED, params.signer.pubkey().as_ref()],
        &shared.amm_program,
    );

    let accounts = vec![
        AccountMeta::new(quote.pool, false),
        AccountMeta::new(params.signer.pubkey(), true),
        AccountMeta::new_readonly(quote.mint, false),
        AccountMeta::new_readonly(Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(), false),
        AccountMeta::new(*user_token_ata, false),
        AccountMeta::new(*user_wsol_ata, false),
        AccountMeta::new(quote.base_vault, false),
        AccountMeta::new(quote.quote_vault, false),
        AccountMeta::new(fee_wsol_ata, false),
        AccountMeta::new(creator_wsol_ata, false),
        AccountMeta::new_readonly(quote.token_program, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
        AccountMeta::new_readonly(shared.amm_program, false),
        AccountMeta::new_readonly(spl_associated_token_account::id(), false),
        AccountMeta::new_readonly(shared.event_authority, false),
        AccountMeta::new_readonly(shared.global_config, false),
        AccountMeta::new_readonly(shared.protocol_fee_recipient, false),
        AccountMeta::new(shared.protocol_fee_recipient_token_account, false),
        AccountMeta::new(global_volume_accumulator, false),
        AccountMeta::new(user_volume_accumulator, false),
        AccountMeta::new_readonly(shared.fee_config, false),
        AccountMeta::new_readonly(shared.fee_program, false),
    ];
    if accounts.len() != BUY_ACCOUNT_COUNT {
        return Err(CoreError::fatal(format!(
            "buy instruction built {} accounts, expected {BUY_ACCOUNT_COUNT}",
            accounts.len()
        )));
    }

    let mut data = BUY_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&quote.max_sol_spend.to_le_bytes());
    data.extend_from_slice(&quote.min_tokens_out.to_le_bytes());

    Ok(Instruction { program_id: shared.amm_program, accounts, data })
}

fn build_sell_swap_instruction(
    quote: &SellQuote,
    user_token_ata: &Pubkey,
    user_wsol_ata: &Pubkey,
    params: &BuildParams<'_>,
) -> CoreResult<Instruction> {
    let shared = derive_shared_swap_accounts(&quote.token_program);
    let fee_wsol_ata = get_associated_token_address_with_program_id(
        &params.platform_fee_address,
        &Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(),
        &quote.token_program,
    );
    let creator_wsol_ata = get_associated_token_address_with_program_id(
        &quote.coin_creator,
        &Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(),
        &quote.token_program,
    );

    let accounts = vec![
        AccountMeta::new(quote.pool, false),
        AccountMeta::new(params.signer.pubkey(), true),
        AccountMeta::new_readonly(quote.mint, false),
        AccountMeta::new_readonly(Pubkey::from_str(WRAPPED_SOL_MINT).unwrap(), false),
        AccountMeta::new(*user_token_ata, false),
        AccountMeta::new(*user_wsol_ata, false),
        AccountMeta::new(quote.base_vault, false),
        AccountMeta::new(quote.quote_vault, false),
        AccountMeta::new(fee_wsol_ata, false),
        AccountMeta::new(creator_wsol_ata, false),
        AccountMeta::new_readonly(quote.token_program, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(solana_sdk::system_program::id(), false),
        AccountMeta::new_readonly(shared.amm_program, false),
        AccountMeta::new_readonly(spl_associated_token_account::id(), false),
        AccountMeta::new_readonly(shared.event_authority, false),
        AccountMeta::new_readonly(shared.global_config, false),
        AccountMeta::new_readonly(shared.protocol_fee_recipient, false),
        AccountMeta::new(shared.protocol_fee_recipient_token_account, false),
        AccountMeta::new_readonly(shared.fee_config, false),
        AccountMeta::new_readonly(shared.fee_program, false),
    ];
    if accounts.len() != SELL_ACCOUNT_COUNT {
        return Err(CoreError::fatal(format!(
            "sell instruction built {} accounts, expected {SELL_ACCOUNT_COUNT}",
            accounts.len()
        )));
    }

    let mut data = SELL_DISCRIMINATOR.to_vec();
    data.extend_from_slice(&quote.token_amount.to_le_bytes());
    data.extend_from_slice(&quote.min_sol_out.to_le_bytes());

    Ok(Instruction { program_id: shared.amm_program, accounts, data })
}

fn push_tip_and_cleanup(instructions: &mut Vec<Instruction>, params: &BuildParams<'_>, user_wsol_ata: &Pubkey) {
    let tip_account = Pubkey::from_str(
        TIP_ACCOUNTS[fastrand::usize(..TIP_ACCOUNTS.len())],
    )
    .expect("valid tip account");

    instructions.push(system_instruction::transfer(
        &params.signer.pubkey(),
        &tip_account,
        params.tip_lamports,
    ));
    instructions.push(
        spl_token::instruction::close_account(
            &spl_token::id(),
            user_wsol_ata,
            &params.signer.pubkey(),
            &params.signer.pubkey(),
            &[],
        )
        .expect("close_account instruction builds"),
    );
}

fn strip_compute_budget_instructions(instructions: &mut Vec<Instruction>) {
    let compute_budget_program = solana_sdk::compute_budget::id();
    instructions.retain(|ix| ix.program_id != compute_budget_program);
}

async fn finalize_transaction(
    instructions: Vec<Instruction>,
    signer: &Keypair,
    blockhash_cache: &BlockhashCache,
    lookup_tables: &[solana_sdk::address_lookup_table::AddressLookupTableAccount],
) -> CoreResult<VersionedTransaction> {
    let blockhash = blockhash_cache.current().await?;

    let message = v0::Message::try_compile(&signer.pubkey(), &instructions, lookup_tables, blockhash)
        .map_err(|e| CoreError::fatal(format!("failed to compile versioned message: {e}")))?;

    let versioned_message = VersionedMessage::V0(message);
    VersionedTransaction::try_new(versioned_message, &[signer])
        .map_err(|e| CoreError::fatal(format!("failed to sign versioned transaction: {e}")))
}

/// Simulate a built transaction and translate known instruction-error
/// codes, per the simulation gate in §4.4.
pub fn simulate_and_translate(
    rpc: &solana_client::rpc_client::RpcClient,
    tx: &VersionedTransaction,
) -> CoreResult<()> {
    let result = rpc
        .simulate_transaction(tx)
        .map_err(|e| CoreError::transient(format!("simulation request failed: {e}")))?;

    if let Some(err) = result.value.err {
        let logs = result.value.logs.unwrap_or_default();
        let last_log = logs.last().cloned().unwrap_or_default();
        let code = extract_instruction_error_code(&err);
        warn!(?err, "❌ simulation gate rejected transaction");
        return Err(CoreError::SimulationFailed { code, last_log, logs }.into());
    }
    debug!("✅ simulation passed");
    Ok(())
}

fn extract_instruction_error_code(err: &solana_sdk::transaction::TransactionError) -> i64 {
    match err {
        solana_sdk::transaction::TransactionError::InstructionError(_, instruction_error) => {
            format!("{instruction_error:?}")
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(-1)
        }
        _ => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tip_account_pool_is_nonempty() {
        assert!(!TIP_ACCOUNTS.is_empty());
        for acct in TIP_ACCOUNTS {
            assert!(Pubkey::from_str(acct).is_ok());
        }
    }
}
