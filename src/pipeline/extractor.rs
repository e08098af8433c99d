//! Source-specific mint extraction from resolved transactions.
//!
//! Pure and deterministic: payload in, optional mint out, no I/O. Each
//! program family has its own rule.

use crate::pipeline::resolver::TransactionDetail;
use crate::types::{MintAddress, SourceProgram};

/// The network's native wrapped asset; never a pool candidate.
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Position of the freshly created mint in a pump.fun create transaction's
/// flat account list (fee payer sits at 0).
const PUMP_FUN_MINT_ACCOUNT_INDEX: usize = 1;

/// Apply the extraction rule for `source` to a resolved transaction.
///
/// Raydium-shaped payloads (Raydium, boosted): the first token transfer
/// whose mint is not wrapped SOL and whose origin token account is present.
/// Pump.fun: the fixed mint position in the flat account list.
pub fn extract_mint(detail: &TransactionDetail, source: SourceProgram) -> Option<MintAddress> {
    match source {
        SourceProgram::Raydium | SourceProgram::Boosted => {
            detail.token_transfers.iter().find_map(|transfer| {
                match (&transfer.mint, &transfer.from_token_account) {
                    (Some(mint), Some(from))
                        if mint != WRAPPED_SOL_MINT && !from.is_empty() =>
                    {
                        Some(mint.clone())
                    }
                    _ => None,
                }
            })
        }
        SourceProgram::PumpFun => detail
            .account_data
            .get(PUMP_FUN_MINT_ACCOUNT_INDEX)
            .map(|record| record.account.clone()),
    }
}
