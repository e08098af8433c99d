//! Mint address validation.
//!
//! Every extracted candidate passes through here before any remote call, so
//! malformed addresses never burn a rate-limited request.

/// Minimum length of a base58-encoded Solana address.
const MIN_ADDRESS_LEN: usize = 32;
/// Maximum length of a base58-encoded Solana address.
const MAX_ADDRESS_LEN: usize = 44;

/// Checks whether a string is a plausible Solana mint address: length within
/// [32, 44] and every character in the base58 alphabet (which excludes the
/// visually ambiguous `0`, `O`, `I` and `l`).
pub fn is_valid_mint_address(address: &str) -> bool {
    if address.len() < MIN_ADDRESS_LEN || address.len() > MAX_ADDRESS_LEN {
        return false;
    }
    bs58::decode(address).into_vec().is_ok()
}
