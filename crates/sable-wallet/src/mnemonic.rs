//! BIP-39 mnemonic seed backup and restoration.

use bip39::{Language, Mnemonic};

use crate::error::WalletError;
use crate::keys::Seed;

/// Convert seed entropy to a BIP-39 mnemonic phrase.
///
/// 16 bytes of entropy produce 12 words, 32 bytes produce 24.
pub fn seed_to_mnemonic(seed: &Seed) -> Result<String, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, seed.entropy())
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    Ok(m.to_string())
}

/// Parse a BIP-39 mnemonic phrase and extract its entropy as a [`Seed`].
///
/// Normalizes whitespace and converts to lowercase before parsing. Only
/// 12- and 24-word phrases are accepted.
pub fn mnemonic_to_seed(phrase: &str) -> Result<Seed, WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let m = Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::Validation(format!("invalid mnemonic: {e}")))?;
    Seed::from_entropy(m.to_entropy())
}
