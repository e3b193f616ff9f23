//! Wallet error types.
//!
//! One taxonomy for the whole engine. Cryptographic failures never carry
//! partial plaintext, key material, or detail that would distinguish a wrong
//! password from corrupted ciphertext. Collaborator errors are wrapped, not
//! swallowed. Nothing here auto-retries; retry policy belongs to the caller.

use bitcoin::Network;
use thiserror::Error;

use sable_core::error::{SourceError, StorageError};
use sable_core::types::Chain;

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Malformed input: bad WIF, bad address, bad path, bad container field.
    /// Always fatal, never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Key or backup material encodes a different network than the wallet
    /// is configured for. Rejected before any key material is processed.
    #[error("wrong network: expected {expected}, found {found}")]
    WrongNetwork {
        /// Network the wallet is configured for.
        expected: Network,
        /// Network the material encodes.
        found: String,
    },

    /// Decryption failed: wrong password, corrupted ciphertext, or tag
    /// mismatch. Deliberately indistinguishable.
    #[error("authentication failed")]
    Authentication,

    /// Issuing another address would exceed the unused-address ceiling.
    /// Recoverable by caller action; never auto-wrapped.
    #[error("gap limit exceeded on {chain} chain")]
    GapLimitExceeded {
        /// The chain that hit its ceiling.
        chain: Chain,
    },

    /// An xpub contact's pre-derived address cache is spent.
    /// Recoverable by deriving more addresses out of band; never wraps to 0.
    #[error("address cache exhausted for contact {contact}")]
    CacheExhausted {
        /// Contact whose cache ran dry.
        contact: String,
    },

    /// Selected inputs cannot cover amount plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Spendable balance in satoshis.
        have: u64,
        /// Required amount in satoshis.
        need: u64,
    },

    /// Backup checksum mismatch. The file is untrustworthy; decryption is
    /// never attempted.
    #[error("backup integrity check failed")]
    Integrity,

    /// Import collides with an existing account.
    #[error("duplicate account: {name}")]
    DuplicateAccount {
        /// Name of the conflicting existing account.
        name: String,
    },

    /// A multisig signature came from a key outside the cosigner set.
    #[error("signer is not in the cosigner set")]
    UnknownSigner,

    /// BIP-32/BIP-39 derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Encrypt-side failure in the vault.
    #[error("encryption: {0}")]
    Encryption(String),

    /// JSON or PSBT encoding failure.
    #[error("serialization: {0}")]
    Serialization(String),

    /// Blockchain data source failure, wrapped.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// State repository failure, wrapped.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
