//! # sable-wallet — the Sable wallet engine.
//!
//! The cryptographic and transaction-construction core of a non-custodial
//! Bitcoin wallet: hierarchical key derivation, authenticated encryption of
//! wallet state, privacy-preserving coin selection, gap-limit address
//! accounting, and multi-party (multisig) signing coordination.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`vault`] — PBKDF2 + AES-256-GCM authenticated encryption
//! - [`mnemonic`] — BIP-39 seed backup and restoration
//! - [`keys`] — BIP-32 derivation engine and WIF codec
//! - [`address_book`] — gap-limit address issuance
//! - [`builder`] — randomized coin selection and transaction building
//! - [`multisig`] — m-of-n coordination over PSBTs
//! - [`backup`] — double-encrypted whole-wallet backup container
//! - [`export`] — per-account export files
//! - [`contacts`] — counterparty address rotation
//! - [`session`] — the unlocked-session handle

pub mod address_book;
pub mod backup;
pub mod builder;
pub mod contacts;
pub mod error;
pub mod export;
pub mod keys;
pub mod mnemonic;
pub mod multisig;
pub mod session;
pub mod vault;

// Re-exports for convenient access
pub use address_book::AddressBook;
pub use backup::{BackupManager, EncryptedBackup, ImportStage, RestoredState};
pub use builder::{PrivacyTransactionBuilder, Recipient, Selection, UnsignedTransaction};
pub use contacts::ContactAddressRotator;
pub use error::WalletError;
pub use keys::{KeyDerivationEngine, Seed};
pub use multisig::{FinalizeOutcome, MultisigCoordinator, PendingMultisigTransaction};
pub use session::Session;
pub use vault::{CryptoVault, KdfTier, SecretBytes, SymmetricKey};
