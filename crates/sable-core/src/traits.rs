//! Trait interfaces for the Sable engine's external collaborators.
//!
//! The engine never talks to the network or the disk directly:
//! - [`BlockchainDataSource`] — remote chain data (the host's API client
//!   implements this)
//! - [`StateRepository`] — durable key-value persistence
//!
//! Calls through these traits are the engine's only suspension points.
//! Signatures are synchronous; the host layers its own async dispatch on
//! top and propagates cancellation by returning an error, which the engine
//! surfaces without mutating address counters mid-operation.

use bitcoin::{Transaction, Txid};

use crate::account::Account;
use crate::contact::Contact;
use crate::error::{SourceError, StorageError};
use crate::types::{FeeEstimates, Utxo};

/// Read access to chain state plus transaction broadcast.
pub trait BlockchainDataSource: Send + Sync {
    /// Spendable outputs paying to an address.
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError>;

    /// Submit a signed transaction to the network.
    fn broadcast(&self, tx: &Transaction) -> Result<Txid, SourceError>;

    /// Current fee-rate estimates in sat/vByte.
    fn fee_estimates(&self) -> Result<FeeEstimates, SourceError>;
}

/// Durable persistence for wallet state.
///
/// Implementations must be atomic enough that a crash mid-write never
/// corrupts previously committed state (write-temp-then-rename or
/// equivalent).
pub trait StateRepository: Send + Sync {
    /// All persisted accounts.
    fn load_accounts(&self) -> Result<Vec<Account>, StorageError>;

    /// Replace the persisted account list.
    fn save_accounts(&self, accounts: &[Account]) -> Result<(), StorageError>;

    /// All persisted contacts.
    fn load_contacts(&self) -> Result<Vec<Contact>, StorageError>;

    /// Replace the persisted contact list.
    fn save_contacts(&self, contacts: &[Contact]) -> Result<(), StorageError>;
}
