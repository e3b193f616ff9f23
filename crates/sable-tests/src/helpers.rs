//! Shared helpers and mock collaborators for scenario tests.

use bitcoin::hashes::Hash;
use bitcoin::{Network, Transaction, Txid};
use std::collections::HashMap;
use std::sync::Mutex;

use sable_core::account::{Account, AddressSet};
use sable_core::contact::Contact;
use sable_core::error::{SourceError, StorageError};
use sable_core::traits::{BlockchainDataSource, StateRepository};
use sable_core::types::{AddressKind, FeeEstimates, Utxo};
use sable_wallet::session::Session;

/// The session password used across scenarios.
pub const SESSION_PW: &str = "Unlock123!";

/// The backup password used across scenarios.
pub const BACKUP_PW: &str = "Sep@rate456!!";

/// In-memory blockchain data source, fundable per address.
pub struct MockChain {
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    next_txid_byte: Mutex<u8>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            utxos: Mutex::new(HashMap::new()),
            next_txid_byte: Mutex::new(1),
        }
    }

    /// Credit an address with a spendable output.
    pub fn fund(&self, address: &str, value: u64) {
        let mut byte = self.next_txid_byte.lock().unwrap();
        let utxo = Utxo {
            txid: Txid::from_byte_array([*byte; 32]),
            vout: 0,
            value,
            address: address.to_string(),
            confirmations: 6,
        };
        *byte = byte.wrapping_add(1);
        self.utxos
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(utxo);
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockchainDataSource for MockChain {
    fn get_utxos(&self, address: &str) -> Result<Vec<Utxo>, SourceError> {
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, SourceError> {
        Ok(tx.compute_txid())
    }

    fn fee_estimates(&self) -> Result<FeeEstimates, SourceError> {
        Ok(FeeEstimates {
            fast: 20,
            normal: 5,
            slow: 1,
        })
    }
}

/// In-memory state repository.
#[derive(Default)]
pub struct MemoryRepository {
    accounts: Mutex<Vec<Account>>,
    contacts: Mutex<Vec<Contact>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateRepository for MemoryRepository {
    fn load_accounts(&self) -> Result<Vec<Account>, StorageError> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    fn save_accounts(&self, accounts: &[Account]) -> Result<(), StorageError> {
        *self.accounts.lock().unwrap() = accounts.to_vec();
        Ok(())
    }

    fn load_contacts(&self) -> Result<Vec<Contact>, StorageError> {
        Ok(self.contacts.lock().unwrap().clone())
    }

    fn save_contacts(&self, contacts: &[Contact]) -> Result<(), StorageError> {
        *self.contacts.lock().unwrap() = contacts.to_vec();
        Ok(())
    }
}

/// A testnet session with one native-segwit HD account named "spending".
pub fn test_session() -> Session {
    let mut session = Session::create(Network::Testnet, SESSION_PW).unwrap();
    session
        .add_account(Account::Hd {
            name: "spending".into(),
            kind: AddressKind::NativeSegwit,
            account_index: 0,
            addresses: AddressSet::default(),
        })
        .unwrap();
    session
}
