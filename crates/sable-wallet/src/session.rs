//! The unlocked-session handle.
//!
//! One [`Session`] is the single authoritative owner of one decrypted seed.
//! There is no ambient global: callers hold the session and pass it to
//! every operation, and locking it drops the key material (zeroized by the
//! owning types). Address-index mutation is serialized per account behind
//! a mutex; operations on different accounts proceed in parallel.
//!
//! Collaborator calls are the only suspension points. The send flow
//! fetches chain data first and only then mutates address counters, so a
//! caller-propagated cancellation never leaves an account half-advanced.

use bitcoin::{Network, Transaction};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

use sable_core::account::Account;
use sable_core::contact::Contact;
use sable_core::traits::{BlockchainDataSource, StateRepository};
use sable_core::types::Chain;

use crate::address_book::AddressBook;
use crate::backup::{BackupManager, EncryptedBackup, RestoredState, TransactionMetadataSection};
use crate::builder::{OwnedUtxo, PrivacyTransactionBuilder, Recipient};
use crate::contacts::ContactAddressRotator;
use crate::error::WalletError;
use crate::keys::{KeyDerivationEngine, Seed};
use crate::mnemonic;
use crate::vault::{CryptoVault, KdfTier};

/// An unlocked wallet: engine, accounts, contacts.
pub struct Session {
    engine: KeyDerivationEngine,
    /// Seed entropy sealed under the session password. Used to re-verify
    /// the password on export without keeping the password around.
    sealed_seed: Vec<u8>,
    accounts: HashMap<String, Mutex<Account>>,
    contacts: Mutex<Vec<Contact>>,
}

impl Session {
    /// Create a wallet with a fresh random seed.
    pub fn create(network: Network, session_password: &str) -> Result<Self, WalletError> {
        Self::from_seed(Seed::generate(), network, session_password)
    }

    /// Unlock from a BIP-39 mnemonic phrase.
    pub fn unlock_from_mnemonic(
        phrase: &str,
        network: Network,
        session_password: &str,
    ) -> Result<Self, WalletError> {
        Self::from_seed(mnemonic::mnemonic_to_seed(phrase)?, network, session_password)
    }

    /// Unlock state restored from a backup, with the original session
    /// password.
    pub fn unlock_restored(
        restored: RestoredState,
        network: Network,
        session_password: &str,
    ) -> Result<Self, WalletError> {
        let entropy = CryptoVault::open(
            session_password.as_bytes(),
            KdfTier::Session,
            &restored.encrypted_seed,
        )?;
        let seed = Seed::from_entropy(entropy.as_bytes().to_vec())?;
        let engine = KeyDerivationEngine::new(&seed, network)?;
        let mut session = Self {
            engine,
            sealed_seed: restored.encrypted_seed.clone(),
            accounts: HashMap::new(),
            contacts: Mutex::new(restored.contacts.clone()),
        };
        for account in &restored.accounts {
            session
                .accounts
                .insert(account.name().to_string(), Mutex::new(account.clone()));
        }
        info!(accounts = restored.accounts.len(), "session restored from backup");
        Ok(session)
    }

    fn from_seed(
        seed: Seed,
        network: Network,
        session_password: &str,
    ) -> Result<Self, WalletError> {
        let engine = KeyDerivationEngine::new(&seed, network)?;
        let sealed_seed = CryptoVault::seal(
            session_password.as_bytes(),
            KdfTier::Session,
            seed.entropy(),
        )?;
        Ok(Self {
            engine,
            sealed_seed,
            accounts: HashMap::new(),
            contacts: Mutex::new(Vec::new()),
        })
    }

    /// Lock the session, consuming it. Seed material is zeroized by the
    /// owning types on drop.
    pub fn lock(self) {
        debug!("session locked");
    }

    /// The session's network.
    pub fn network(&self) -> Network {
        self.engine.network()
    }

    /// The derivation engine (for multisig coordination and exports).
    pub fn engine(&self) -> &KeyDerivationEngine {
        &self.engine
    }

    /// The session-sealed seed entropy.
    pub fn sealed_seed(&self) -> &[u8] {
        &self.sealed_seed
    }

    /// The mnemonic phrase for the seed, for user backup. Requires the
    /// session password: displaying the phrase is a high-stakes operation.
    pub fn reveal_mnemonic(&self, session_password: &str) -> Result<String, WalletError> {
        let entropy = CryptoVault::open(
            session_password.as_bytes(),
            KdfTier::Session,
            &self.sealed_seed,
        )?;
        let seed = Seed::from_entropy(entropy.as_bytes().to_vec())?;
        mnemonic::seed_to_mnemonic(&seed)
    }

    /// Register an account. Name collisions are rejected.
    pub fn add_account(&mut self, account: Account) -> Result<(), WalletError> {
        let name = account.name().to_string();
        if self.accounts.contains_key(&name) {
            return Err(WalletError::DuplicateAccount { name });
        }
        self.accounts.insert(name, Mutex::new(account));
        Ok(())
    }

    /// Names of all registered accounts.
    pub fn account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a closure against an account under its lock.
    pub fn with_account<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Account) -> R,
    ) -> Result<R, WalletError> {
        let slot = self
            .accounts
            .get(name)
            .ok_or_else(|| WalletError::Validation(format!("unknown account {name}")))?;
        Ok(f(&mut slot.lock()))
    }

    /// Issue the next fresh receive address for an account.
    pub fn next_receive_address(&self, account: &str) -> Result<String, WalletError> {
        self.with_account(account, |acct| {
            AddressBook::next_unused(&self.engine, acct, Chain::External)
        })?
    }

    /// Build and sign a transaction from an HD account.
    ///
    /// Fetches spendable outputs for every issued address, selects inputs
    /// with the randomized selector, issues a fresh internal-chain change
    /// address under the account lock, and signs. The change address is
    /// never reused state; a gap-limit refusal propagates instead of
    /// degrading to an old address.
    pub fn send(
        &self,
        account: &str,
        recipients: &[Recipient],
        fee_rate: u64,
        source: &dyn BlockchainDataSource,
    ) -> Result<Transaction, WalletError> {
        // Collaborator phase: snapshot issued addresses, then fetch UTXOs.
        // No counters move until all external data is in hand.
        let (kind, issued) = self.with_account(account, |acct| match acct {
            Account::Hd {
                kind, addresses, ..
            } => {
                let mut issued = Vec::new();
                for chain in [Chain::External, Chain::Internal] {
                    for entry in &addresses.chain(chain).entries {
                        issued.push((entry.address.clone(), chain, entry.index));
                    }
                }
                Ok((*kind, issued))
            }
            Account::Imported { .. } | Account::Multisig { .. } => Err(WalletError::Validation(
                "send requires an HD account".into(),
            )),
        })??;

        let mut candidates = Vec::new();
        for (address, chain, index) in &issued {
            for utxo in source.get_utxos(address)? {
                candidates.push(OwnedUtxo {
                    utxo,
                    chain: *chain,
                    index: *index,
                });
            }
        }

        // Mutation phase, serialized per account.
        self.with_account(account, |acct| {
            let change_address = AddressBook::next_unused(&self.engine, acct, Chain::Internal)?;
            let unsigned = PrivacyTransactionBuilder::build_transaction(
                &self.engine,
                &candidates,
                recipients,
                fee_rate,
                kind.into(),
                &change_address,
                &mut rand::rngs::OsRng,
            )?;
            for utxo in &unsigned.selection.chosen {
                AddressBook::mark_used(acct, &utxo.address);
            }
            let account_index = match acct {
                Account::Hd { account_index, .. } => *account_index,
                Account::Imported { .. } | Account::Multisig { .. } => unreachable!(),
            };
            PrivacyTransactionBuilder::sign(&self.engine, kind, account_index, unsigned)
        })?
    }

    /// Register a contact. Name collisions are rejected.
    pub fn add_contact(&self, contact: Contact) -> Result<(), WalletError> {
        let mut contacts = self.contacts.lock();
        if contacts.iter().any(|c| c.name() == contact.name()) {
            return Err(WalletError::Validation(format!(
                "duplicate contact {}",
                contact.name()
            )));
        }
        contacts.push(contact);
        Ok(())
    }

    /// The address the next send to a contact should use.
    pub fn next_contact_address(&self, name: &str) -> Result<String, WalletError> {
        let contacts = self.contacts.lock();
        let contact = contacts
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| WalletError::Validation(format!("unknown contact {name}")))?;
        ContactAddressRotator::next_send_address(contact)
    }

    /// Record that a send to a contact's address went out.
    pub fn record_contact_usage(&self, name: &str, address: &str) -> Result<(), WalletError> {
        let mut contacts = self.contacts.lock();
        let contact = contacts
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| WalletError::Validation(format!("unknown contact {name}")))?;
        ContactAddressRotator::record_usage(contact, address);
        Ok(())
    }

    /// Snapshot all accounts (cloned under their locks).
    pub fn accounts_snapshot(&self) -> Vec<Account> {
        let mut names: Vec<&String> = self.accounts.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.accounts[name].lock().clone())
            .collect()
    }

    /// Snapshot all contacts.
    pub fn contacts_snapshot(&self) -> Vec<Contact> {
        self.contacts.lock().clone()
    }

    /// Persist accounts and contacts through the repository.
    pub fn persist(&self, repository: &dyn StateRepository) -> Result<(), WalletError> {
        repository.save_accounts(&self.accounts_snapshot())?;
        repository.save_contacts(&self.contacts_snapshot())?;
        Ok(())
    }

    /// Export the whole wallet as an encrypted backup container.
    pub fn export_backup(
        &self,
        session_password: &str,
        backup_password: &str,
        transaction_metadata: Option<TransactionMetadataSection>,
        created_at: u64,
    ) -> Result<EncryptedBackup, WalletError> {
        BackupManager::export(
            session_password,
            backup_password,
            &self.sealed_seed,
            &self.accounts_snapshot(),
            &self.contacts_snapshot(),
            transaction_metadata,
            self.network(),
            created_at,
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("network", &self.engine.network())
            .field("accounts", &self.accounts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, Txid};
    use sable_core::account::AddressSet;
    use sable_core::error::SourceError;
    use sable_core::types::{AddressKind, FeeEstimates, Utxo};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    const PW: &str = "Unlock123!";

    /// In-memory chain source seeded with UTXOs per address.
    struct MockChain {
        utxos: StdMutex<StdHashMap<String, Vec<Utxo>>>,
    }

    impl MockChain {
        fn new() -> Self {
            Self {
                utxos: StdMutex::new(StdHashMap::new()),
            }
        }

        fn fund(&self, address: &str, value: u64, id: u8) {
            let utxo = Utxo {
                txid: Txid::from_byte_array([id; 32]),
                vout: 0,
                value,
                address: address.to_string(),
                confirmations: 6,
            };
            self.utxos
                .lock()
                .unwrap()
                .entry(address.to_string())
                .or_default()
                .push(utxo);
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

    fn session_with_account() -> Session {
        let mut session = Session::create(Network::Testnet, PW).unwrap();
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

    #[test]
    fn create_and_reveal_mnemonic() {
        let session = session_with_account();
        let phrase = session.reveal_mnemonic(PW).unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24);

        // Wrong password is a generic authentication failure.
        let err = session.reveal_mnemonic("wrong").unwrap_err();
        assert_eq!(err, WalletError::Authentication);
    }

    #[test]
    fn mnemonic_roundtrip_restores_addresses() {
        let session = session_with_account();
        let phrase = session.reveal_mnemonic(PW).unwrap();
        let a0 = session.next_receive_address("spending").unwrap();

        let mut restored =
            Session::unlock_from_mnemonic(&phrase, Network::Testnet, PW).unwrap();
        restored
            .add_account(Account::Hd {
                name: "spending".into(),
                kind: AddressKind::NativeSegwit,
                account_index: 0,
                addresses: AddressSet::default(),
            })
            .unwrap();
        let b0 = restored.next_receive_address("spending").unwrap();
        assert_eq!(a0, b0);
    }

    #[test]
    fn duplicate_account_rejected() {
        let mut session = session_with_account();
        let err = session
            .add_account(Account::Hd {
                name: "spending".into(),
                kind: AddressKind::Legacy,
                account_index: 1,
                addresses: AddressSet::default(),
            })
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::DuplicateAccount {
                name: "spending".into()
            }
        );
    }

    #[test]
    fn send_produces_distinct_change_addresses() {
        let session = session_with_account();
        let chain = MockChain::new();
        for i in 0..4u8 {
            let addr = session.next_receive_address("spending").unwrap();
            chain.fund(&addr, 200_000, i + 1);
        }
        let recipient = Recipient {
            address: session.next_receive_address("spending").unwrap(),
            amount: 10_000,
        };

        // Three sends: three change outputs, all distinct internal
        // addresses with zero reuse.
        let mut change_scripts = std::collections::HashSet::new();
        for _ in 0..3 {
            let tx = session.send("spending", &[recipient.clone()], 2, &chain).unwrap();
            let change = tx.output.last().unwrap();
            assert!(change.value > Amount::from_sat(0));
            assert!(change_scripts.insert(change.script_pubkey.clone()));
        }
        assert_eq!(change_scripts.len(), 3);
    }

    #[test]
    fn send_insufficient_funds_propagates() {
        let session = session_with_account();
        let chain = MockChain::new();
        let addr = session.next_receive_address("spending").unwrap();
        chain.fund(&addr, 5_000, 1);

        let err = session
            .send(
                "spending",
                &[Recipient {
                    address: addr,
                    amount: 100_000,
                }],
                2,
                &chain,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
    }

    #[test]
    fn send_gap_limit_failure_propagates_no_fallback() {
        let session = session_with_account();
        let chain = MockChain::new();
        let addr = session.next_receive_address("spending").unwrap();
        chain.fund(&addr, 500_000, 1);

        // Exhaust the internal chain so change issuance must refuse.
        session
            .with_account("spending", |acct| {
                for _ in 0..sable_core::constants::GAP_LIMIT {
                    AddressBook::next_unused(&session.engine, acct, Chain::Internal)?;
                }
                Ok::<_, WalletError>(())
            })
            .unwrap()
            .unwrap();

        let err = session
            .send(
                "spending",
                &[Recipient {
                    address: addr,
                    amount: 10_000,
                }],
                2,
                &chain,
            )
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::GapLimitExceeded {
                chain: Chain::Internal
            }
        );
    }

    #[test]
    fn send_from_imported_account_rejected() {
        let mut session = session_with_account();
        session
            .add_account(Account::Imported {
                name: "paper".into(),
                address: "tb1qpaper".into(),
                compressed: true,
                encrypted_wif: "AAAA".into(),
            })
            .unwrap();
        let chain = MockChain::new();
        let err = session
            .send(
                "paper",
                &[Recipient {
                    address: "tb1qsomewhere".into(),
                    amount: 1,
                }],
                1,
                &chain,
            )
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn contact_rotation_through_session() {
        let session = session_with_account();
        let xpub = session.engine().account_xpub(AddressKind::NativeSegwit, 9).unwrap();
        let mut contact = Contact::Xpub {
            name: "alice".into(),
            xpub,
            last_used_index: None,
            cache: Vec::new(),
        };
        ContactAddressRotator::refill_cache(session.engine(), &mut contact, 20).unwrap();
        session.add_contact(contact).unwrap();

        let a0 = session.next_contact_address("alice").unwrap();
        session.record_contact_usage("alice", &a0).unwrap();
        let a1 = session.next_contact_address("alice").unwrap();
        assert_ne!(a0, a1);
    }

    #[test]
    fn persist_and_export_roundtrip() {
        use sable_core::error::StorageError;

        struct MemoryRepository {
            accounts: StdMutex<Vec<Account>>,
            contacts: StdMutex<Vec<Contact>>,
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

        let session = session_with_account();
        session.next_receive_address("spending").unwrap();
        let repo = MemoryRepository {
            accounts: StdMutex::new(Vec::new()),
            contacts: StdMutex::new(Vec::new()),
        };
        session.persist(&repo).unwrap();
        assert_eq!(repo.load_accounts().unwrap().len(), 1);

        // Full backup -> import -> unlock: state identical.
        let backup = session
            .export_backup(PW, "Sep@rate456!!", None, 1_700_000_000)
            .unwrap();
        let restored =
            BackupManager::import(&backup, "Sep@rate456!!", Network::Testnet).unwrap();
        assert_eq!(restored.accounts, session.accounts_snapshot());

        let restored_session =
            Session::unlock_restored(restored, Network::Testnet, PW).unwrap();
        assert_eq!(
            restored_session.accounts_snapshot(),
            session.accounts_snapshot()
        );
        // Same seed: next addresses line up.
        let a = session.next_receive_address("spending").unwrap();
        let b = restored_session.next_receive_address("spending").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_account_and_contact_errors() {
        let session = session_with_account();
        assert!(session.next_receive_address("nope").is_err());
        assert!(session.next_contact_address("nobody").is_err());
        assert!(session.record_contact_usage("nobody", "addr").is_err());
    }

    #[test]
    fn debug_format_hides_key_material() {
        let session = session_with_account();
        let debug = format!("{session:?}");
        assert!(debug.contains("Session"));
        assert!(debug.contains("Testnet"));
    }
}
