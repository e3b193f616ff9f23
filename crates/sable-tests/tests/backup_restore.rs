//! Backup export/import scenarios across the whole engine.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::Network;

use sable_core::types::Chain;
use sable_tests::helpers::*;
use sable_wallet::address_book::AddressBook;
use sable_wallet::backup::BackupManager;
use sable_wallet::error::WalletError;
use sable_wallet::session::Session;

/// Export immediately followed by import restores account and contact
/// state byte-identically, including index counters and used flags.
#[test]
fn export_import_restores_identical_state() {
    let session = test_session();
    let chain = MockChain::new();

    // Give the wallet organic state: issued addresses, a used one, a send.
    for _ in 0..3 {
        let addr = session.next_receive_address("spending").unwrap();
        chain.fund(&addr, 150_000);
    }
    let recipient = session.next_receive_address("spending").unwrap();
    session
        .send(
            "spending",
            &[sable_wallet::builder::Recipient {
                address: recipient,
                amount: 20_000,
            }],
            3,
            &chain,
        )
        .unwrap();

    let before = session.accounts_snapshot();
    let backup = session
        .export_backup(SESSION_PW, BACKUP_PW, None, 1_700_000_000)
        .unwrap();

    let restored = BackupManager::import(&backup, BACKUP_PW, Network::Testnet).unwrap();
    assert_eq!(restored.accounts, before);

    // Applying writes the same bytes through the repository.
    let repo = MemoryRepository::new();
    BackupManager::apply(&restored, &repo).unwrap();
    assert_eq!(
        sable_core::traits::StateRepository::load_accounts(&repo).unwrap(),
        before
    );
}

/// One corrupted byte of the encrypted payload fails with `Integrity`
/// before any decryption is attempted (not `Authentication`).
#[test]
fn corrupted_payload_fails_integrity_before_decryption() {
    let session = test_session();
    let mut backup = session
        .export_backup(SESSION_PW, BACKUP_PW, None, 1_700_000_000)
        .unwrap();

    let mut raw = BASE64.decode(&backup.encrypted_payload).unwrap();
    let mid = raw.len() / 2;
    raw[mid] ^= 0x01;
    backup.encrypted_payload = BASE64.encode(&raw);

    let err = BackupManager::import(&backup, BACKUP_PW, Network::Testnet).unwrap_err();
    assert_eq!(err, WalletError::Integrity);
}

/// A restored wallet continues the derivation sequence exactly where the
/// exported one left off; the gap-limit window is preserved, not rebuilt
/// from a scan.
#[test]
fn restored_counters_continue_derivation_sequence() {
    let session = test_session();
    for _ in 0..5 {
        session.next_receive_address("spending").unwrap();
    }
    let backup = session
        .export_backup(SESSION_PW, BACKUP_PW, None, 0)
        .unwrap();

    let restored = BackupManager::import(&backup, BACKUP_PW, Network::Testnet).unwrap();
    let restored_session = Session::unlock_restored(restored, Network::Testnet, SESSION_PW).unwrap();

    let next_original = session.next_receive_address("spending").unwrap();
    let next_restored = restored_session.next_receive_address("spending").unwrap();
    assert_eq!(next_original, next_restored);

    restored_session
        .with_account("spending", |acct| {
            let set = acct.address_set().unwrap();
            assert_eq!(set.chain(Chain::External).next_index, 6);
        })
        .unwrap();
}

/// Restoring a testnet backup into a mainnet wallet context is a hard
/// failure.
#[test]
fn cross_network_restore_rejected() {
    let session = test_session();
    let backup = session
        .export_backup(SESSION_PW, BACKUP_PW, None, 0)
        .unwrap();
    let err = BackupManager::import(&backup, BACKUP_PW, Network::Bitcoin).unwrap_err();
    assert!(matches!(err, WalletError::WrongNetwork { .. }));
}

/// A gap-limit window exported at its ceiling is still at its ceiling
/// after restore.
#[test]
fn gap_window_survives_roundtrip() {
    let session = test_session();
    session
        .with_account("spending", |acct| {
            for _ in 0..sable_core::constants::GAP_LIMIT {
                AddressBook::next_unused(session.engine(), acct, Chain::Internal)?;
            }
            Ok::<_, WalletError>(())
        })
        .unwrap()
        .unwrap();

    let backup = session
        .export_backup(SESSION_PW, BACKUP_PW, None, 0)
        .unwrap();
    let restored = BackupManager::import(&backup, BACKUP_PW, Network::Testnet).unwrap();
    let restored_session = Session::unlock_restored(restored, Network::Testnet, SESSION_PW).unwrap();

    let err = restored_session
        .with_account("spending", |acct| {
            AddressBook::next_unused(restored_session.engine(), acct, Chain::Internal)
        })
        .unwrap()
        .unwrap_err();
    assert_eq!(
        err,
        WalletError::GapLimitExceeded {
            chain: Chain::Internal
        }
    );
}
