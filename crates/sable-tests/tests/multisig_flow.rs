//! End-to-end 2-of-3 multisig coordination and contact rotation.

use bitcoin::hashes::Hash;
use bitcoin::{Network, Txid};

use sable_core::account::{Account, AddressSet};
use sable_core::constants::CONTACT_CACHE_SIZE;
use sable_core::contact::Contact;
use sable_core::types::{AddressKind, Chain, Utxo};
use sable_tests::helpers::SESSION_PW;
use sable_wallet::address_book::AddressBook;
use sable_wallet::contacts::ContactAddressRotator;
use sable_wallet::error::WalletError;
use sable_wallet::keys::{KeyDerivationEngine, Seed};
use sable_wallet::multisig::{FinalizeOutcome, MultisigCoordinator, PendingMultisigTransaction};
use sable_wallet::session::Session;

/// Three cosigner engines plus the shared 2-of-3 account every one of
/// them derives identically.
fn setup_two_of_three() -> (Vec<KeyDerivationEngine>, Account) {
    let engines: Vec<KeyDerivationEngine> = (1u8..=3)
        .map(|b| {
            let seed = Seed::from_entropy(vec![b; 32]).unwrap();
            KeyDerivationEngine::new(&seed, Network::Testnet).unwrap()
        })
        .collect();
    let cosigner_xpubs = engines
        .iter()
        .map(|e| e.multisig_account_xpub(0).unwrap())
        .collect();
    let account = Account::Multisig {
        name: "treasury".into(),
        threshold: 2,
        cosigner_xpubs,
        account_index: 0,
        addresses: AddressSet::default(),
    };
    (engines, account)
}

fn build_joint(
    engines: &[KeyDerivationEngine],
    account: &mut Account,
) -> PendingMultisigTransaction {
    // Fund the shared account's first receive address.
    let funding_addr =
        AddressBook::next_unused(&engines[0], account, Chain::External).unwrap();
    let utxo = Utxo {
        txid: Txid::from_byte_array([0xAB; 32]),
        vout: 1,
        value: 250_000,
        address: funding_addr,
        confirmations: 10,
    };

    // Change goes to a fresh internal-chain multisig address.
    let change_addr =
        AddressBook::next_unused(&engines[0], account, Chain::Internal).unwrap();
    let fee = MultisigCoordinator::estimate_joint_fee(2, 3, 1, 2, 3);
    let send_amount = 100_000;
    let change_amount = 250_000 - send_amount - fee;

    let recipient = engines[0]
        .derive_address(AddressKind::NativeSegwit, 0, Chain::External, 0)
        .unwrap()
        .0;

    MultisigCoordinator::build_joint_transaction(
        &engines[0],
        account,
        &[(utxo, Chain::External, 0)],
        &[(recipient, send_amount)],
        fee,
        Some((change_addr, change_amount)),
        1_700_000_000,
    )
    .unwrap()
}

/// One signature finalizes to `Incomplete`; the second finalizes to a
/// transaction with exactly two embedded signatures.
#[test]
fn two_of_three_signing_lifecycle() {
    let (engines, mut account) = setup_two_of_three();
    let mut pending = build_joint(&engines, &mut account);
    assert_eq!(pending.required_signatures, 2);

    // First signature.
    let signer0 = engines[0]
        .account_xpriv(&engines[0].multisig_account_path(0).unwrap())
        .unwrap();
    MultisigCoordinator::add_signature(&engines[0], &mut pending, &signer0).unwrap();

    let pending = match MultisigCoordinator::finalize(pending).unwrap() {
        FinalizeOutcome::Incomplete(p) => p,
        FinalizeOutcome::Complete(_) => panic!("one signature must not finalize a 2-of-3"),
    };

    // Second signature, contributed by a different cosigner from the
    // serialized artifact (as exchanged out of band).
    let json = serde_json::to_string(&pending).unwrap();
    let mut pending: PendingMultisigTransaction = serde_json::from_str(&json).unwrap();
    let signer1 = engines[1]
        .account_xpriv(&engines[1].multisig_account_path(0).unwrap())
        .unwrap();
    MultisigCoordinator::add_signature(&engines[1], &mut pending, &signer1).unwrap();

    match MultisigCoordinator::finalize(pending).unwrap() {
        FinalizeOutcome::Complete(tx) => {
            // Witness: dummy, two signatures, witness script.
            let witness = &tx.input[0].witness;
            assert_eq!(witness.len(), 4);
            let sig_items: Vec<_> = (1..3).map(|i| witness.nth(i).unwrap()).collect();
            for sig in sig_items {
                // DER signature plus sighash byte.
                assert!(sig.len() >= 68 && sig.len() <= 73);
            }
            assert_eq!(tx.output.len(), 2);
        }
        FinalizeOutcome::Incomplete(_) => panic!("two signatures must finalize a 2-of-3"),
    }
}

/// The same signer contributing twice changes nothing, and a stranger's
/// key is rejected outright.
#[test]
fn signature_accumulation_is_idempotent_and_closed() {
    let (engines, mut account) = setup_two_of_three();
    let mut pending = build_joint(&engines, &mut account);

    let signer = engines[2]
        .account_xpriv(&engines[2].multisig_account_path(0).unwrap())
        .unwrap();
    MultisigCoordinator::add_signature(&engines[2], &mut pending, &signer).unwrap();
    let snapshot = pending.clone();
    MultisigCoordinator::add_signature(&engines[2], &mut pending, &signer).unwrap();
    assert_eq!(pending, snapshot);

    let stranger_engine = KeyDerivationEngine::new(
        &Seed::from_entropy(vec![0x77; 32]).unwrap(),
        Network::Testnet,
    )
    .unwrap();
    let stranger = stranger_engine
        .account_xpriv(&stranger_engine.multisig_account_path(0).unwrap())
        .unwrap();
    let err = MultisigCoordinator::add_signature(&stranger_engine, &mut pending, &stranger)
        .unwrap_err();
    assert_eq!(err, WalletError::UnknownSigner);
}

/// Every cosigner derives the same joint addresses, so the account state
/// can be reconstructed by any participant.
#[test]
fn cosigners_agree_on_every_address() {
    let (engines, account) = setup_two_of_three();
    for index in 0..5 {
        let mut derived = engines.iter().map(|e| {
            MultisigCoordinator::derive_address(e, &account, Chain::External, index)
                .unwrap()
                .0
        });
        let first = derived.next().unwrap();
        assert!(derived.all(|a| a == first));
    }
}

/// An xpub contact with a 20-address cache serves 20 sends; the 21st
/// reports exhaustion instead of wrapping to index 0.
#[test]
fn contact_cache_exhausts_at_twenty_one() {
    let session = {
        let mut s = Session::create(Network::Testnet, SESSION_PW).unwrap();
        s.add_account(Account::Hd {
            name: "spending".into(),
            kind: AddressKind::NativeSegwit,
            account_index: 0,
            addresses: AddressSet::default(),
        })
        .unwrap();
        s
    };

    let peer_engine = KeyDerivationEngine::new(
        &Seed::from_entropy(vec![0x55; 32]).unwrap(),
        Network::Testnet,
    )
    .unwrap();
    let mut contact = Contact::Xpub {
        name: "alice".into(),
        xpub: peer_engine
            .account_xpub(AddressKind::NativeSegwit, 0)
            .unwrap(),
        last_used_index: None,
        cache: Vec::new(),
    };
    ContactAddressRotator::refill_cache(session.engine(), &mut contact, CONTACT_CACHE_SIZE)
        .unwrap();
    session.add_contact(contact).unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..CONTACT_CACHE_SIZE {
        let addr = session.next_contact_address("alice").unwrap();
        assert!(seen.insert(addr.clone()), "contact address reused");
        session.record_contact_usage("alice", &addr).unwrap();
    }
    let err = session.next_contact_address("alice").unwrap_err();
    assert_eq!(
        err,
        WalletError::CacheExhausted {
            contact: "alice".into()
        }
    );
}
