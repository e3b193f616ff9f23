//! Gap-limit-enforcing address issuance.
//!
//! Every fresh address comes through here. Issuing past the gap limit
//! fails with [`WalletError::GapLimitExceeded`] rather than creating an
//! address that balance scanners (and this wallet, on restore) might never
//! discover; the caller decides how to recover, the book never auto-wraps.

use tracing::warn;

use sable_core::account::Account;
use sable_core::types::Chain;

use crate::error::WalletError;
use crate::keys::KeyDerivationEngine;
use crate::multisig;

/// Per-account address-state bookkeeping.
pub struct AddressBook;

impl AddressBook {
    /// Issue the next never-used address on a chain.
    ///
    /// Derives at the chain's monotonic counter, records the entry, and
    /// advances the counter. Fails with [`WalletError::GapLimitExceeded`]
    /// when the chain already has a full gap-limit run of unused addresses
    /// at its tip. The external and internal chains have independent
    /// ceilings.
    pub fn next_unused(
        engine: &KeyDerivationEngine,
        account: &mut Account,
        chain: Chain,
    ) -> Result<String, WalletError> {
        match account {
            Account::Hd {
                name,
                kind,
                account_index,
                addresses,
            } => {
                let branch = addresses.chain_mut(chain);
                if !branch.can_allocate() {
                    warn!(account = %name, %chain, "gap limit reached, refusing to derive");
                    return Err(WalletError::GapLimitExceeded { chain });
                }
                let (address, _) =
                    engine.derive_address(*kind, *account_index, chain, branch.next_index)?;
                branch.append(address.clone());
                Ok(address)
            }
            Account::Multisig {
                name,
                threshold,
                cosigner_xpubs,
                addresses,
                ..
            } => {
                let branch = addresses.chain_mut(chain);
                if !branch.can_allocate() {
                    warn!(account = %name, %chain, "gap limit reached, refusing to derive");
                    return Err(WalletError::GapLimitExceeded { chain });
                }
                let (address, _) = multisig::derive_multisig_address(
                    engine.secp(),
                    cosigner_xpubs,
                    *threshold,
                    engine.network(),
                    chain,
                    branch.next_index,
                )?;
                let address = address.to_string();
                branch.append(address.clone());
                Ok(address)
            }
            Account::Imported { .. } => Err(WalletError::Validation(
                "imported accounts do not derive addresses".into(),
            )),
        }
    }

    /// Flip the used flag for an address. Idempotent; returns whether the
    /// account knows the address.
    pub fn mark_used(account: &mut Account, address: &str) -> bool {
        match account.address_set_mut() {
            Some(set) => set.mark_used(address),
            None => false,
        }
    }

    /// The chain and index an address was issued at, if this account
    /// issued it.
    pub fn lookup(account: &Account, address: &str) -> Option<(Chain, u32)> {
        account
            .address_set()
            .and_then(|set| set.find(address))
            .map(|(chain, entry)| (chain, entry.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;
    use sable_core::account::AddressSet;
    use sable_core::constants::GAP_LIMIT;
    use sable_core::types::AddressKind;

    use crate::keys::Seed;

    fn test_engine() -> KeyDerivationEngine {
        let seed = Seed::from_entropy(vec![5u8; 32]).unwrap();
        KeyDerivationEngine::new(&seed, Network::Testnet).unwrap()
    }

    fn hd_account() -> Account {
        Account::Hd {
            name: "spending".into(),
            kind: AddressKind::NativeSegwit,
            account_index: 0,
            addresses: AddressSet::default(),
        }
    }

    #[test]
    fn issues_fresh_addresses_in_order() {
        let engine = test_engine();
        let mut account = hd_account();
        let a0 = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        let a1 = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        assert_ne!(a0, a1);
        assert_eq!(AddressBook::lookup(&account, &a0), Some((Chain::External, 0)));
        assert_eq!(AddressBook::lookup(&account, &a1), Some((Chain::External, 1)));
    }

    #[test]
    fn twentieth_succeeds_twenty_first_fails() {
        let engine = test_engine();
        let mut account = hd_account();
        for i in 0..GAP_LIMIT {
            let result = AddressBook::next_unused(&engine, &mut account, Chain::Internal);
            assert!(result.is_ok(), "derivation {i} should succeed");
        }
        let err = AddressBook::next_unused(&engine, &mut account, Chain::Internal).unwrap_err();
        assert_eq!(
            err,
            WalletError::GapLimitExceeded {
                chain: Chain::Internal
            }
        );
    }

    #[test]
    fn using_an_address_reopens_the_window() {
        let engine = test_engine();
        let mut account = hd_account();
        let mut last = String::new();
        for _ in 0..GAP_LIMIT {
            last = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        }
        assert!(AddressBook::next_unused(&engine, &mut account, Chain::External).is_err());

        assert!(AddressBook::mark_used(&mut account, &last));
        let next = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        assert_eq!(
            AddressBook::lookup(&account, &next),
            Some((Chain::External, GAP_LIMIT))
        );
    }

    #[test]
    fn chains_have_independent_ceilings() {
        let engine = test_engine();
        let mut account = hd_account();
        for _ in 0..GAP_LIMIT {
            AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        }
        // External at its ceiling; internal unaffected.
        assert!(AddressBook::next_unused(&engine, &mut account, Chain::External).is_err());
        assert!(AddressBook::next_unused(&engine, &mut account, Chain::Internal).is_ok());
    }

    #[test]
    fn multisig_accounts_issue_script_addresses() {
        let engine = test_engine();
        let other = KeyDerivationEngine::new(
            &Seed::from_entropy(vec![6u8; 32]).unwrap(),
            Network::Testnet,
        )
        .unwrap();
        let mut account = Account::Multisig {
            name: "shared".into(),
            threshold: 2,
            cosigner_xpubs: vec![
                engine.multisig_account_xpub(0).unwrap(),
                other.multisig_account_xpub(0).unwrap(),
            ],
            account_index: 0,
            addresses: AddressSet::default(),
        };
        let addr = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        assert!(addr.starts_with("tb1q"));
        // P2WSH addresses are longer than P2WPKH.
        assert!(addr.len() > 50);
    }

    #[test]
    fn imported_accounts_cannot_derive() {
        let engine = test_engine();
        let mut account = Account::Imported {
            name: "paper".into(),
            address: "addr".into(),
            compressed: true,
            encrypted_wif: "AAAA".into(),
        };
        let err = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        assert!(!AddressBook::mark_used(&mut account, "addr"));
        assert!(AddressBook::lookup(&account, "addr").is_none());
    }

    #[test]
    fn mark_used_is_idempotent() {
        let engine = test_engine();
        let mut account = hd_account();
        let addr = AddressBook::next_unused(&engine, &mut account, Chain::External).unwrap();
        assert!(AddressBook::mark_used(&mut account, &addr));
        assert!(AddressBook::mark_used(&mut account, &addr));
    }
}
