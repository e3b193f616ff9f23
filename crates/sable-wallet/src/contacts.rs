//! Counterparty send-address rotation.
//!
//! Contacts that published an xpub get a fresh address per send, drawn
//! from a bounded pre-derived cache. When the cache runs dry the rotator
//! reports [`WalletError::CacheExhausted`] instead of wrapping back to
//! index 0; reuse is a privacy leak the caller must opt into explicitly by
//! refilling. Static-address contacts always get the same address plus an
//! informational reuse counter.

use bitcoin::Address;
use bitcoin::bip32::{ChildNumber, DerivationPath};
use tracing::debug;

use sable_core::constants::CONTACT_CACHE_SIZE;
use sable_core::contact::Contact;
use sable_core::types::Chain;

use crate::error::WalletError;
use crate::keys::KeyDerivationEngine;

/// Tracks last-used indices and reuse counters for counterparties.
pub struct ContactAddressRotator;

impl ContactAddressRotator {
    /// The address the next send to this contact should use.
    ///
    /// Xpub contacts: the cache entry after the last used one; an
    /// exhausted cache is an error, never index 0 again. Static contacts:
    /// always the fixed address.
    pub fn next_send_address(contact: &Contact) -> Result<String, WalletError> {
        match contact {
            Contact::Static { address, .. } => Ok(address.clone()),
            Contact::Xpub {
                name,
                last_used_index,
                cache,
                ..
            } => {
                let next = match last_used_index {
                    Some(i) => i.saturating_add(1),
                    None => 0,
                };
                cache.get(next as usize).cloned().ok_or_else(|| {
                    WalletError::CacheExhausted {
                        contact: name.clone(),
                    }
                })
            }
        }
    }

    /// Record that a send to `used_address` went out.
    ///
    /// Advances the xpub contact's last-used index (monotonically; a stale
    /// or unknown address never moves it backwards) or bumps the static
    /// contact's reuse counter. The counter is informational only.
    pub fn record_usage(contact: &mut Contact, used_address: &str) {
        match contact {
            Contact::Static {
                address,
                reuse_count,
                ..
            } => {
                if address == used_address {
                    *reuse_count = reuse_count.saturating_add(1);
                }
            }
            Contact::Xpub {
                name,
                last_used_index,
                cache,
                ..
            } => {
                if let Some(pos) = cache.iter().position(|a| a == used_address) {
                    let pos = pos as u32;
                    let advanced = match last_used_index {
                        Some(current) => pos > *current,
                        None => true,
                    };
                    if advanced {
                        *last_used_index = Some(pos);
                        debug!(contact = %name, index = pos, "advanced contact address index");
                    }
                }
            }
        }
    }

    /// Top up an xpub contact's cache by deriving further receive
    /// addresses (P2WPKH at `xpub/0/i`) up to `target_len` entries.
    ///
    /// Cache growth is the out-of-band recovery for
    /// [`WalletError::CacheExhausted`].
    pub fn refill_cache(
        engine: &KeyDerivationEngine,
        contact: &mut Contact,
        target_len: u32,
    ) -> Result<(), WalletError> {
        match contact {
            Contact::Static { .. } => Err(WalletError::Validation(
                "static contacts have no address cache".into(),
            )),
            Contact::Xpub { xpub, cache, .. } => {
                let target = target_len.max(CONTACT_CACHE_SIZE) as usize;
                while cache.len() < target {
                    let index = cache.len() as u32;
                    let path = DerivationPath::from(vec![
                        ChildNumber::from_normal_idx(Chain::External.index())
                            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
                        ChildNumber::from_normal_idx(index)
                            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
                    ]);
                    let child = xpub
                        .derive_pub(engine.secp(), &path)
                        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
                    let address = Address::p2wpkh(&child.to_pub(), engine.network());
                    cache.push(address.to_string());
                }
                Ok(())
            }
        }
    }
}
