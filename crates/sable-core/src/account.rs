//! Account records and per-account address-state bookkeeping.
//!
//! An [`Account`] is a named derivation branch (HD single-sig), an imported
//! single keypair, or a multisig script branch. HD and multisig accounts own
//! an [`AddressSet`]: two monotonic index counters plus the ordered list of
//! issued addresses with used/fresh flags. The gap-limit arithmetic lives on
//! [`AddressChain`]; enforcement is the wallet layer's job.

use bitcoin::bip32::Xpub;
use serde::{Deserialize, Serialize};

use crate::constants::GAP_LIMIT;
use crate::types::{AddressKind, Chain};

/// One issued address on a derivation chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressEntry {
    /// Derivation index on the owning chain.
    pub index: u32,
    /// Encoded address.
    pub address: String,
    /// Whether the address has ever received or been shown as spent-from.
    pub used: bool,
}

/// One derivation chain: a monotonic counter and its issued addresses.
///
/// `next_index` only ever grows; entries are ordered by index. Restore paths
/// must reinstate both fields byte-for-byte rather than re-deriving from a
/// scan, otherwise gap-adjacent funds become unreachable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressChain {
    /// Next derivation index to issue.
    pub next_index: u32,
    /// Issued addresses in derivation order.
    pub entries: Vec<AddressEntry>,
}

impl AddressChain {
    /// Number of consecutive unused addresses at the tip of the chain.
    pub fn tip_unused(&self) -> u32 {
        self.entries
            .iter()
            .rev()
            .take_while(|e| !e.used)
            .count() as u32
    }

    /// Whether another address may be issued without breaching the gap limit.
    pub fn can_allocate(&self) -> bool {
        self.tip_unused() < GAP_LIMIT
    }

    /// Record a freshly derived address and advance the counter.
    ///
    /// Returns the index the address was issued at. Callers must check
    /// [`can_allocate`](Self::can_allocate) first; this method does not
    /// enforce the ceiling.
    pub fn append(&mut self, address: String) -> u32 {
        let index = self.next_index;
        self.entries.push(AddressEntry {
            index,
            address,
            used: false,
        });
        self.next_index = self.next_index.saturating_add(1);
        index
    }

    /// Flip the used flag for an address. Idempotent. Returns whether the
    /// address belongs to this chain.
    pub fn mark_used(&mut self, address: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.used = true;
                true
            }
            None => false,
        }
    }

    /// Look up an entry by address.
    pub fn find(&self, address: &str) -> Option<&AddressEntry> {
        self.entries.iter().find(|e| e.address == address)
    }
}

/// External + internal chains of one account.
///
/// The two chains carry independent gap ceilings: exhausting the receive
/// chain must not block change issuance, and vice versa.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSet {
    /// Receive chain.
    pub external: AddressChain,
    /// Change chain.
    pub internal: AddressChain,
}

impl AddressSet {
    /// Borrow the chain for a branch.
    pub fn chain(&self, chain: Chain) -> &AddressChain {
        match chain {
            Chain::External => &self.external,
            Chain::Internal => &self.internal,
        }
    }

    /// Mutably borrow the chain for a branch.
    pub fn chain_mut(&mut self, chain: Chain) -> &mut AddressChain {
        match chain {
            Chain::External => &mut self.external,
            Chain::Internal => &mut self.internal,
        }
    }

    /// Mark an address used on whichever chain holds it.
    pub fn mark_used(&mut self, address: &str) -> bool {
        self.external.mark_used(address) || self.internal.mark_used(address)
    }

    /// Locate an address across both chains.
    pub fn find(&self, address: &str) -> Option<(Chain, &AddressEntry)> {
        if let Some(e) = self.external.find(address) {
            return Some((Chain::External, e));
        }
        self.internal.find(address).map(|e| (Chain::Internal, e))
    }
}

/// A named account: one derivation branch, imported key, or multisig policy.
///
/// A tagged sum type so every call site matches exhaustively instead of
/// assuming a single shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Account {
    /// Deterministic single-sig branch under the wallet seed.
    Hd {
        /// Display name, unique within the wallet.
        name: String,
        /// Script family (BIP-44/49/84).
        kind: AddressKind,
        /// Hardened account index under the purpose/coin branch.
        account_index: u32,
        /// Issued-address state.
        addresses: AddressSet,
    },
    /// A single imported keypair, outside the seed's derivation tree.
    Imported {
        /// Display name, unique within the wallet.
        name: String,
        /// The key's only address.
        address: String,
        /// Whether the key encodes a compressed public key.
        compressed: bool,
        /// WIF-encoded key, session-tier encrypted, base64. Never stored
        /// in the clear.
        encrypted_wif: String,
    },
    /// m-of-n script branch over a set of cosigner extended public keys.
    Multisig {
        /// Display name, unique within the wallet.
        name: String,
        /// Signatures required to spend (`m`).
        threshold: u32,
        /// Account-level cosigner xpubs, including this wallet's own.
        cosigner_xpubs: Vec<Xpub>,
        /// Hardened account index under the multisig purpose branch.
        account_index: u32,
        /// Issued-address state.
        addresses: AddressSet,
    },
}

impl Account {
    /// The account's display name.
    pub fn name(&self) -> &str {
        match self {
            Account::Hd { name, .. }
            | Account::Imported { name, .. }
            | Account::Multisig { name, .. } => name,
        }
    }

    /// The issued-address state, if this account derives addresses.
    /// Imported accounts hold a single static address and have none.
    pub fn address_set(&self) -> Option<&AddressSet> {
        match self {
            Account::Hd { addresses, .. } | Account::Multisig { addresses, .. } => {
                Some(addresses)
            }
            Account::Imported { .. } => None,
        }
    }

    /// Mutable issued-address state, if any.
    pub fn address_set_mut(&mut self) -> Option<&mut AddressSet> {
        match self {
            Account::Hd { addresses, .. } | Account::Multisig { addresses, .. } => {
                Some(addresses)
            }
            Account::Imported { .. } => None,
        }
    }
}
