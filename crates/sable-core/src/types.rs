//! Shared wallet types.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derivation branch of an account: receive vs change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    /// Receive branch (BIP-44 change field 0), shown to counterparties.
    External,
    /// Change branch (BIP-44 change field 1), never handed out.
    Internal,
}

impl Chain {
    /// BIP-44 change field value for this branch.
    pub fn index(&self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::External => write!(f, "external"),
            Chain::Internal => write!(f, "internal"),
        }
    }
}

/// Script/address family of a single-sig account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    /// P2PKH, base58 `1...` addresses (BIP-44).
    Legacy,
    /// P2SH-wrapped P2WPKH, `3...` addresses (BIP-49).
    NestedSegwit,
    /// Native P2WPKH, bech32 `bc1q...` addresses (BIP-84).
    NativeSegwit,
}

impl AddressKind {
    /// BIP purpose number for the derivation path.
    pub fn purpose(&self) -> u32 {
        match self {
            AddressKind::Legacy => 44,
            AddressKind::NestedSegwit => 49,
            AddressKind::NativeSegwit => 84,
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressKind::Legacy => write!(f, "legacy"),
            AddressKind::NestedSegwit => write!(f, "nested-segwit"),
            AddressKind::NativeSegwit => write!(f, "native-segwit"),
        }
    }
}

/// A spendable output as reported by the blockchain data source.
///
/// Immutable snapshot: valid only for the duration of one build operation.
/// Values in satoshis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction that created this output.
    pub txid: Txid,
    /// Output index within that transaction.
    pub vout: u32,
    /// Output value in satoshis.
    pub value: u64,
    /// Address the output pays to.
    pub address: String,
    /// Confirmation depth at snapshot time.
    pub confirmations: u32,
}

/// Fee-rate estimates in sat/vByte for three confirmation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    /// Next-block target.
    pub fast: u64,
    /// ~3 block target.
    pub normal: u64,
    /// ~6+ block target.
    pub slow: u64,
}
