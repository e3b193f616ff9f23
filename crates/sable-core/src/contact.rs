//! Counterparty records for send-address rotation.

use bitcoin::bip32::Xpub;
use serde::{Deserialize, Serialize};

/// A known counterparty.
///
/// Contacts that publish an extended public key get a fresh address per
/// send, drawn from a bounded pre-derived cache. Contacts with only a
/// static address are reused, with a counter so the UI can surface a
/// privacy warning. The counter is informational; nothing depends on it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Contact {
    /// A counterparty reachable only at one fixed address.
    Static {
        /// Display name, unique within the wallet.
        name: String,
        /// The fixed address.
        address: String,
        /// How many sends have gone to this address.
        reuse_count: u64,
    },
    /// A counterparty that published an extended public key.
    Xpub {
        /// Display name, unique within the wallet.
        name: String,
        /// The contact's published account xpub.
        xpub: Xpub,
        /// Index of the most recently used cache entry, if any.
        last_used_index: Option<u32>,
        /// Pre-derived receive addresses, in derivation order starting at 0.
        cache: Vec<String>,
    },
}

impl Contact {
    /// The contact's display name.
    pub fn name(&self) -> &str {
        match self {
            Contact::Static { name, .. } | Contact::Xpub { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const TEST_XPUB: &str = "xpub6CUGRUonZSQ4TWtTMmzXdrXDtypWKiKrhko4egpiMZbpiaQL2jkwSB1icqYh2cfDfVxdx4df189oLKnC5fSwqPfgyP3hooxujYzAu3fDVmz";

    #[test]
    fn static_contact_serde_roundtrip() {
        let contact = Contact::Static {
            name: "exchange".into(),
            address: "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into(),
            reuse_count: 3,
        };
        let json = serde_json::to_string(&contact).unwrap();
        let back: Contact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, contact);
    }

    #[test]
    fn xpub_contact_serde_roundtrip() {
        let contact = Contact::Xpub {
            name: "alice".into(),
            xpub: Xpub::from_str(TEST_XPUB).unwrap(),
            last_used_index: Some(4),
            cache: vec!["a0".into(), "a1".into()],
        };
        let json = serde_json::to_string(&contact).unwrap();
        let back: Contact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, contact);
    }

    #[test]
    fn name_across_variants() {
        let contact = Contact::Static {
            name: "bob".into(),
            address: "addr".into(),
            reuse_count: 0,
        };
        assert_eq!(contact.name(), "bob");
    }
}
