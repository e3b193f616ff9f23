//! Seed management, BIP-32 derivation and the WIF codec.
//!
//! The engine owns the master extended private key for one network. Paths
//! follow BIP-44/49/84 for single-sig accounts and a dedicated BIP-48
//! branch (`m/48'/coin'/account'/2'`) for multisig, so cosigner xpubs at an
//! account index can never collide with single-sig addresses at the same
//! index.

use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::{Address, CompressedPublicKey, Network, NetworkKind, PrivateKey, PublicKey};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sable_core::types::{AddressKind, Chain};

use crate::error::WalletError;

/// WIF version byte for mainnet keys.
const WIF_VERSION_MAINNET: u8 = 0x80;

/// WIF version byte for test-network keys (testnet, signet, regtest).
const WIF_VERSION_TESTNET: u8 = 0xEF;

/// Root entropy behind the wallet's derivation tree.
///
/// Holds 16 or 32 bytes of BIP-39 entropy (12- or 24-word phrases).
/// Exists decrypted only in process memory; zeroized on drop.
pub struct Seed {
    entropy: Vec<u8>,
}

impl Seed {
    /// Generate 32 bytes of fresh entropy (a 24-word phrase).
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut entropy = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        Self { entropy }
    }

    /// Wrap existing entropy. Only 16- and 32-byte inputs are accepted.
    pub fn from_entropy(entropy: Vec<u8>) -> Result<Self, WalletError> {
        if entropy.len() != 16 && entropy.len() != 32 {
            return Err(WalletError::Validation(format!(
                "seed entropy must be 16 or 32 bytes, got {}",
                entropy.len()
            )));
        }
        Ok(Self { entropy })
    }

    /// The raw entropy bytes. Handle with care.
    pub fn entropy(&self) -> &[u8] {
        &self.entropy
    }

    /// The 64-byte BIP-32 seed for this entropy (empty BIP-39 passphrase).
    pub(crate) fn to_bip32_seed(&self) -> Result<[u8; 64], WalletError> {
        let m = bip39::Mnemonic::from_entropy(&self.entropy)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(m.to_seed(""))
    }
}

impl Zeroize for Seed {
    fn zeroize(&mut self) {
        self.entropy.zeroize();
    }
}

impl Drop for Seed {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl ZeroizeOnDrop for Seed {}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self {
            entropy: self.entropy.clone(),
        }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("entropy", &"[REDACTED]")
            .finish()
    }
}

/// A derived keypair with the path it came from.
pub struct KeyPair {
    /// Full derivation path from the master key.
    pub path: DerivationPath,
    /// The private half.
    pub private: PrivateKey,
    /// The compressed public half.
    pub public: CompressedPublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("path", &self.path)
            .field("public", &self.public)
            .finish()
    }
}

/// Hierarchical deterministic key derivation for one network.
pub struct KeyDerivationEngine {
    secp: Secp256k1<All>,
    master: Xpriv,
    network: Network,
}

impl KeyDerivationEngine {
    /// Build the engine from seed entropy.
    pub fn new(seed: &Seed, network: Network) -> Result<Self, WalletError> {
        let mut bip32_seed = seed.to_bip32_seed()?;
        let master = Xpriv::new_master(network, &bip32_seed)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        bip32_seed.zeroize();
        Ok(Self {
            secp: Secp256k1::new(),
            master,
            network,
        })
    }

    /// The network this engine derives for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Fingerprint of the master key (for signer identification).
    pub fn master_fingerprint(&self) -> Fingerprint {
        self.master.fingerprint(&self.secp)
    }

    /// BIP-44 coin type: 0 on mainnet, 1 on every test network.
    fn coin_type(&self) -> u32 {
        match self.network {
            Network::Bitcoin => 0,
            _ => 1,
        }
    }

    /// Hardened account path for a single-sig account:
    /// `m/purpose'/coin'/account'`.
    pub fn account_path(
        &self,
        kind: AddressKind,
        account_index: u32,
    ) -> Result<DerivationPath, WalletError> {
        hardened_path(&[kind.purpose(), self.coin_type(), account_index])
    }

    /// Hardened account path for a multisig account:
    /// `m/48'/coin'/account'/2'` (script type 2' = P2WSH).
    pub fn multisig_account_path(&self, account_index: u32) -> Result<DerivationPath, WalletError> {
        hardened_path(&[48, self.coin_type(), account_index, 2])
    }

    /// Derive the keypair at an arbitrary path from the master key.
    pub fn derive_child(&self, path: &DerivationPath) -> Result<KeyPair, WalletError> {
        let xpriv = self
            .master
            .derive_priv(&self.secp, path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        let xpub = Xpub::from_priv(&self.secp, &xpriv);
        Ok(KeyPair {
            path: path.clone(),
            private: xpriv.to_priv(),
            public: xpub.to_pub(),
        })
    }

    /// Extended private key at a single-sig or multisig account path.
    pub fn account_xpriv(&self, path: &DerivationPath) -> Result<Xpriv, WalletError> {
        self.master
            .derive_priv(&self.secp, path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }

    /// Extended public key at a single-sig account path, for watch-only
    /// export.
    pub fn account_xpub(
        &self,
        kind: AddressKind,
        account_index: u32,
    ) -> Result<Xpub, WalletError> {
        let path = self.account_path(kind, account_index)?;
        Ok(Xpub::from_priv(&self.secp, &self.account_xpriv(&path)?))
    }

    /// Extended public key at the multisig account path, for exchange with
    /// cosigners.
    pub fn multisig_account_xpub(&self, account_index: u32) -> Result<Xpub, WalletError> {
        let path = self.multisig_account_path(account_index)?;
        Ok(Xpub::from_priv(&self.secp, &self.account_xpriv(&path)?))
    }

    /// Derive the address at `account/chain/index` for a single-sig account.
    ///
    /// Returns the encoded address and the full derivation path.
    pub fn derive_address(
        &self,
        kind: AddressKind,
        account_index: u32,
        chain: Chain,
        index: u32,
    ) -> Result<(String, DerivationPath), WalletError> {
        let path = self
            .account_path(kind, account_index)?
            .child(normal(chain.index())?)
            .child(normal(index)?);
        let keypair = self.derive_child(&path)?;
        let address = self.address_for_key(kind, &keypair.public);
        Ok((address.to_string(), path))
    }

    /// The address encoding a derived public key under a script kind.
    pub fn address_for_key(&self, kind: AddressKind, public: &CompressedPublicKey) -> Address {
        match kind {
            AddressKind::Legacy => Address::p2pkh(PublicKey::from(*public), self.network),
            AddressKind::NestedSegwit => Address::p2shwpkh(public, self.network),
            AddressKind::NativeSegwit => Address::p2wpkh(public, self.network),
        }
    }

    /// Encode a private key as WIF for this engine's network.
    pub fn encode_wif(&self, secret: &SecretKey, compressed: bool) -> String {
        let key = PrivateKey {
            compressed,
            network: NetworkKind::from(self.network),
            inner: *secret,
        };
        key.to_wif()
    }

    /// Decode and validate a WIF string.
    ///
    /// Validates base58-check integrity, length (51-52 chars) and the
    /// version byte. A key whose version byte encodes a different network
    /// than this engine's is rejected before any key material is
    /// constructed: cross-network key confusion is a fund-loss hazard.
    pub fn decode_wif(&self, wif: &str) -> Result<(SecretKey, bool), WalletError> {
        if wif.len() < 51 || wif.len() > 52 {
            return Err(WalletError::Validation(format!(
                "WIF length must be 51-52 characters, got {}",
                wif.len()
            )));
        }

        let payload = bs58::decode(wif)
            .with_check(None)
            .into_vec()
            .map_err(|e| WalletError::Validation(format!("WIF base58-check: {e}")))?;

        let (version, rest) = payload
            .split_first()
            .ok_or_else(|| WalletError::Validation("WIF payload empty".into()))?;

        let expected_version = match NetworkKind::from(self.network) {
            NetworkKind::Main => WIF_VERSION_MAINNET,
            NetworkKind::Test => WIF_VERSION_TESTNET,
        };
        if *version != expected_version {
            let found = match *version {
                WIF_VERSION_MAINNET => "mainnet".to_string(),
                WIF_VERSION_TESTNET => "test network".to_string(),
                other => format!("unknown version 0x{other:02x}"),
            };
            return Err(WalletError::WrongNetwork {
                expected: self.network,
                found,
            });
        }

        let (key_bytes, compressed) = match rest.len() {
            32 => (rest, false),
            33 if rest[32] == 0x01 => (&rest[..32], true),
            _ => {
                return Err(WalletError::Validation(format!(
                    "WIF payload must be 32 or 33 bytes, got {}",
                    rest.len()
                )));
            }
        };

        let secret = SecretKey::from_slice(key_bytes)
            .map_err(|e| WalletError::Validation(format!("WIF key: {e}")))?;
        Ok((secret, compressed))
    }

    /// Access the secp context (for signing helpers in sibling modules).
    pub(crate) fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }
}

impl fmt::Debug for KeyDerivationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDerivationEngine")
            .field("network", &self.network)
            .field("fingerprint", &self.master_fingerprint())
            .finish()
    }
}

/// Build an all-hardened path from raw indices.
fn hardened_path(indices: &[u32]) -> Result<DerivationPath, WalletError> {
    let children = indices
        .iter()
        .map(|&i| {
            ChildNumber::from_hardened_idx(i)
                .map_err(|e| WalletError::KeyDerivation(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DerivationPath::from(children))
}

/// A non-hardened child number.
fn normal(index: u32) -> Result<ChildNumber, WalletError> {
    ChildNumber::from_normal_idx(index).map_err(|e| WalletError::KeyDerivation(e.to_string()))
}
