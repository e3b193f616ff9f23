//! Authenticated symmetric encryption shared by every higher component.
//!
//! Password-based key derivation is PBKDF2-HMAC-SHA256 with two calibrated
//! iteration tiers; the cipher is AES-256-GCM with a fresh 96-bit nonce per
//! operation and a 128-bit tag. Key material and decrypted plaintext live in
//! owned buffers that are zeroized on drop.
//!
//! # Wire format of [`CryptoVault::seal`]
//! ```text
//! salt (32 bytes) || nonce (12 bytes) || ciphertext + auth_tag
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use sable_core::constants::{
    NONCE_LEN, SALT_LEN, SESSION_KDF_ITERATIONS, TAG_LEN, VAULT_KDF_ITERATIONS,
};

use crate::error::WalletError;

/// Minimum sealed payload size (salt + nonce + auth tag).
const MIN_SEALED_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Key-stretching strength tier.
///
/// The asymmetry is deliberate: compromising a whole-wallet backup exposes
/// every account, so the vault tier costs 6x more per guess than the
/// session tier used for single-item operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KdfTier {
    /// Frequent, lower-blast-radius operations (per-account export).
    Session,
    /// Whole-wallet backup.
    Vault,
}

impl KdfTier {
    /// PBKDF2 iteration count for this tier.
    pub fn iterations(&self) -> u32 {
        match self {
            KdfTier::Session => SESSION_KDF_ITERATIONS,
            KdfTier::Vault => VAULT_KDF_ITERATIONS,
        }
    }
}

/// A 256-bit symmetric key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    bytes: [u8; 32],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw key material. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Decrypted plaintext in an owned buffer, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    /// Wrap plaintext bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Borrow the plaintext.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Plaintext length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBytes")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Authenticated encryption primitives.
pub struct CryptoVault;

impl CryptoVault {
    /// Stretch a password into a 256-bit key with PBKDF2-HMAC-SHA256.
    pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> SymmetricKey {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut key);
        SymmetricKey::from_bytes(key)
    }

    /// Encrypt plaintext under a derived key.
    ///
    /// Generates a random 96-bit nonce. The returned ciphertext carries the
    /// 128-bit authentication tag appended.
    pub fn encrypt(
        key: &SymmetricKey,
        plaintext: &[u8],
    ) -> Result<([u8; NONCE_LEN], Vec<u8>), WalletError> {
        use rand::RngCore;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| WalletError::Encryption(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| WalletError::Encryption(e.to_string()))?;

        Ok((nonce_bytes, ciphertext))
    }

    /// Decrypt and authenticate ciphertext.
    ///
    /// Wrong key, corrupted ciphertext and tag mismatch all surface as the
    /// same [`WalletError::Authentication`]; distinguishing them would hand
    /// an attacker an oracle.
    pub fn decrypt(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<SecretBytes, WalletError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| WalletError::Authentication)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| WalletError::Authentication)?;
        Ok(SecretBytes::new(plaintext))
    }

    /// Encrypt plaintext with a password into the self-contained
    /// `salt || nonce || ciphertext+tag` layout.
    ///
    /// A fresh 256-bit salt is drawn per operation.
    pub fn seal(
        password: &[u8],
        tier: KdfTier,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, WalletError> {
        use rand::RngCore;
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let key = Self::derive_key(password, &salt, tier.iterations());
        let (nonce, ciphertext) = Self::encrypt(&key, plaintext)?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt a [`seal`](Self::seal)ed payload.
    ///
    /// Structural defects (payload too short to contain salt, nonce and tag)
    /// are [`WalletError::Validation`]; every authentication failure is the
    /// generic [`WalletError::Authentication`].
    pub fn open(
        password: &[u8],
        tier: KdfTier,
        sealed: &[u8],
    ) -> Result<SecretBytes, WalletError> {
        if sealed.len() < MIN_SEALED_LEN {
            return Err(WalletError::Validation(format!(
                "sealed payload too short: {} < {MIN_SEALED_LEN}",
                sealed.len()
            )));
        }

        let salt = &sealed[..SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&sealed[SALT_LEN..SALT_LEN + NONCE_LEN]);
        let ciphertext = &sealed[SALT_LEN + NONCE_LEN..];

        let key = Self::derive_key(password, salt, tier.iterations());
        Self::decrypt(&key, &nonce, ciphertext)
    }
}
