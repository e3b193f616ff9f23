//! Per-account export files.
//!
//! A single-account export carries human-readable metadata (name, kind,
//! first address) plus the key material: either a raw WIF string (explicit
//! opt-in, imported accounts only) or an encrypted blob formatted
//! `salt:iv:auth_tag:ciphertext` with every field base64. Blobs use the
//! session KDF tier; the blast radius is one account, not the wallet.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use sable_core::account::Account;
use sable_core::constants::{NONCE_LEN, SALT_LEN, TAG_LEN};
use sable_core::types::Chain;

use crate::error::WalletError;
use crate::keys::KeyDerivationEngine;
use crate::vault::{CryptoVault, KdfTier, SecretBytes};

/// Key material inside an account export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ExportPayload {
    /// Unencrypted WIF. Only written when the caller explicitly opts in.
    PlainWif {
        /// The WIF string.
        wif: String,
    },
    /// Session-tier encrypted WIF as `salt:iv:auth_tag:ciphertext`.
    Encrypted {
        /// The formatted blob.
        blob: String,
    },
}

/// A single-account export file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountExport {
    /// Account display name.
    pub name: String,
    /// Account kind, human-readable.
    pub kind: String,
    /// The account's first (or only) address, for eyeball verification.
    pub first_address: Option<String>,
    /// The key material.
    pub payload: ExportPayload,
}

/// Encrypt a secret into the `salt:iv:auth_tag:ciphertext` blob format.
pub fn seal_blob(password: &str, plaintext: &[u8]) -> Result<String, WalletError> {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let key = CryptoVault::derive_key(
        password.as_bytes(),
        &salt,
        KdfTier::Session.iterations(),
    );
    let (nonce, mut ciphertext) = CryptoVault::encrypt(&key, plaintext)?;

    // AES-GCM appends the tag; the blob format carries it separately.
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);
    Ok(format!(
        "{}:{}:{}:{}",
        BASE64.encode(salt),
        BASE64.encode(nonce),
        BASE64.encode(&tag),
        BASE64.encode(&ciphertext)
    ))
}

/// Decrypt a `salt:iv:auth_tag:ciphertext` blob.
pub fn open_blob(password: &str, blob: &str) -> Result<SecretBytes, WalletError> {
    let parts: Vec<&str> = blob.split(':').collect();
    if parts.len() != 4 {
        return Err(WalletError::Validation(format!(
            "blob must have 4 fields, got {}",
            parts.len()
        )));
    }
    let decode = |field: &str, what: &str| {
        BASE64
            .decode(field)
            .map_err(|e| WalletError::Validation(format!("blob {what}: {e}")))
    };
    let salt = decode(parts[0], "salt")?;
    let iv = decode(parts[1], "iv")?;
    let tag = decode(parts[2], "auth_tag")?;
    let mut ciphertext = decode(parts[3], "ciphertext")?;

    if salt.len() != SALT_LEN || tag.len() != TAG_LEN {
        return Err(WalletError::Validation("blob field lengths invalid".into()));
    }
    let nonce: [u8; NONCE_LEN] = iv
        .as_slice()
        .try_into()
        .map_err(|_| WalletError::Validation("blob iv must be 12 bytes".into()))?;

    ciphertext.extend_from_slice(&tag);
    let key = CryptoVault::derive_key(password.as_bytes(), &salt, KdfTier::Session.iterations());
    CryptoVault::decrypt(&key, &nonce, &ciphertext)
}

/// Export one account's key material.
///
/// HD accounts export the key at `external/0` as an encrypted blob.
/// Imported accounts re-seal their stored key; `reveal_plain` opts into a
/// raw WIF instead. Multisig accounts hold no single exportable key.
pub fn export_account(
    engine: &KeyDerivationEngine,
    account: &Account,
    session_password: &str,
    reveal_plain: bool,
) -> Result<AccountExport, WalletError> {
    match account {
        Account::Hd {
            name,
            kind,
            account_index,
            addresses,
        } => {
            let (first_address, path) =
                engine.derive_address(*kind, *account_index, Chain::External, 0)?;
            let keypair = engine.derive_child(&path)?;
            let mut wif = engine.encode_wif(&keypair.private.inner, true);
            let blob = seal_blob(session_password, wif.as_bytes())?;
            wif.zeroize();
            Ok(AccountExport {
                name: name.clone(),
                kind: kind.to_string(),
                first_address: Some(
                    addresses
                        .chain(Chain::External)
                        .entries
                        .first()
                        .map(|e| e.address.clone())
                        .unwrap_or(first_address),
                ),
                payload: ExportPayload::Encrypted { blob },
            })
        }
        Account::Imported {
            name,
            address,
            encrypted_wif,
            ..
        } => {
            let sealed = BASE64
                .decode(encrypted_wif)
                .map_err(|e| WalletError::Validation(format!("stored key: {e}")))?;
            let wif = CryptoVault::open(session_password.as_bytes(), KdfTier::Session, &sealed)?;
            let payload = if reveal_plain {
                ExportPayload::PlainWif {
                    wif: String::from_utf8_lossy(wif.as_bytes()).into_owned(),
                }
            } else {
                ExportPayload::Encrypted {
                    blob: seal_blob(session_password, wif.as_bytes())?,
                }
            };
            Ok(AccountExport {
                name: name.clone(),
                kind: "imported".into(),
                first_address: Some(address.clone()),
                payload,
            })
        }
        Account::Multisig { .. } => Err(WalletError::Validation(
            "multisig accounts have no single exportable key".into(),
        )),
    }
}

/// Import an export file as a fresh imported account.
///
/// The WIF is network-validated by the engine before any key material is
/// used, then sealed under the session password for storage.
pub fn import_as_account(
    engine: &KeyDerivationEngine,
    export: &AccountExport,
    session_password: &str,
) -> Result<Account, WalletError> {
    let wif = match &export.payload {
        ExportPayload::PlainWif { wif } => SecretBytes::new(wif.clone().into_bytes()),
        ExportPayload::Encrypted { blob } => open_blob(session_password, blob)?,
    };
    let wif_str = std::str::from_utf8(wif.as_bytes())
        .map_err(|_| WalletError::Validation("WIF is not valid UTF-8".into()))?;

    // Rejects cross-network keys before anything else happens.
    let (secret, compressed) = engine.decode_wif(wif_str)?;

    let address = {
        let public = bitcoin::CompressedPublicKey(
            bitcoin::secp256k1::PublicKey::from_secret_key(engine.secp(), &secret),
        );
        engine.address_for_key(
            if compressed {
                sable_core::types::AddressKind::NativeSegwit
            } else {
                sable_core::types::AddressKind::Legacy
            },
            &public,
        )
    };

    let sealed = CryptoVault::seal(
        session_password.as_bytes(),
        KdfTier::Session,
        wif.as_bytes(),
    )?;
    Ok(Account::Imported {
        name: export.name.clone(),
        address: address.to_string(),
        compressed,
        encrypted_wif: BASE64.encode(sealed),
    })
}
