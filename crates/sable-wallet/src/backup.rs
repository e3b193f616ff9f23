//! Whole-wallet backup export and restore.
//!
//! The container is a plaintext JSON header (format tag, version, network,
//! creation time), the encryption parameters (salt, nonce, iteration
//! count), an opaque encrypted payload, and a SHA-256 checksum of the
//! *encrypted* payload, so tampering is detected cheaply before any key
//! stretching is attempted.
//!
//! Two-layer scheme: the seed entropy inside the payload stays sealed
//! under the session password while the payload as a whole is encrypted
//! under a separate backup password at the vault KDF tier. A leaked backup
//! file never also leaks the day-to-day unlock secret.
//!
//! Import walks a strict state machine:
//! `Unvalidated -> StructurallyValid -> ChecksumVerified -> Decrypted ->
//! SemanticallyValid -> Applied`. Failure at any stage is terminal for the
//! attempt; failure before `Decrypted` never attempts decryption.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::{Network, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, info, warn};

use sable_core::account::Account;
use sable_core::constants::{
    BACKUP_MAGIC, BACKUP_VERSION, MIN_BACKUP_PASSWORD_LEN, NONCE_LEN, SALT_LEN,
};
use sable_core::contact::Contact;
use sable_core::traits::StateRepository;

use crate::error::WalletError;
use crate::vault::{CryptoVault, KdfTier};

/// Plaintext container header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHeader {
    /// Format tag; always [`BACKUP_MAGIC`].
    pub magic: String,
    /// Container version.
    pub version: u32,
    /// Network the wallet state belongs to.
    pub network: String,
    /// Unix time of creation (caller-supplied).
    pub created: u64,
}

/// Parameters needed to re-derive the payload key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionParams {
    /// AEAD algorithm identifier.
    pub algorithm: String,
    /// PBKDF2 iteration count used for the payload key.
    pub iterations: u32,
    /// Salt, base64.
    pub salt: String,
    /// Nonce, base64.
    pub iv: String,
}

/// Checksum of the encrypted payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadChecksum {
    /// Hash algorithm identifier.
    pub algorithm: String,
    /// Hex digest of the encrypted payload bytes.
    pub hash: String,
}

/// The complete backup container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBackup {
    /// Plaintext header.
    pub header: BackupHeader,
    /// Key-derivation and cipher parameters.
    pub encryption: EncryptionParams,
    /// Encrypted payload, base64.
    pub encrypted_payload: String,
    /// Checksum of the encrypted payload.
    pub checksum: PayloadChecksum,
}

/// Non-secret wallet settings carried in the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Network embedded in the payload; must agree with the header.
    pub network: String,
    /// Preferred fee rate in sat/vByte, if the user set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_fee_rate: Option<u64>,
}

/// Optional, independently versioned per-transaction annotations.
///
/// Absence never fails an import; a semantically invalid section is
/// logged and skipped, never fatal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadataSection {
    /// Section version, independent of the container version.
    pub version: u32,
    /// User annotations.
    pub entries: Vec<TxAnnotation>,
}

/// A user note attached to a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAnnotation {
    /// Annotated transaction id, hex.
    pub txid: String,
    /// Short label.
    pub label: String,
    /// Free-form note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The decrypted payload. Private: callers see [`RestoredState`].
#[derive(Serialize, Deserialize)]
struct BackupPayload {
    /// Seed entropy sealed under the session password, base64.
    encrypted_seed: String,
    accounts: Vec<Account>,
    contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction_metadata: Option<TransactionMetadataSection>,
    settings: WalletSettings,
}

/// How far an import attempt progressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportStage {
    /// Nothing checked yet.
    Unvalidated,
    /// Header, parameters and encodings are well-formed.
    StructurallyValid,
    /// Encrypted payload matches its checksum.
    ChecksumVerified,
    /// Payload decrypted and authenticated.
    Decrypted,
    /// Mandatory payload content validated.
    SemanticallyValid,
    /// State written through the repository.
    Applied,
}

/// Wallet state recovered from a backup.
///
/// The seed entropy remains sealed under the session password; unlocking
/// it is the session layer's job, with the user's day-to-day password.
#[derive(Debug)]
pub struct RestoredState {
    /// Session-sealed seed entropy.
    pub encrypted_seed: Vec<u8>,
    /// Restored accounts, counters and flags byte-for-byte as exported.
    pub accounts: Vec<Account>,
    /// Restored contacts.
    pub contacts: Vec<Contact>,
    /// Optional annotations, when present and semantically valid.
    pub transaction_metadata: Option<TransactionMetadataSection>,
    /// Restored settings.
    pub settings: WalletSettings,
}

/// Serializes wallet state into the double-encrypted container and back.
pub struct BackupManager;

impl BackupManager {
    /// Export wallet state as an encrypted container.
    ///
    /// `sealed_seed` is the live session-sealed seed entropy; the session
    /// password is re-verified against it before anything is written. The
    /// backup password must meet the minimum length and differ from the
    /// session password: a leaked backup must not also leak the unlock
    /// secret.
    #[allow(clippy::too_many_arguments)]
    pub fn export(
        session_password: &str,
        backup_password: &str,
        sealed_seed: &[u8],
        accounts: &[Account],
        contacts: &[Contact],
        transaction_metadata: Option<TransactionMetadataSection>,
        network: Network,
        created_at: u64,
    ) -> Result<EncryptedBackup, WalletError> {
        // Re-verify the session password against the live encrypted state.
        CryptoVault::open(session_password.as_bytes(), KdfTier::Session, sealed_seed)?;

        if backup_password.len() < MIN_BACKUP_PASSWORD_LEN {
            return Err(WalletError::Validation(format!(
                "backup password must be at least {MIN_BACKUP_PASSWORD_LEN} characters"
            )));
        }
        if backup_password == session_password {
            return Err(WalletError::Validation(
                "backup password must differ from the session password".into(),
            ));
        }

        let payload = BackupPayload {
            encrypted_seed: BASE64.encode(sealed_seed),
            accounts: accounts.to_vec(),
            contacts: contacts.to_vec(),
            transaction_metadata,
            settings: WalletSettings {
                network: network.to_string(),
                default_fee_rate: None,
            },
        };
        let plaintext = serde_json::to_vec(&payload)
            .map_err(|e| WalletError::Serialization(e.to_string()))?;

        use rand::RngCore;
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let key = CryptoVault::derive_key(
            backup_password.as_bytes(),
            &salt,
            KdfTier::Vault.iterations(),
        );
        let (nonce, ciphertext) = CryptoVault::encrypt(&key, &plaintext)?;

        let backup = EncryptedBackup {
            header: BackupHeader {
                magic: BACKUP_MAGIC.to_string(),
                version: BACKUP_VERSION,
                network: network.to_string(),
                created: created_at,
            },
            encryption: EncryptionParams {
                algorithm: "AES-256-GCM".to_string(),
                iterations: KdfTier::Vault.iterations(),
                salt: BASE64.encode(salt),
                iv: BASE64.encode(nonce),
            },
            encrypted_payload: BASE64.encode(&ciphertext),
            checksum: PayloadChecksum {
                algorithm: "SHA-256".to_string(),
                hash: hex::encode(Sha256::digest(&ciphertext)),
            },
        };

        info!(
            accounts = accounts.len(),
            contacts = contacts.len(),
            "exported wallet backup"
        );
        Ok(backup)
    }

    /// Cheap validation without the password: structure, then checksum.
    ///
    /// Returns the last stage reached. Never derives a key or touches the
    /// ciphertext beyond hashing it.
    pub fn validate(backup: &EncryptedBackup) -> Result<ImportStage, WalletError> {
        let ciphertext = Self::check_structure(backup)?;
        Self::check_checksum(backup, &ciphertext)?;
        Ok(ImportStage::ChecksumVerified)
    }

    /// Decrypt and semantically validate a backup.
    ///
    /// `expected_network` is the network of the wallet context performing
    /// the restore; both the header and the decrypted payload must agree
    /// with it. Optional sections that fail their own validation are
    /// logged and skipped, never fatal. Mandatory state is returned intact
    /// for [`apply`](Self::apply).
    pub fn import(
        backup: &EncryptedBackup,
        backup_password: &str,
        expected_network: Network,
    ) -> Result<RestoredState, WalletError> {
        // Structural and checksum stages: fail fast, fail cheap.
        let ciphertext = Self::check_structure(backup)?;
        Self::check_checksum(backup, &ciphertext)?;

        let salt = BASE64
            .decode(&backup.encryption.salt)
            .map_err(|e| WalletError::Validation(format!("salt base64: {e}")))?;
        let iv = BASE64
            .decode(&backup.encryption.iv)
            .map_err(|e| WalletError::Validation(format!("iv base64: {e}")))?;
        let nonce: [u8; NONCE_LEN] = iv
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::Validation("iv must be 12 bytes".into()))?;

        let key = CryptoVault::derive_key(
            backup_password.as_bytes(),
            &salt,
            backup.encryption.iterations,
        );
        let plaintext = CryptoVault::decrypt(&key, &nonce, &ciphertext)?;
        debug!("backup payload decrypted");

        let payload: BackupPayload = serde_json::from_slice(plaintext.as_bytes())
            .map_err(|e| WalletError::Validation(format!("payload: {e}")))?;

        // Semantic stage: the header must not lie about the payload.
        if payload.settings.network != backup.header.network {
            return Err(WalletError::Validation(format!(
                "header network {} does not match payload network {}",
                backup.header.network, payload.settings.network
            )));
        }
        let payload_network = Network::from_str(&payload.settings.network)
            .map_err(|_| WalletError::Validation("unknown payload network".into()))?;
        if payload_network != expected_network {
            return Err(WalletError::WrongNetwork {
                expected: expected_network,
                found: payload.settings.network.clone(),
            });
        }

        let encrypted_seed = BASE64
            .decode(&payload.encrypted_seed)
            .map_err(|e| WalletError::Validation(format!("encrypted seed base64: {e}")))?;

        let transaction_metadata = payload
            .transaction_metadata
            .and_then(|section| match validate_metadata(&section) {
                Ok(()) => Some(section),
                Err(reason) => {
                    // Optional section: skip the feature, not the import.
                    warn!(%reason, "skipping invalid transaction metadata section");
                    None
                }
            });

        info!(
            accounts = payload.accounts.len(),
            contacts = payload.contacts.len(),
            "backup semantically valid"
        );
        Ok(RestoredState {
            encrypted_seed,
            accounts: payload.accounts,
            contacts: payload.contacts,
            transaction_metadata,
            settings: payload.settings,
        })
    }

    /// Write restored mandatory state through the repository.
    ///
    /// All-or-nothing for accounts and contacts: a name collision with an
    /// existing account aborts before anything is written.
    pub fn apply(
        restored: &RestoredState,
        repository: &dyn StateRepository,
    ) -> Result<ImportStage, WalletError> {
        let mut accounts = repository.load_accounts()?;
        for incoming in &restored.accounts {
            if accounts.iter().any(|a| a.name() == incoming.name()) {
                return Err(WalletError::DuplicateAccount {
                    name: incoming.name().to_string(),
                });
            }
        }
        accounts.extend(restored.accounts.iter().cloned());

        let mut contacts = repository.load_contacts()?;
        for incoming in &restored.contacts {
            if contacts.iter().any(|c| c.name() == incoming.name()) {
                warn!(contact = incoming.name(), "skipping duplicate contact");
                continue;
            }
            contacts.push(incoming.clone());
        }

        repository.save_accounts(&accounts)?;
        repository.save_contacts(&contacts)?;
        info!(
            accounts = restored.accounts.len(),
            contacts = restored.contacts.len(),
            "backup applied"
        );
        Ok(ImportStage::Applied)
    }

    /// Structural stage: header fields, algorithms and encodings.
    fn check_structure(backup: &EncryptedBackup) -> Result<Vec<u8>, WalletError> {
        if backup.header.magic != BACKUP_MAGIC {
            return Err(WalletError::Validation(format!(
                "not a wallet backup (magic {:?})",
                backup.header.magic
            )));
        }
        if backup.header.version == 0 || backup.header.version > BACKUP_VERSION {
            return Err(WalletError::Validation(format!(
                "unsupported backup version {}",
                backup.header.version
            )));
        }
        if backup.encryption.algorithm != "AES-256-GCM" {
            return Err(WalletError::Validation(format!(
                "unsupported cipher {}",
                backup.encryption.algorithm
            )));
        }
        if backup.checksum.algorithm != "SHA-256" {
            return Err(WalletError::Validation(format!(
                "unsupported checksum {}",
                backup.checksum.algorithm
            )));
        }
        Network::from_str(&backup.header.network)
            .map_err(|_| WalletError::Validation("unknown header network".into()))?;

        BASE64
            .decode(&backup.encrypted_payload)
            .map_err(|e| WalletError::Validation(format!("payload base64: {e}")))
    }

    /// Checksum stage: SHA-256 over the encrypted payload bytes.
    fn check_checksum(
        backup: &EncryptedBackup,
        ciphertext: &[u8],
    ) -> Result<(), WalletError> {
        let digest = hex::encode(Sha256::digest(ciphertext));
        if digest != backup.checksum.hash.to_lowercase() {
            return Err(WalletError::Integrity);
        }
        Ok(())
    }
}

/// Semantic validation of the optional annotations section.
fn validate_metadata(section: &TransactionMetadataSection) -> Result<(), String> {
    if section.version == 0 {
        return Err("metadata version 0".into());
    }
    for entry in &section.entries {
        Txid::from_str(&entry.txid).map_err(|e| format!("txid {}: {e}", entry.txid))?;
    }
    Ok(())
}
