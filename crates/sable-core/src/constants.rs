//! Engine constants. All monetary values in satoshis.

/// Maximum number of consecutive unused addresses allowed at the tip of a
/// derivation chain. Deriving past this ceiling risks funds that balance
/// scanners (and this wallet, on restore) will never examine.
///
/// External (receive) and internal (change) chains each carry their own
/// independent ceiling.
///
/// # Examples
///
/// ```
/// use sable_core::constants::GAP_LIMIT;
/// assert_eq!(GAP_LIMIT, 20);
/// ```
pub const GAP_LIMIT: u32 = 20;

/// Outputs below this value cost more to spend than they are worth.
/// Change under the threshold is folded into the fee instead of creating
/// an uneconomical output.
pub const DUST_THRESHOLD: u64 = 546;

/// PBKDF2 iteration count for the session tier: frequent, lower-blast-radius
/// operations (per-account export, per-item encryption).
pub const SESSION_KDF_ITERATIONS: u32 = 100_000;

/// PBKDF2 iteration count for the vault tier: whole-wallet backup, where a
/// single compromise exposes every account. Scope of exposure governs cost
/// of attack.
pub const VAULT_KDF_ITERATIONS: u32 = 600_000;

/// Salt length in bytes (256-bit minimum per the container format).
pub const SALT_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Format tag identifying a Sable backup container.
pub const BACKUP_MAGIC: &str = "BTCWALLET";

/// Current backup container version.
pub const BACKUP_VERSION: u32 = 2;

/// Minimum acceptable backup password length.
pub const MIN_BACKUP_PASSWORD_LEN: usize = 8;

/// Pending multisig transactions expire after this window. Expiry is
/// evaluated lazily by the caller; the engine keeps no clock.
pub const MULTISIG_EXPIRY_SECS: u64 = 7 * 86_400;

/// Number of addresses pre-derived into an xpub contact's rotation cache.
pub const CONTACT_CACHE_SIZE: u32 = 20;
