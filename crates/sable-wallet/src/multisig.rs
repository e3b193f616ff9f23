//! Multi-party (m-of-n) signing coordination.
//!
//! Multisig addresses are P2WSH over an `OP_m <keys> OP_n OP_CHECKMULTISIG`
//! witness script. Child public keys at a given `chain/index` are sorted
//! lexicographically before script assembly, so every cosigner computes the
//! same address regardless of the order xpubs were entered.
//!
//! The joint-transaction artifact wraps a standard PSBT: each input carries
//! its `witness_utxo`, witness script and per-cosigner BIP-32 origins, so a
//! signer holding only its own account key can produce a valid signature
//! without re-deriving external data. Signatures accumulate in the PSBT's
//! partial-signature maps; `finalize` assembles witnesses once the
//! threshold is reached.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG;
use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::Hash;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, OutPoint, PublicKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness, absolute, transaction,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::debug;

use sable_core::account::Account;
use sable_core::constants::{DUST_THRESHOLD, MULTISIG_EXPIRY_SECS};
use sable_core::types::{Chain, Utxo};

use crate::builder::estimate_fee;
use crate::error::WalletError;
use crate::keys::KeyDerivationEngine;

/// Derive the sorted child public keys of a cosigner set at `chain/index`.
fn child_pubkeys(
    secp: &Secp256k1<All>,
    cosigner_xpubs: &[Xpub],
    chain: Chain,
    index: u32,
) -> Result<Vec<CompressedPublicKey>, WalletError> {
    let path = relative_path(chain, index)?;
    let mut keys = cosigner_xpubs
        .iter()
        .map(|xpub| {
            xpub.derive_pub(secp, &path)
                .map(|child| child.to_pub())
                .map_err(|e| WalletError::KeyDerivation(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    // Sorted-key policy: address is independent of xpub entry order.
    keys.sort_by_key(|k| k.0.serialize());
    Ok(keys)
}

/// The non-hardened `chain/index` tail below an account xpub.
fn relative_path(chain: Chain, index: u32) -> Result<DerivationPath, WalletError> {
    let children = vec![
        ChildNumber::from_normal_idx(chain.index())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
        ChildNumber::from_normal_idx(index)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
    ];
    Ok(DerivationPath::from(children))
}

/// Assemble the `OP_m <sorted keys> OP_n OP_CHECKMULTISIG` witness script.
fn multisig_script(threshold: u32, sorted_keys: &[CompressedPublicKey]) -> ScriptBuf {
    let mut builder = Builder::new().push_int(threshold as i64);
    for key in sorted_keys {
        builder = builder.push_key(&PublicKey::from(*key));
    }
    builder
        .push_int(sorted_keys.len() as i64)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Derive the P2WSH multisig address and witness script at `chain/index`.
///
/// Every participant computes the same result from the same xpub set,
/// whatever order the xpubs arrive in.
pub fn derive_multisig_address(
    secp: &Secp256k1<All>,
    cosigner_xpubs: &[Xpub],
    threshold: u32,
    network: Network,
    chain: Chain,
    index: u32,
) -> Result<(Address, ScriptBuf), WalletError> {
    if cosigner_xpubs.is_empty() {
        return Err(WalletError::Validation("cosigner set is empty".into()));
    }
    if threshold == 0 || threshold as usize > cosigner_xpubs.len() {
        return Err(WalletError::Validation(format!(
            "invalid threshold {threshold} for {} cosigners",
            cosigner_xpubs.len()
        )));
    }
    let keys = child_pubkeys(secp, cosigner_xpubs, chain, index)?;
    let script = multisig_script(threshold, &keys);
    Ok((Address::p2wsh(&script, network), script))
}

/// Outcome of a finalize attempt.
///
/// `Incomplete` is an explicit "not yet" state, not an error: the artifact
/// is returned unchanged so it can keep circulating among signers.
#[derive(Debug)]
pub enum FinalizeOutcome {
    /// Threshold reached; the fully signed transaction is ready.
    Complete(Transaction),
    /// More signatures needed; keep passing the artifact around.
    Incomplete(PendingMultisigTransaction),
}

/// A joint transaction in flight between cosigners.
///
/// Self-contained and serializable: the PSBT carries everything a signer
/// needs. Callers persist and exchange it out of band (file, QR); expiry is
/// checked lazily against a caller-supplied clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingMultisigTransaction {
    /// The evolving PSBT, base64.
    pub psbt: String,
    /// Signatures required to spend.
    pub required_signatures: u32,
    /// Account-level cosigner xpubs.
    pub cosigner_xpubs: Vec<Xpub>,
    /// Unix time the artifact was created (caller-supplied).
    pub created_at: u64,
    /// Unix time after which the artifact should be discarded.
    pub expires_at: u64,
}

impl PendingMultisigTransaction {
    /// Whether the artifact has outlived its exchange window.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Decode the wrapped PSBT.
    pub fn psbt(&self) -> Result<Psbt, WalletError> {
        let raw = BASE64
            .decode(&self.psbt)
            .map_err(|e| WalletError::Serialization(format!("psbt base64: {e}")))?;
        Psbt::deserialize(&raw).map_err(|e| WalletError::Serialization(format!("psbt: {e}")))
    }

    /// Number of distinct signers that have signed every input.
    pub fn signature_count(&self) -> Result<usize, WalletError> {
        let psbt = self.psbt()?;
        Ok(psbt
            .inputs
            .iter()
            .map(|input| input.partial_sigs.len())
            .min()
            .unwrap_or(0))
    }

    fn replace_psbt(&mut self, psbt: &Psbt) {
        self.psbt = BASE64.encode(psbt.serialize());
    }
}

/// Coordinates multisig address derivation, joint-transaction construction
/// and signature accumulation.
pub struct MultisigCoordinator;

impl MultisigCoordinator {
    /// Derive the multisig receive/change address at an index.
    pub fn derive_address(
        engine: &KeyDerivationEngine,
        account: &Account,
        chain: Chain,
        index: u32,
    ) -> Result<(Address, ScriptBuf), WalletError> {
        match account {
            Account::Multisig {
                threshold,
                cosigner_xpubs,
                ..
            } => derive_multisig_address(
                engine.secp(),
                cosigner_xpubs,
                *threshold,
                engine.network(),
                chain,
                index,
            ),
            Account::Hd { .. } | Account::Imported { .. } => Err(WalletError::Validation(
                "account is not a multisig account".into(),
            )),
        }
    }

    /// Build an unsigned joint transaction spending multisig UTXOs.
    ///
    /// `spend` pairs each selected UTXO with the `(chain, index)` its
    /// address was derived at; the change output, if any, must already be a
    /// fresh internal-chain multisig address. Each PSBT input is populated
    /// with the witness UTXO, witness script, and one BIP-32 origin per
    /// cosigner so any signer can contribute independently.
    #[allow(clippy::too_many_arguments)]
    pub fn build_joint_transaction(
        engine: &KeyDerivationEngine,
        account: &Account,
        spend: &[(Utxo, Chain, u32)],
        recipients: &[(String, u64)],
        fee: u64,
        change_address: Option<(String, u64)>,
        created_at: u64,
    ) -> Result<PendingMultisigTransaction, WalletError> {
        let (threshold, cosigner_xpubs) = match account {
            Account::Multisig {
                threshold,
                cosigner_xpubs,
                ..
            } => (*threshold, cosigner_xpubs.clone()),
            Account::Hd { .. } | Account::Imported { .. } => {
                return Err(WalletError::Validation(
                    "account is not a multisig account".into(),
                ));
            }
        };
        if spend.is_empty() {
            return Err(WalletError::Validation("no inputs selected".into()));
        }
        if recipients.is_empty() {
            return Err(WalletError::Validation("no recipients".into()));
        }

        let mut inputs = Vec::with_capacity(spend.len());
        for (utxo, _, _) in spend {
            inputs.push(TxIn {
                previous_output: OutPoint {
                    txid: utxo.txid,
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            });
        }

        let mut outputs = Vec::with_capacity(recipients.len() + 1);
        for (address, value) in recipients {
            outputs.push(TxOut {
                value: Amount::from_sat(*value),
                script_pubkey: parse_address(address, engine.network())?,
            });
        }
        if let Some((address, value)) = &change_address {
            if *value >= DUST_THRESHOLD {
                outputs.push(TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: parse_address(address, engine.network())?,
                });
            }
        }

        let unsigned_tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx)
            .map_err(|e| WalletError::Serialization(format!("psbt: {e}")))?;

        for (i, (utxo, chain, index)) in spend.iter().enumerate() {
            let (address, script) = derive_multisig_address(
                engine.secp(),
                &cosigner_xpubs,
                threshold,
                engine.network(),
                *chain,
                *index,
            )?;
            if address.to_string() != utxo.address {
                return Err(WalletError::Validation(format!(
                    "input {i} address does not match derivation {chain}/{index}"
                )));
            }
            psbt.inputs[i].witness_utxo = Some(TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: address.script_pubkey(),
            });
            psbt.inputs[i].witness_script = Some(script);
            psbt.inputs[i].sighash_type = Some(EcdsaSighashType::All.into());

            let rel = relative_path(*chain, *index)?;
            for xpub in &cosigner_xpubs {
                let child = xpub
                    .derive_pub(engine.secp(), &rel)
                    .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
                psbt.inputs[i]
                    .bip32_derivation
                    .insert(child.public_key, (xpub.fingerprint(), rel.clone()));
            }
        }

        debug!(
            inputs = spend.len(),
            outputs = recipients.len(),
            fee,
            "built joint transaction"
        );

        let mut pending = PendingMultisigTransaction {
            psbt: String::new(),
            required_signatures: threshold,
            cosigner_xpubs,
            created_at,
            expires_at: created_at.saturating_add(MULTISIG_EXPIRY_SECS),
        };
        pending.replace_psbt(&psbt);
        Ok(pending)
    }

    /// Contribute one cosigner's signatures to every input.
    ///
    /// `signer` is the cosigner's account-level extended private key. The
    /// operation is idempotent per signer: signing twice leaves the
    /// artifact unchanged. Keys outside the cosigner set are rejected.
    pub fn add_signature(
        engine: &KeyDerivationEngine,
        pending: &mut PendingMultisigTransaction,
        signer: &Xpriv,
    ) -> Result<(), WalletError> {
        let secp = engine.secp();
        let signer_xpub = Xpub::from_priv(secp, signer);
        if !pending.cosigner_xpubs.contains(&signer_xpub) {
            return Err(WalletError::UnknownSigner);
        }

        let mut psbt = pending.psbt()?;
        let tx = psbt.unsigned_tx.clone();
        let mut cache = SighashCache::new(&tx);

        for (i, input) in psbt.inputs.iter_mut().enumerate() {
            let witness_script = input
                .witness_script
                .as_ref()
                .ok_or_else(|| WalletError::Validation(format!("input {i} missing script")))?;
            let witness_utxo = input
                .witness_utxo
                .as_ref()
                .ok_or_else(|| WalletError::Validation(format!("input {i} missing utxo")))?;

            // Locate this signer's derivation for the input.
            let origin = input
                .bip32_derivation
                .iter()
                .find(|(_, (fp, _))| *fp == signer_xpub.fingerprint())
                .map(|(pk, (_, path))| (*pk, path.clone()));
            let Some((expected_pk, path)) = origin else {
                continue;
            };
            if input.partial_sigs.contains_key(&PublicKey::new(expected_pk)) {
                continue; // already signed; idempotent
            }

            let child = signer
                .derive_priv(secp, &path)
                .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
            let child_pk = Xpub::from_priv(secp, &child).public_key;
            if child_pk != expected_pk {
                return Err(WalletError::UnknownSigner);
            }

            let sighash = cache
                .p2wsh_signature_hash(
                    i,
                    witness_script,
                    witness_utxo.value,
                    EcdsaSighashType::All,
                )
                .map_err(|e| WalletError::Serialization(format!("sighash: {e}")))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let sig = secp.sign_ecdsa(&msg, &child.private_key);
            input.partial_sigs.insert(
                PublicKey::new(child_pk),
                bitcoin::ecdsa::Signature {
                    signature: sig,
                    sighash_type: EcdsaSighashType::All,
                },
            );
        }

        pending.replace_psbt(&psbt);
        Ok(())
    }

    /// Assemble the final transaction once `m` signatures exist per input.
    ///
    /// Otherwise returns the artifact unchanged inside
    /// [`FinalizeOutcome::Incomplete`].
    pub fn finalize(
        pending: PendingMultisigTransaction,
    ) -> Result<FinalizeOutcome, WalletError> {
        let psbt = pending.psbt()?;
        let required = pending.required_signatures as usize;

        let complete = psbt
            .inputs
            .iter()
            .all(|input| input.partial_sigs.len() >= required);
        if !complete {
            return Ok(FinalizeOutcome::Incomplete(pending));
        }

        let mut tx = psbt.unsigned_tx.clone();
        for (i, input) in psbt.inputs.iter().enumerate() {
            let witness_script = input
                .witness_script
                .as_ref()
                .ok_or_else(|| WalletError::Validation(format!("input {i} missing script")))?;

            // CHECKMULTISIG pops a dummy element, then verifies signatures
            // in script key order.
            let mut witness = Witness::new();
            witness.push::<&[u8]>(&[]);
            let mut pushed = 0usize;
            for key in script_pubkeys(witness_script) {
                if pushed == required {
                    break;
                }
                if let Some(sig) = input.partial_sigs.get(&key) {
                    witness.push(sig.to_vec());
                    pushed += 1;
                }
            }
            if pushed < required {
                return Err(WalletError::Validation(format!(
                    "input {i} signatures do not match script keys"
                )));
            }
            witness.push(witness_script.as_bytes());
            tx.input[i].witness = witness;
        }

        Ok(FinalizeOutcome::Complete(tx))
    }

    /// Fee for a joint transaction at a given rate, using the multisig
    /// input weight.
    pub fn estimate_joint_fee(
        threshold: u32,
        cosigners: usize,
        inputs: usize,
        outputs: usize,
        fee_rate: u64,
    ) -> u64 {
        estimate_fee(
            crate::builder::InputWeight::Multisig {
                m: threshold,
                n: cosigners as u32,
            },
            inputs,
            outputs,
            fee_rate,
        )
    }
}

/// The 33-byte public keys pushed by a multisig witness script, in order.
fn script_pubkeys(script: &ScriptBuf) -> Vec<PublicKey> {
    use bitcoin::blockdata::script::Instruction;
    script
        .instructions()
        .filter_map(|inst| match inst {
            Ok(Instruction::PushBytes(push)) => PublicKey::from_slice(push.as_bytes()).ok(),
            _ => None,
        })
        .collect()
}

/// Parse and network-check an address, returning its script.
fn parse_address(address: &str, network: Network) -> Result<ScriptBuf, WalletError> {
    let parsed = Address::from_str(address)
        .map_err(|e| WalletError::Validation(format!("address {address}: {e}")))?;
    let checked = parsed.require_network(network).map_err(|_| {
        WalletError::WrongNetwork {
            expected: network,
            found: address.to_string(),
        }
    })?;
    Ok(checked.script_pubkey())
}
