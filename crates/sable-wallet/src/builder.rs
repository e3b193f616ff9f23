//! Privacy-preserving transaction construction.
//!
//! Coin selection is deliberately non-deterministic: the candidate set is
//! uniformly shuffled before a sufficiency pass accumulates inputs, so
//! chain observers cannot fingerprint the wallet by its selection order.
//! Change below the dust threshold folds into the fee. The change address
//! is supplied by the caller and must be a freshly issued internal-chain
//! address; derivation failures propagate instead of degrading to a reused
//! address.

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, absolute,
    transaction,
};
use bitcoin::script::PushBytesBuf;
use rand::Rng;
use rand::seq::SliceRandom;
use std::str::FromStr;
use tracing::debug;

use sable_core::constants::DUST_THRESHOLD;
use sable_core::types::{AddressKind, Chain, Utxo};

use crate::error::WalletError;
use crate::keys::KeyDerivationEngine;

/// Fixed transaction overhead in vbytes (version, locktime, counts,
/// segwit marker/flag).
const OVERHEAD_VBYTES: u64 = 11;

/// Conservative per-output estimate in vbytes.
const OUTPUT_VBYTES: u64 = 34;

/// Input weight class for fee estimation. Witness-discounted kinds carry
/// their discounted virtual size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputWeight {
    /// P2PKH: 148 vbytes.
    Legacy,
    /// P2SH-P2WPKH: 91 vbytes.
    NestedSegwit,
    /// P2WPKH: 68 vbytes.
    NativeSegwit,
    /// P2WSH m-of-n CHECKMULTISIG.
    Multisig {
        /// Required signatures.
        m: u32,
        /// Cosigner count.
        n: u32,
    },
}

impl InputWeight {
    /// Estimated virtual size of one input of this class.
    pub fn input_vbytes(&self) -> u64 {
        match self {
            InputWeight::Legacy => 148,
            InputWeight::NestedSegwit => 91,
            InputWeight::NativeSegwit => 68,
            InputWeight::Multisig { m, n } => {
                // outpoint + empty script_sig + sequence, plus the witness
                // (dummy, m signatures, script) at a quarter weight.
                let witness = 2 + 73 * u64::from(*m) + 4 + 34 * u64::from(*n);
                41 + witness.div_ceil(4)
            }
        }
    }
}

impl From<AddressKind> for InputWeight {
    fn from(kind: AddressKind) -> Self {
        match kind {
            AddressKind::Legacy => InputWeight::Legacy,
            AddressKind::NestedSegwit => InputWeight::NestedSegwit,
            AddressKind::NativeSegwit => InputWeight::NativeSegwit,
        }
    }
}

/// Fee for a transaction shape at a fee rate in sat/vByte.
pub fn estimate_fee(weight: InputWeight, inputs: usize, outputs: usize, fee_rate: u64) -> u64 {
    let vbytes = OVERHEAD_VBYTES
        + weight.input_vbytes() * inputs as u64
        + OUTPUT_VBYTES * outputs as u64;
    vbytes * fee_rate
}

/// A candidate UTXO annotated with the derivation of its address.
#[derive(Clone, Debug)]
pub struct OwnedUtxo {
    /// The spendable output.
    pub utxo: Utxo,
    /// Branch its address was issued on.
    pub chain: Chain,
    /// Index its address was issued at.
    pub index: u32,
}

/// A transaction recipient: address and amount in satoshis.
#[derive(Clone, Debug)]
pub struct Recipient {
    /// Destination address.
    pub address: String,
    /// Amount in satoshis.
    pub amount: u64,
}

/// Result of coin selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Chosen inputs, in shuffled order.
    pub chosen: Vec<Utxo>,
    /// Sum of chosen input values.
    pub total: u64,
    /// Fee in satoshis (includes any dust folded in).
    pub fee: u64,
    /// Change in satoshis; zero when folded into the fee.
    pub change: u64,
}

/// An unsigned transaction with the data needed to sign each input.
#[derive(Debug)]
pub struct UnsignedTransaction {
    /// The transaction with empty signatures.
    pub tx: Transaction,
    /// The selection it was built from.
    pub selection: Selection,
    /// Per-input derivation (chain, index) for signing-key lookup.
    pub input_paths: Vec<(Chain, u32)>,
}

/// Randomized, fee-aware coin selection and transaction assembly.
pub struct PrivacyTransactionBuilder;

impl PrivacyTransactionBuilder {
    /// Select inputs covering `target` plus fees at `fee_rate`.
    ///
    /// Candidates are uniformly shuffled, then accumulated until the
    /// running total covers the target plus the fee for the inputs taken
    /// so far. `outputs` is the recipient count; a change output is priced
    /// in, then folded into the fee if it lands under the dust threshold.
    pub fn select_utxos<R: Rng>(
        available: &[Utxo],
        target: u64,
        fee_rate: u64,
        weight: InputWeight,
        outputs: usize,
        rng: &mut R,
    ) -> Result<Selection, WalletError> {
        if target == 0 {
            return Err(WalletError::Validation("target must be non-zero".into()));
        }

        let mut candidates: Vec<Utxo> = available.to_vec();
        candidates.shuffle(rng);

        let mut chosen = Vec::new();
        let mut total: u64 = 0;
        for utxo in candidates {
            total = total.saturating_add(utxo.value);
            chosen.push(utxo);

            // Price in the change output until we know it is dust.
            let fee = estimate_fee(weight, chosen.len(), outputs + 1, fee_rate);
            let needed = target.saturating_add(fee);
            if total >= needed {
                let change = total - needed;
                if change < DUST_THRESHOLD {
                    // Uneconomical output: fold it into the fee.
                    return Ok(Selection {
                        chosen,
                        total,
                        fee: total - target,
                        change: 0,
                    });
                }
                return Ok(Selection {
                    chosen,
                    total,
                    fee,
                    change,
                });
            }
        }

        let fee = estimate_fee(weight, chosen.len().max(1), outputs + 1, fee_rate);
        Err(WalletError::InsufficientFunds {
            have: total,
            need: target.saturating_add(fee),
        })
    }

    /// Build an unsigned transaction.
    ///
    /// `change_address` must be a freshly issued, never-used internal-chain
    /// address; this function trusts the caller obtained it from the
    /// address book and never substitutes a fallback.
    pub fn build_transaction<R: Rng>(
        engine: &KeyDerivationEngine,
        candidates: &[OwnedUtxo],
        recipients: &[Recipient],
        fee_rate: u64,
        weight: InputWeight,
        change_address: &str,
        rng: &mut R,
    ) -> Result<UnsignedTransaction, WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::Validation("no recipients".into()));
        }
        let mut target: u64 = 0;
        for r in recipients {
            if r.amount == 0 {
                return Err(WalletError::Validation(format!(
                    "zero amount for {}",
                    r.address
                )));
            }
            target = target
                .checked_add(r.amount)
                .ok_or_else(|| WalletError::Validation("total amount overflow".into()))?;
        }

        let utxos: Vec<Utxo> = candidates.iter().map(|o| o.utxo.clone()).collect();
        let selection = Self::select_utxos(&utxos, target, fee_rate, weight, recipients.len(), rng)?;

        let mut inputs = Vec::with_capacity(selection.chosen.len());
        let mut input_paths = Vec::with_capacity(selection.chosen.len());
        for utxo in &selection.chosen {
            let owned = candidates
                .iter()
                .find(|o| o.utxo.txid == utxo.txid && o.utxo.vout == utxo.vout)
                .ok_or_else(|| {
                    WalletError::Validation("selected input missing derivation".into())
                })?;
            inputs.push(TxIn {
                previous_output: OutPoint {
                    txid: utxo.txid,
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            });
            input_paths.push((owned.chain, owned.index));
        }

        let mut outputs = Vec::with_capacity(recipients.len() + 1);
        for r in recipients {
            outputs.push(TxOut {
                value: Amount::from_sat(r.amount),
                script_pubkey: script_for(&r.address, engine)?,
            });
        }
        if selection.change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(selection.change),
                script_pubkey: script_for(change_address, engine)?,
            });
        }

        debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            fee = selection.fee,
            change = selection.change,
            "built unsigned transaction"
        );

        Ok(UnsignedTransaction {
            tx: Transaction {
                version: transaction::Version::TWO,
                lock_time: absolute::LockTime::ZERO,
                input: inputs,
                output: outputs,
            },
            selection,
            input_paths,
        })
    }

    /// Sign every input of an unsigned single-sig transaction.
    pub fn sign(
        engine: &KeyDerivationEngine,
        kind: AddressKind,
        account_index: u32,
        unsigned: UnsignedTransaction,
    ) -> Result<Transaction, WalletError> {
        let mut tx = unsigned.tx;
        let prevouts: Vec<&Utxo> = unsigned.selection.chosen.iter().collect();

        for (i, (chain, index)) in unsigned.input_paths.iter().enumerate() {
            let path = engine
                .account_path(kind, account_index)?
                .child(normal(chain.index())?)
                .child(normal(*index)?);
            let keypair = engine.derive_child(&path)?;
            let value = Amount::from_sat(prevouts[i].value);

            let (script_sig, witness) = match kind {
                AddressKind::NativeSegwit => {
                    let script_pubkey = engine
                        .address_for_key(kind, &keypair.public)
                        .script_pubkey();
                    let sig = segwit_sig(&tx, i, &script_pubkey, value, engine, &keypair)?;
                    (ScriptBuf::new(), p2wpkh_witness(&sig, &keypair))
                }
                AddressKind::NestedSegwit => {
                    let redeem = ScriptBuf::new_p2wpkh(&keypair.public.wpubkey_hash());
                    let sig = segwit_sig(&tx, i, &redeem, value, engine, &keypair)?;
                    let mut script_sig = ScriptBuf::new();
                    script_sig.push_slice(push_bytes(redeem.as_bytes().to_vec())?);
                    (script_sig, p2wpkh_witness(&sig, &keypair))
                }
                AddressKind::Legacy => {
                    let script_pubkey = engine
                        .address_for_key(kind, &keypair.public)
                        .script_pubkey();
                    let sighash = SighashCache::new(&tx)
                        .legacy_signature_hash(
                            i,
                            &script_pubkey,
                            EcdsaSighashType::All.to_u32(),
                        )
                        .map_err(|e| WalletError::Serialization(format!("sighash: {e}")))?;
                    let msg = Message::from_digest(sighash.to_byte_array());
                    let sig = engine.secp().sign_ecdsa(&msg, &keypair.private.inner);
                    let der_sig = bitcoin::ecdsa::Signature {
                        signature: sig,
                        sighash_type: EcdsaSighashType::All,
                    };
                    let mut script_sig = ScriptBuf::new();
                    script_sig.push_slice(push_bytes(der_sig.to_vec())?);
                    script_sig.push_slice(push_bytes(keypair.public.0.serialize().to_vec())?);
                    (script_sig, Witness::default())
                }
            };
            tx.input[i].script_sig = script_sig;
            tx.input[i].witness = witness;
        }

        Ok(tx)
    }
}

/// ECDSA signature over the BIP-143 sighash of a segwit v0 input.
fn segwit_sig(
    tx: &Transaction,
    input_index: usize,
    script_code: &ScriptBuf,
    value: Amount,
    engine: &KeyDerivationEngine,
    keypair: &crate::keys::KeyPair,
) -> Result<bitcoin::ecdsa::Signature, WalletError> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .p2wpkh_signature_hash(input_index, script_code, value, EcdsaSighashType::All)
        .map_err(|e| WalletError::Serialization(format!("sighash: {e}")))?;
    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = engine.secp().sign_ecdsa(&msg, &keypair.private.inner);
    Ok(bitcoin::ecdsa::Signature {
        signature: sig,
        sighash_type: EcdsaSighashType::All,
    })
}

/// The two-element `[signature, pubkey]` witness of a P2WPKH spend.
fn p2wpkh_witness(sig: &bitcoin::ecdsa::Signature, keypair: &crate::keys::KeyPair) -> Witness {
    let mut witness = Witness::new();
    witness.push(sig.to_vec());
    witness.push(keypair.public.0.serialize());
    witness
}

/// Parse an address for the engine's network and return its script.
fn script_for(address: &str, engine: &KeyDerivationEngine) -> Result<ScriptBuf, WalletError> {
    let parsed = Address::from_str(address)
        .map_err(|e| WalletError::Validation(format!("address {address}: {e}")))?;
    let checked = parsed
        .require_network(engine.network())
        .map_err(|_| WalletError::WrongNetwork {
            expected: engine.network(),
            found: address.to_string(),
        })?;
    Ok(checked.script_pubkey())
}

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf, WalletError> {
    PushBytesBuf::try_from(bytes)
        .map_err(|_| WalletError::Serialization("script push too long".into()))
}

fn normal(index: u32) -> Result<bitcoin::bip32::ChildNumber, WalletError> {
    bitcoin::bip32::ChildNumber::from_normal_idx(index)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))
}
