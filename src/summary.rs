//! Transaction Summaries
//!
//! Human-readable breakdown of a received PSBT, shown on the confirm
//! screen before anything is signed. Every input needs a UTXO so the fee
//! can be computed; a PSBT that cannot account for its own fee is
//! rejected outright.

use bitcoin::bip32::ChildNumber;
use bitcoin::psbt::Psbt;
use bitcoin::Address;
use thiserror::Error;

use crate::keys::{KeyManager, Network};

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Malformed PSBT: {0}")]
    Malformed(String),

    #[error("Input {index} carries no UTXO, fee cannot be verified")]
    MissingUtxo { index: usize },

    #[error("Outputs exceed inputs")]
    NegativeFee,
}

pub type SummaryResult<T> = Result<T, SummaryError>;

#[derive(Debug, Clone)]
pub struct InputSummary {
    /// `txid:vout` of the spent output
    pub outpoint: String,
    pub value: u64,
    /// Master fingerprints named by the input's derivation metadata
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutputSummary {
    /// Bech32 address, or the raw script in hex when no address form exists
    pub address: String,
    pub value: u64,
    /// Pays back to the matched key's change chain
    pub is_change: bool,
}

/// The key record this transaction spends from.
#[derive(Debug, Clone)]
pub struct MatchedKey {
    pub id: u64,
    pub name: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
pub struct TransactionSummary {
    pub inputs: Vec<InputSummary>,
    pub outputs: Vec<OutputSummary>,
    pub total_in: u64,
    pub total_out: u64,
    pub fee: u64,
    pub matched_key: Option<MatchedKey>,
    /// Original serialized PSBT, passed through to signing on approval
    pub raw: Vec<u8>,
}

/// Break a serialized PSBT down for the confirm screen.
pub fn summarize(
    raw: &[u8],
    keys: &KeyManager,
    network: Network,
) -> SummaryResult<TransactionSummary> {
    let psbt = Psbt::deserialize(raw).map_err(|e| SummaryError::Malformed(e.to_string()))?;
    let tx = &psbt.unsigned_tx;

    let mut inputs = Vec::with_capacity(tx.input.len());
    let mut total_in: u64 = 0;
    for (index, txin) in tx.input.iter().enumerate() {
        let psbt_input = psbt
            .inputs
            .get(index)
            .ok_or(SummaryError::MissingUtxo { index })?;
        let value = input_value(psbt_input, txin).ok_or(SummaryError::MissingUtxo { index })?;
        total_in = total_in.saturating_add(value);
        let fingerprints = psbt_input
            .bip32_derivation
            .values()
            .map(|(fp, _)| fp.to_string())
            .collect();
        inputs.push(InputSummary {
            outpoint: txin.previous_output.to_string(),
            value,
            fingerprints,
        });
    }

    let matched_key = inputs
        .iter()
        .flat_map(|i| i.fingerprints.iter())
        .find_map(|fp| keys.find_by_fingerprint(fp))
        .map(|record| MatchedKey {
            id: record.id,
            name: record.name.clone(),
            fingerprint: record.fingerprint.clone(),
        });

    let mut outputs = Vec::with_capacity(tx.output.len());
    let mut total_out: u64 = 0;
    for (index, txout) in tx.output.iter().enumerate() {
        let value = txout.value.to_sat();
        total_out = total_out.saturating_add(value);
        let address = match Address::from_script(&txout.script_pubkey, network.as_bitcoin()) {
            Ok(addr) => addr.to_string(),
            Err(_) => hex::encode(txout.script_pubkey.as_bytes()),
        };
        let is_change = matched_key
            .as_ref()
            .map(|key| output_is_change(&psbt, index, &key.fingerprint))
            .unwrap_or(false);
        outputs.push(OutputSummary {
            address,
            value,
            is_change,
        });
    }

    let fee = total_in
        .checked_sub(total_out)
        .ok_or(SummaryError::NegativeFee)?;

    Ok(TransactionSummary {
        inputs,
        outputs,
        total_in,
        total_out,
        fee,
        matched_key,
        raw: raw.to_vec(),
    })
}

fn input_value(psbt_input: &bitcoin::psbt::Input, txin: &bitcoin::TxIn) -> Option<u64> {
    if let Some(utxo) = &psbt_input.witness_utxo {
        return Some(utxo.value.to_sat());
    }
    let prev_tx = psbt_input.non_witness_utxo.as_ref()?;
    let prev_out = prev_tx
        .output
        .get(txin.previous_output.vout as usize)?;
    Some(prev_out.value.to_sat())
}

/// An output is change when its derivation metadata names the matched
/// fingerprint on the internal chain (second-to-last path component 1).
fn output_is_change(psbt: &Psbt, index: usize, fingerprint: &str) -> bool {
    let Some(psbt_output) = psbt.outputs.get(index) else {
        return false;
    };
    psbt_output.bip32_derivation.values().any(|(fp, path)| {
        if fp.to_string() != fingerprint {
            return false;
        }
        let components: &[ChildNumber] = path.as_ref();
        components.len() >= 2
            && components[components.len() - 2] == ChildNumber::Normal { index: 1 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive::import_from_phrase;
    use crate::storage::{MemoryBackend, MirroredStore};
    use bitcoin::absolute::LockTime;
    use bitcoin::bip32::{DerivationPath, Fingerprint};
    use bitcoin::hashes::Hash;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
        Txid, Witness,
    };
    use std::str::FromStr;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn manager_with_key() -> (KeyManager, crate::keys::derive::KeyMaterial) {
        let material = import_from_phrase(PHRASE, Network::Test).unwrap();
        let store = MirroredStore::new(Box::new(MemoryBackend::new("primary")), vec![]);
        let mut manager = KeyManager::load(store).unwrap();
        manager.create(&material, "correct-horse").unwrap();
        (manager, material)
    }

    fn p2wpkh_script(xpub: &bitcoin::bip32::Xpub, chain: u32, index: u32) -> ScriptBuf {
        let secp = Secp256k1::new();
        let child = xpub
            .derive_pub(
                &secp,
                &[
                    ChildNumber::from_normal_idx(chain).unwrap(),
                    ChildNumber::from_normal_idx(index).unwrap(),
                ],
            )
            .unwrap();
        let compressed =
            CompressedPublicKey::try_from(bitcoin::PublicKey::new(child.public_key)).unwrap();
        Address::p2wpkh(&compressed, bitcoin::Network::Testnet).script_pubkey()
    }

    fn child_pubkey(
        xpub: &bitcoin::bip32::Xpub,
        chain: u32,
        index: u32,
    ) -> bitcoin::secp256k1::PublicKey {
        let secp = Secp256k1::new();
        xpub.derive_pub(
            &secp,
            &[
                ChildNumber::from_normal_idx(chain).unwrap(),
                ChildNumber::from_normal_idx(index).unwrap(),
            ],
        )
        .unwrap()
        .public_key
    }

    /// One 100k sat input, 60k payment, 39k change on chain 1.
    fn build_psbt(material: &crate::keys::derive::KeyMaterial) -> Vec<u8> {
        let xpub = &material.account_xpub;
        let fingerprint = Fingerprint::from_str(&material.master_fingerprint).unwrap();

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::all_zeros(),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: Amount::from_sat(60_000),
                    script_pubkey: p2wpkh_script(xpub, 0, 9),
                },
                TxOut {
                    value: Amount::from_sat(39_000),
                    script_pubkey: p2wpkh_script(xpub, 1, 0),
                },
            ],
        };
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value: Amount::from_sat(100_000),
            script_pubkey: p2wpkh_script(xpub, 0, 0),
        });
        psbt.inputs[0].bip32_derivation.insert(
            child_pubkey(xpub, 0, 0),
            (
                fingerprint,
                DerivationPath::from_str("m/84'/1'/0'/0/0").unwrap(),
            ),
        );
        psbt.outputs[1].bip32_derivation.insert(
            child_pubkey(xpub, 1, 0),
            (
                fingerprint,
                DerivationPath::from_str("m/84'/1'/0'/1/0").unwrap(),
            ),
        );
        psbt.serialize()
    }

    #[test]
    fn totals_fee_and_change_detection() {
        let (manager, material) = manager_with_key();
        let raw = build_psbt(&material);
        let summary = summarize(&raw, &manager, Network::Test).unwrap();

        assert_eq!(summary.total_in, 100_000);
        assert_eq!(summary.total_out, 99_000);
        assert_eq!(summary.fee, 1_000);
        assert_eq!(summary.inputs.len(), 1);
        assert_eq!(summary.outputs.len(), 2);
        assert!(!summary.outputs[0].is_change);
        assert!(summary.outputs[1].is_change);
        assert!(summary.outputs[0].address.starts_with("tb1"));

        let matched = summary.matched_key.expect("key should match");
        assert_eq!(matched.fingerprint, material.master_fingerprint);
    }

    #[test]
    fn unknown_fingerprint_leaves_no_match() {
        let (_, material) = manager_with_key();
        let raw = build_psbt(&material);
        let empty_store = MirroredStore::new(Box::new(MemoryBackend::new("primary")), vec![]);
        let empty = KeyManager::load(empty_store).unwrap();
        let summary = summarize(&raw, &empty, Network::Test).unwrap();
        assert!(summary.matched_key.is_none());
        // Change cannot be flagged without a matched key
        assert!(!summary.outputs[1].is_change);
    }

    #[test]
    fn missing_utxo_is_rejected() {
        let (manager, material) = manager_with_key();
        let raw = build_psbt(&material);
        let mut psbt = Psbt::deserialize(&raw).unwrap();
        psbt.inputs[0].witness_utxo = None;
        let stripped = psbt.serialize();
        assert!(matches!(
            summarize(&stripped, &manager, Network::Test),
            Err(SummaryError::MissingUtxo { index: 0 })
        ));
    }

    #[test]
    fn outputs_exceeding_inputs_are_rejected() {
        let (manager, material) = manager_with_key();
        let raw = build_psbt(&material);
        let mut psbt = Psbt::deserialize(&raw).unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value: Amount::from_sat(50_000),
            script_pubkey: p2wpkh_script(&material.account_xpub, 0, 0),
        });
        let underfunded = psbt.serialize();
        assert!(matches!(
            summarize(&underfunded, &manager, Network::Test),
            Err(SummaryError::NegativeFee)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let (manager, _) = manager_with_key();
        assert!(matches!(
            summarize(b"not a psbt", &manager, Network::Test),
            Err(SummaryError::Malformed(_))
        ));
    }
}
