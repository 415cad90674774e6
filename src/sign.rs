//! Signing
//!
//! Partial PSBT signing and BIP-137 message signing with keys derived
//! from a stored account xpriv. Signing never finalizes a transaction;
//! the online counterpart combines and finalizes.

use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Address, Amount, CompressedPublicKey, ScriptBuf};
use thiserror::Error;
use zeroize::Zeroize;

use crate::keys::Network;

#[derive(Error, Debug)]
pub enum SignError {
    #[error("Invalid signing key: {0}")]
    BadKey(String),

    #[error("Malformed PSBT: {0}")]
    Malformed(String),

    #[error("Input {index} carries no UTXO")]
    MissingUtxo { index: usize },

    #[error("No input matches this key")]
    NoMatchingKey,

    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    #[error(transparent)]
    Secp(#[from] bitcoin::secp256k1::Error),

    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
}

pub type SignResult<T> = Result<T, SignError>;

/// A signed text message, ready for display.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    /// 65 bytes: BIP-137 flag followed by the compact signature
    pub signature: Vec<u8>,
    /// P2WPKH address of the signing key
    pub address: String,
    pub message: String,
}

/// BIP-137 flag base for compressed P2WPKH keys.
const P2WPKH_FLAG_BASE: u8 = 39;

/// Sign every PSBT input whose derivation metadata names
/// `master_fingerprint`, deriving the trailing chain/index pair from the
/// account xpriv. Returns the re-serialized, still unfinalized PSBT.
pub fn sign_psbt(
    raw: &[u8],
    account_xpriv: &str,
    master_fingerprint: &str,
    network: Network,
) -> SignResult<Vec<u8>> {
    let account = Xpriv::from_str(account_xpriv).map_err(|e| SignError::BadKey(e.to_string()))?;
    let mut psbt = Psbt::deserialize(raw).map_err(|e| SignError::Malformed(e.to_string()))?;
    let secp = Secp256k1::new();
    let fingerprint = master_fingerprint.to_ascii_lowercase();
    let tx = psbt.unsigned_tx.clone();
    let mut cache = SighashCache::new(&tx);
    let mut signed = 0usize;

    for (index, psbt_input) in psbt.inputs.iter_mut().enumerate() {
        let derivations: Vec<_> = psbt_input
            .bip32_derivation
            .iter()
            .filter(|(_, (fp, _))| fp.to_string() == fingerprint)
            .map(|(pk, (_, path))| (*pk, path.clone()))
            .collect();
        if derivations.is_empty() {
            continue;
        }

        let txin = tx.input.get(index).ok_or(SignError::MissingUtxo { index })?;
        let (value, script_pubkey) =
            spent_output(psbt_input, txin).ok_or(SignError::MissingUtxo { index })?;

        for (expected_pubkey, path) in derivations {
            let Some(pair) = trailing_pair(&path) else {
                continue;
            };
            let mut child = account.derive_priv(&secp, &pair)?;
            let derived_pubkey = child.private_key.public_key(&secp);
            if derived_pubkey != expected_pubkey {
                child.private_key.non_secure_erase();
                continue;
            }

            let sighash = cache
                .p2wpkh_signature_hash(index, &script_pubkey, value, EcdsaSighashType::All)
                .map_err(|e| SignError::Sighash(e.to_string()));
            let sighash = match sighash {
                Ok(h) => h,
                Err(e) => {
                    child.private_key.non_secure_erase();
                    return Err(e);
                }
            };
            let msg = Message::from_digest_slice(sighash.as_byte_array())?;
            let signature = secp.sign_ecdsa(&msg, &child.private_key);
            child.private_key.non_secure_erase();

            psbt_input.partial_sigs.insert(
                bitcoin::PublicKey::new(derived_pubkey),
                bitcoin::ecdsa::Signature::sighash_all(signature),
            );
            signed += 1;
        }
    }

    if signed == 0 {
        return Err(SignError::NoMatchingKey);
    }
    log::info!("Signed {} PSBT input(s) on {:?}", signed, network);
    Ok(psbt.serialize())
}

/// Sign a text message with the receive key at `index`, producing a
/// 65-byte BIP-137 signature and the corresponding P2WPKH address.
pub fn sign_message(
    account_xpriv: &str,
    index: u32,
    message: &str,
    network: Network,
) -> SignResult<SignedMessage> {
    let account = Xpriv::from_str(account_xpriv).map_err(|e| SignError::BadKey(e.to_string()))?;
    let secp = Secp256k1::new();
    let pair = [
        ChildNumber::from_normal_idx(0).map_err(SignError::Bip32)?,
        ChildNumber::from_normal_idx(index).map_err(SignError::Bip32)?,
    ];
    let mut child = account.derive_priv(&secp, &pair)?;

    let digest = signed_message_digest(message.as_bytes());
    let msg = Message::from_digest_slice(&digest)?;
    let recoverable = secp.sign_ecdsa_recoverable(&msg, &child.private_key);
    let pubkey = child.private_key.public_key(&secp);
    child.private_key.non_secure_erase();

    let (recovery_id, compact) = recoverable.serialize_compact();
    let mut signature = Vec::with_capacity(65);
    signature.push(P2WPKH_FLAG_BASE + recovery_id.to_i32() as u8);
    signature.extend_from_slice(&compact);

    let compressed = CompressedPublicKey::try_from(bitcoin::PublicKey::new(pubkey))
        .map_err(|e| SignError::BadKey(e.to_string()))?;
    let address = Address::p2wpkh(&compressed, network.as_bitcoin()).to_string();

    Ok(SignedMessage {
        signature,
        address,
        message: message.to_string(),
    })
}

/// Double SHA-256 of the Bitcoin Signed Message preimage.
fn signed_message_digest(message: &[u8]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(message.len() + 32);
    preimage.extend_from_slice(b"\x18Bitcoin Signed Message:\n");
    push_varint(&mut preimage, message.len() as u64);
    preimage.extend_from_slice(message);
    let digest = sha256d::Hash::hash(&preimage).to_byte_array();
    preimage.zeroize();
    digest
}

fn push_varint(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

fn spent_output(
    psbt_input: &bitcoin::psbt::Input,
    txin: &bitcoin::TxIn,
) -> Option<(Amount, ScriptBuf)> {
    if let Some(utxo) = &psbt_input.witness_utxo {
        return Some((utxo.value, utxo.script_pubkey.clone()));
    }
    let prev_tx = psbt_input.non_witness_utxo.as_ref()?;
    let prev_out = prev_tx.output.get(txin.previous_output.vout as usize)?;
    Some((prev_out.value, prev_out.script_pubkey.clone()))
}

/// Last two unhardened components of a full derivation path.
fn trailing_pair(path: &DerivationPath) -> Option<[ChildNumber; 2]> {
    let components: &[ChildNumber] = path.as_ref();
    if components.len() < 2 {
        return None;
    }
    let chain = components[components.len() - 2];
    let index = components[components.len() - 1];
    match (chain, index) {
        (ChildNumber::Normal { .. }, ChildNumber::Normal { .. }) => Some([chain, index]),
        _ => None,
    }
}
