//! Key Derivation
//!
//! Produces account-level key material from collected entropy or an
//! imported recovery phrase. The account path is BIP-84 with the coin
//! type selected by network: `m/84'/0'/0'` (main) or `m/84'/1'/0'` (test).
//!
//! SECURITY: seeds and phrases are Zeroizing; the account xpriv in
//! [`KeyMaterial`] exists only until it is encrypted and persisted.

use std::str::FromStr;

use bip39::{Language, Mnemonic};
use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::Secp256k1;
use zeroize::Zeroizing;

use super::{KeyError, KeyResult, Network};
use crate::entropy::SeedEntropy;

/// Every wordlist a recovery phrase is validated against on import.
pub const SUPPORTED_LANGUAGES: [Language; 10] = [
    Language::English,
    Language::SimplifiedChinese,
    Language::TraditionalChinese,
    Language::Czech,
    Language::French,
    Language::Italian,
    Language::Japanese,
    Language::Korean,
    Language::Portuguese,
    Language::Spanish,
];

/// Freshly derived key material, handed to the Key Manager for
/// encryption and persistence. Never stored in this form.
pub struct KeyMaterial {
    /// Recovery phrase for user backup, shown once
    pub phrase: Zeroizing<String>,
    /// Account-level extended private key
    pub account_xpriv: Xpriv,
    /// Account-level extended public key
    pub account_xpub: Xpub,
    /// Master key fingerprint, lowercase hex
    pub master_fingerprint: String,
    pub network: Network,
}

/// Account derivation path for the given network.
pub fn account_path(network: Network) -> DerivationPath {
    let path = match network {
        Network::Main => "m/84'/0'/0'",
        Network::Test => "m/84'/1'/0'",
    };
    DerivationPath::from_str(path).expect("fixed path is valid")
}

/// Derive key material from a finalized 256-bit seed.
///
/// The recovery phrase is built from the first 128 bits of the whitened
/// seed, yielding a 12-word mnemonic in the requested language.
pub fn derive_from_entropy(
    seed: &SeedEntropy,
    network: Network,
    language: Language,
) -> KeyResult<KeyMaterial> {
    let mnemonic = Mnemonic::from_entropy_in(language, &seed.as_bytes()[..16])
        .map_err(|e| KeyError::Mnemonic(e.to_string()))?;
    material_from_mnemonic(&mnemonic, network)
}

/// Import key material from a recovery phrase.
///
/// Accepts 12 or 24 words. The phrase is validated against every
/// supported wordlist, not only a currently selected language; the first
/// wordlist whose checksum accepts it wins.
pub fn import_from_phrase(words: &str, network: Network) -> KeyResult<KeyMaterial> {
    let count = words.split_whitespace().count();
    if count != 12 && count != 24 {
        return Err(KeyError::WordCount(count));
    }

    for language in SUPPORTED_LANGUAGES {
        if let Ok(mnemonic) = Mnemonic::parse_in_normalized(language, words) {
            return material_from_mnemonic(&mnemonic, network);
        }
    }
    Err(KeyError::InvalidPhrase)
}

fn material_from_mnemonic(mnemonic: &Mnemonic, network: Network) -> KeyResult<KeyMaterial> {
    let secp = Secp256k1::new();
    let seed = Zeroizing::new(mnemonic.to_seed(""));

    let master = Xpriv::new_master(network.as_bitcoin(), seed.as_slice())?;
    let master_fingerprint = master.fingerprint(&secp).to_string();

    let account_xpriv = master.derive_priv(&secp, &account_path(network))?;
    let account_xpub = Xpub::from_priv(&secp, &account_xpriv);

    Ok(KeyMaterial {
        phrase: Zeroizing::new(mnemonic.to_string()),
        account_xpriv,
        account_xpub,
        master_fingerprint,
        network,
    })
}
