//! Key Management
//!
//! Durable key records and the operations around them: derivation from
//! collected entropy or an imported recovery phrase, passphrase-encrypted
//! persistence, fingerprint lookup, and lifecycle (rename/delete/online
//! tracking).
//!
//! SECURITY: only the encrypted secret blob is ever persisted. Decrypted
//! key material is handed out wrapped in `Zeroizing` and must not outlive
//! the signing operation that requested it.

pub mod derive;
pub mod manager;

pub use derive::{derive_from_entropy, import_from_phrase, KeyMaterial, SUPPORTED_LANGUAGES};
pub use manager::KeyManager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;
use crate::vault::{EncryptedBlob, VaultError};

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Recovery phrase must have 12 or 24 words, got {0}")]
    WordCount(usize),

    #[error("Recovery phrase is not valid in any supported language")]
    InvalidPhrase,

    #[error("Invalid mnemonic: {0}")]
    Mnemonic(String),

    #[error("BIP32 error: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    #[error("No key record with id {0}")]
    UnknownRecord(u64),

    #[error("Corrupt key store: {0}")]
    CorruptStore(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Chain namespace a key was derived for. A main-network key must never
/// sign test-network structures or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
}

impl Network {
    /// BIP-44 coin type segment for the account path.
    pub fn coin_type(self) -> u32 {
        match self {
            Network::Main => 0,
            Network::Test => 1,
        }
    }

    pub fn as_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Main => bitcoin::Network::Bitcoin,
            Network::Test => bitcoin::Network::Testnet,
        }
    }
}

/// The durable unit of identity. Everything needed to watch addresses and
/// match incoming transactions lives in cleartext; the account private key
/// exists only inside `encrypted_secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Locally unique, assigned at creation, never reused
    pub id: u64,
    /// User-editable label
    pub name: String,
    /// Vault ciphertext of the account-level extended private key
    pub encrypted_secret: EncryptedBlob,
    /// Account-level extended public key, base58
    pub public_xpub: String,
    /// Master key fingerprint, 8 lowercase hex chars. This is the
    /// identifier PSBT derivation metadata carries.
    pub fingerprint: String,
    pub network: Network,
    pub created_at: DateTime<Utc>,
    /// Set whenever the host reports network connectivity
    pub last_online_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// True when the host has been online since this key was created,
    /// meaning the key can no longer be considered strictly air-gapped.
    pub fn possibly_exposed(&self) -> bool {
        match self.last_online_at {
            Some(online) => online > self.created_at,
            None => false,
        }
    }
}
