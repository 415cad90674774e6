//! Passphrase Vault
//!
//! Authenticated encryption for key material at rest:
//! - AES-256-GCM for authenticated encryption
//! - Argon2id for key derivation from the passphrase
//! - Random salt and nonce stored alongside the ciphertext

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Vault errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Passphrase must be at least {0} characters")]
    WeakPassphrase(usize),

    #[error("Wrong passphrase")]
    WrongPassphrase,

    #[error("Malformed vault blob: {0}")]
    MalformedBlob(String),

    #[error("Key derivation failed: {0}")]
    Kdf(String),
}

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Minimum accepted passphrase length.
pub const MIN_PASSPHRASE_LEN: usize = 8;

const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Encrypted secret blob. The only persisted form of a private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Format version for forward compatibility
    pub version: u8,
    /// KDF salt, base64
    pub salt: String,
    /// AEAD nonce, base64
    pub nonce: String,
    /// Ciphertext plus auth tag, base64
    pub ciphertext: String,
    /// Key derivation parameters
    pub kdf: KdfParams,
}

/// Argon2id parameters stored with each blob so older blobs stay
/// decryptable if the defaults are raised later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // 64 MiB memory, 3 iterations, 4 lanes
        Self {
            memory_cost: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Encrypt plaintext under a passphrase-derived key.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> VaultResult<EncryptedBlob> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(VaultError::WeakPassphrase(MIN_PASSPHRASE_LEN));
    }

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let kdf = KdfParams::default();
    let key = derive_key(passphrase, &salt, &kdf)?;

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| VaultError::Kdf(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| VaultError::Kdf(format!("encryption failed: {}", e)))?;

    Ok(EncryptedBlob {
        version: 1,
        salt: b64(&salt),
        nonce: b64(&nonce_bytes),
        ciphertext: b64(&ciphertext),
        kdf,
    })
}

/// Decrypt a blob. Fails with [`VaultError::WrongPassphrase`] when the
/// passphrase is incorrect or the blob has been tampered with.
pub fn decrypt(blob: &EncryptedBlob, passphrase: &str) -> VaultResult<Zeroizing<Vec<u8>>> {
    if blob.version != 1 {
        return Err(VaultError::MalformedBlob(format!(
            "unsupported version {}",
            blob.version
        )));
    }

    let salt = b64_decode(&blob.salt)?;
    let nonce_bytes = b64_decode(&blob.nonce)?;
    let ciphertext = b64_decode(&blob.ciphertext)?;

    if salt.len() != SALT_LEN {
        return Err(VaultError::MalformedBlob("bad salt length".into()));
    }
    if nonce_bytes.len() != NONCE_LEN {
        return Err(VaultError::MalformedBlob("bad nonce length".into()));
    }

    let key = derive_key(passphrase, &salt, &blob.kdf)?;

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| VaultError::Kdf(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| VaultError::WrongPassphrase)?;

    Ok(Zeroizing::new(plaintext))
}

/// Check a passphrase without exposing the plaintext to the caller.
pub fn verify_passphrase(blob: &EncryptedBlob, passphrase: &str) -> bool {
    decrypt(blob, passphrase).is_ok()
}

fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> VaultResult<Zeroizing<[u8; 32]>> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| VaultError::Kdf(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| VaultError::Kdf(e.to_string()))?;
    Ok(key)
}

fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn b64_decode(s: &str) -> VaultResult<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| VaultError::MalformedBlob(format!("invalid base64: {}", e)))
}
