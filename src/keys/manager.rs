//! Key Record Lifecycle
//!
//! Owns the durable list of [`KeyRecord`]s on top of the mirrored store:
//! create (encrypt + persist), list, rename, delete, fingerprint lookup,
//! passphrase decryption, and online-signal timestamping.

use chrono::{DateTime, Utc};
use log::{debug, info};
use zeroize::Zeroizing;

use super::{KeyError, KeyMaterial, KeyRecord, KeyResult};
use crate::storage::MirroredStore;
use crate::vault;

pub struct KeyManager {
    store: MirroredStore,
    records: Vec<KeyRecord>,
    next_id: u64,
}

impl KeyManager {
    /// Load the record list from storage. An empty store yields an empty
    /// manager; a present-but-unparseable document is an error rather
    /// than silent data loss.
    pub fn load(mut store: MirroredStore) -> KeyResult<Self> {
        let records: Vec<KeyRecord> = match store.load()? {
            Some(doc) => serde_json::from_str(&doc)
                .map_err(|e| KeyError::CorruptStore(e.to_string()))?,
            None => Vec::new(),
        };
        let next_id = records.iter().map(|r| r.id).max().map_or(1, |m| m + 1);
        debug!("loaded {} key record(s)", records.len());
        Ok(Self {
            store,
            records,
            next_id,
        })
    }

    /// Encrypt freshly derived key material and append it as a new
    /// record. Returns the assigned id.
    pub fn create(&mut self, material: &KeyMaterial, passphrase: &str) -> KeyResult<u64> {
        let secret = Zeroizing::new(material.account_xpriv.to_string());
        let encrypted_secret = vault::encrypt(secret.as_bytes(), passphrase)?;

        let id = self.next_id;
        self.next_id += 1;

        self.records.push(KeyRecord {
            id,
            name: format!("Key #{}", id),
            encrypted_secret,
            public_xpub: material.account_xpub.to_string(),
            fingerprint: material.master_fingerprint.to_lowercase(),
            network: material.network,
            created_at: Utc::now(),
            last_online_at: None,
        });
        self.persist()?;
        info!("created key record {}", id);
        Ok(id)
    }

    pub fn list(&self) -> &[KeyRecord] {
        &self.records
    }

    pub fn get(&self, id: u64) -> Option<&KeyRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// First record matching a master-key fingerprint (lowercase hex).
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&KeyRecord> {
        let wanted = fingerprint.to_lowercase();
        self.records.iter().find(|r| r.fingerprint == wanted)
    }

    pub fn rename(&mut self, id: u64, name: impl Into<String>) -> KeyResult<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(KeyError::UnknownRecord(id))?;
        record.name = name.into();
        self.persist()
    }

    /// Remove a record from every storage layer. The reduced list must
    /// land on all backends; otherwise the delete is reported incomplete
    /// so the caller does not treat the key as gone.
    pub fn delete(&mut self, id: u64) -> KeyResult<()> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            return Err(KeyError::UnknownRecord(id));
        }
        if self.records.is_empty() {
            self.store.wipe()?;
        } else {
            let doc = self.serialize()?;
            self.store.save_strict(&doc)?;
        }
        info!("deleted key record {}", id);
        Ok(())
    }

    /// Decrypt one record's account xpriv with the given passphrase.
    pub fn decrypt_secret(&self, id: u64, passphrase: &str) -> KeyResult<Zeroizing<String>> {
        let record = self.get(id).ok_or(KeyError::UnknownRecord(id))?;
        let plaintext = vault::decrypt(&record.encrypted_secret, passphrase)?;
        let s = String::from_utf8(plaintext.to_vec())
            .map_err(|_| KeyError::CorruptStore("secret is not valid base58 text".into()))?;
        Ok(Zeroizing::new(s))
    }

    /// Record that the host device was seen online. Applied to every
    /// record; the exposure flag compares this against creation time.
    pub fn mark_online(&mut self, at: DateTime<Utc>) -> KeyResult<()> {
        for record in &mut self.records {
            record.last_online_at = Some(at);
        }
        self.persist()
    }

    fn serialize(&self) -> KeyResult<String> {
        serde_json::to_string(&self.records).map_err(|e| KeyError::CorruptStore(e.to_string()))
    }

    fn persist(&mut self) -> KeyResult<()> {
        let doc = self.serialize()?;
        self.store.save(&doc)?;
        Ok(())
    }
}
