//! Redundant Key-Record Storage
//!
//! One primary backend plus N mirrors. Writes fan out to every backend,
//! reads come from the primary with mirrors used only to restore an empty
//! primary, and deletion must succeed on every backend before it counts.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use log::{debug, warn};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    #[error("Delete incomplete, still present on: {0}")]
    DeleteIncomplete(String),

    #[error("Corrupt store content: {0}")]
    Corrupt(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A single persistence backend holding one opaque document.
pub trait StorageBackend: Send {
    /// Stable backend name for diagnostics.
    fn name(&self) -> &str;

    /// Current document, or `None` when the backend is empty.
    fn read(&self) -> StorageResult<Option<String>>;

    fn write(&mut self, document: &str) -> StorageResult<()>;

    /// Remove the document entirely. Clearing an empty backend succeeds.
    fn clear(&mut self) -> StorageResult<()>;
}

/// In-memory backend, also the test double.
#[derive(Default)]
pub struct MemoryBackend {
    name: String,
    slot: Option<String>,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: None,
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> StorageResult<Option<String>> {
        Ok(self.slot.clone())
    }

    fn write(&mut self, document: &str) -> StorageResult<()> {
        self.slot = Some(document.to_string());
        Ok(())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.slot = None;
        Ok(())
    }
}

/// File-backed backend. An absent or empty file reads as `None`.
pub struct FileBackend {
    name: String,
    path: PathBuf,
}

impl FileBackend {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    fn err(&self, e: impl ToString) -> StorageError {
        StorageError::Backend {
            backend: self.name.clone(),
            reason: e.to_string(),
        }
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self) -> StorageResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.err(e)),
        }
    }

    fn write(&mut self, document: &str) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.err(e))?;
        }
        fs::write(&self.path, document).map_err(|e| self.err(e))
    }

    fn clear(&mut self) -> StorageResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.err(e)),
        }
    }
}

/// Primary-plus-mirrors store for the key-record list.
pub struct MirroredStore {
    primary: Box<dyn StorageBackend>,
    mirrors: Vec<Box<dyn StorageBackend>>,
}

impl MirroredStore {
    pub fn new(primary: Box<dyn StorageBackend>, mirrors: Vec<Box<dyn StorageBackend>>) -> Self {
        Self { primary, mirrors }
    }

    /// Load the document. A non-empty primary always wins; mirrors are
    /// consulted only when the primary is empty, and a mirror hit is
    /// copied back into the primary.
    pub fn load(&mut self) -> StorageResult<Option<String>> {
        if let Some(doc) = self.primary.read()? {
            return Ok(Some(doc));
        }
        for mirror in &self.mirrors {
            match mirror.read() {
                Ok(Some(doc)) => {
                    debug!("restoring primary store from mirror '{}'", mirror.name());
                    self.primary.write(&doc)?;
                    return Ok(Some(doc));
                }
                Ok(None) => {}
                Err(e) => warn!("mirror '{}' unreadable: {}", mirror.name(), e),
            }
        }
        Ok(None)
    }

    /// Write the document to the primary and every mirror. The write
    /// succeeds once the primary has it; mirror failures are logged.
    pub fn save(&mut self, document: &str) -> StorageResult<()> {
        self.primary.write(document)?;
        for mirror in &mut self.mirrors {
            if let Err(e) = mirror.write(document) {
                warn!("mirror '{}' write failed: {}", mirror.name(), e);
            }
        }
        Ok(())
    }

    /// Write the document to every backend, failing if any backend did
    /// not take it. Used for deletions, where a stale mirror must not be
    /// able to resurrect a removed record.
    pub fn save_strict(&mut self, document: &str) -> StorageResult<()> {
        self.primary.write(document)?;
        let mut failed = Vec::new();
        for mirror in &mut self.mirrors {
            if let Err(e) = mirror.write(document) {
                warn!("mirror '{}' write failed: {}", mirror.name(), e);
                failed.push(mirror.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::DeleteIncomplete(failed.join(", ")))
        }
    }

    /// Remove the document from every backend. Mirrors are cleared
    /// first and the primary is only cleared once every mirror has; a
    /// partial failure leaves the primary authoritative, so load()
    /// never resurrects records from a stale mirror.
    pub fn wipe(&mut self) -> StorageResult<()> {
        let mut failed = Vec::new();
        for mirror in &mut self.mirrors {
            if let Err(e) = mirror.clear() {
                warn!("mirror '{}' clear failed: {}", mirror.name(), e);
                failed.push(mirror.name().to_string());
            }
        }
        if !failed.is_empty() {
            return Err(StorageError::DeleteIncomplete(failed.join(", ")));
        }
        if let Err(e) = self.primary.clear() {
            warn!("primary '{}' clear failed: {}", self.primary.name(), e);
            return Err(StorageError::DeleteIncomplete(
                self.primary.name().to_string(),
            ));
        }
        Ok(())
    }
}

/// A backend that can be scripted to fail, for exercising fan-out and
/// restore paths in tests.
#[cfg(test)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    pub fail_writes: bool,
    pub fail_clears: bool,
}

#[cfg(test)]
impl FlakyBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            fail_writes: false,
            fail_clears: false,
        }
    }
}

#[cfg(test)]
impl StorageBackend for FlakyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&self) -> StorageResult<Option<String>> {
        self.inner.read()
    }

    fn write(&mut self, document: &str) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::Backend {
                backend: self.name().into(),
                reason: "scripted write failure".into(),
            });
        }
        self.inner.write(document)
    }

    fn clear(&mut self) -> StorageResult<()> {
        if self.fail_clears {
            return Err(StorageError::Backend {
                backend: self.name().into(),
                reason: "scripted clear failure".into(),
            });
        }
        self.inner.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MirroredStore {
        MirroredStore::new(
            Box::new(MemoryBackend::new("primary")),
            vec![
                Box::new(MemoryBackend::new("mirror-a")),
                Box::new(MemoryBackend::new("mirror-b")),
            ],
        )
    }

    #[test]
    fn save_fans_out_to_all_backends() {
        let mut s = store();
        s.save("records-v1").unwrap();
        assert_eq!(s.primary.read().unwrap().as_deref(), Some("records-v1"));
        for m in &s.mirrors {
            assert_eq!(m.read().unwrap().as_deref(), Some("records-v1"));
        }
    }

    #[test]
    fn empty_primary_restored_from_mirror() {
        let mut s = store();
        s.save("records-v1").unwrap();
        s.primary.clear().unwrap();

        let loaded = s.load().unwrap();
        assert_eq!(loaded.as_deref(), Some("records-v1"));
        // Restored back into the primary
        assert_eq!(s.primary.read().unwrap().as_deref(), Some("records-v1"));
    }

    #[test]
    fn stale_mirror_never_overrides_primary() {
        let mut s = store();
        s.save("old").unwrap();
        // Primary advances, one mirror misses the write
        s.primary.write("new").unwrap();
        assert_eq!(s.load().unwrap().as_deref(), Some("new"));
    }

    #[test]
    fn wipe_clears_everything() {
        let mut s = store();
        s.save("records-v1").unwrap();
        s.wipe().unwrap();
        assert_eq!(s.load().unwrap(), None);
    }

    #[test]
    fn failed_mirror_clear_leaves_primary_authoritative() {
        let mut flaky = FlakyBackend::new("mirror-bad");
        flaky.fail_clears = true;
        let mut s = MirroredStore::new(
            Box::new(MemoryBackend::new("primary")),
            vec![Box::new(flaky)],
        );
        s.save("records-v1").unwrap();

        let err = s.wipe().unwrap_err();
        assert!(matches!(err, StorageError::DeleteIncomplete(ref names) if names.contains("mirror-bad")));
        // The primary must not be cleared while a mirror still holds
        // data, otherwise the next load would read the stale mirror and
        // quietly bring the wiped records back.
        assert_eq!(s.primary.read().unwrap(), Some("records-v1".to_string()));
        assert_eq!(s.load().unwrap(), Some("records-v1".to_string()));
    }

    #[test]
    fn file_backend_roundtrip_and_clear() {
        let path = std::env::temp_dir().join(format!("airsig-store-{}.json", std::process::id()));
        let mut backend = FileBackend::new("file", &path);
        assert_eq!(backend.read().unwrap(), None);

        backend.write("records-v1").unwrap();
        assert_eq!(backend.read().unwrap().as_deref(), Some("records-v1"));

        backend.clear().unwrap();
        assert_eq!(backend.read().unwrap(), None);
        // Clearing an already-absent file still succeeds
        backend.clear().unwrap();
    }

    #[test]
    fn mirror_write_failure_does_not_fail_save() {
        let mut flaky = FlakyBackend::new("mirror-bad");
        flaky.fail_writes = true;
        let mut s = MirroredStore::new(
            Box::new(MemoryBackend::new("primary")),
            vec![Box::new(flaky)],
        );
        s.save("records-v1").unwrap();
        assert_eq!(s.load().unwrap().as_deref(), Some("records-v1"));
    }
}
