//! Single-slot identity storage.
//!
//! A device holds at most one identity. [`IdentityStore`] generates, loads,
//! and destroys it on top of an [`IdentityRepository`] that only knows how to
//! keep one [`IdentityRecord`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use anonfly_common::helpers::validate_display_name;
use anonfly_common::{Error, Result};
use anonfly_crypto::{Identity, IdentityRecord};

/// Durable single-slot storage for one identity record.
pub trait IdentityRepository: Send + Sync {
    fn load(&self) -> Result<Option<IdentityRecord>>;
    /// Replace whatever is stored.
    fn save(&self, record: &IdentityRecord) -> Result<()>;
    /// Remove the record. Clearing an empty slot succeeds.
    fn clear(&self) -> Result<()>;
}

/// JSON file on disk, owner read/write only on Unix.
#[derive(Debug, Clone)]
pub struct FileIdentityRepository {
    path: PathBuf,
}

impl FileIdentityRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityRepository for FileIdentityRepository {
    fn load(&self) -> Result<Option<IdentityRecord>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        let record = serde_json::from_slice(&raw)
            .map_err(|e| Error::storage(format!("{}: {}", self.path.display(), e)))?;
        Ok(Some(record))
    }

    fn save(&self, record: &IdentityRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(record)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Process-local slot, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryIdentityRepository {
    slot: Mutex<Option<IdentityRecord>>,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityRepository for MemoryIdentityRepository {
    fn load(&self) -> Result<Option<IdentityRecord>> {
        Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, record: &IdentityRecord) -> Result<()> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}

/// Identity lifecycle over an injected repository.
pub struct IdentityStore {
    repo: Box<dyn IdentityRepository>,
}

impl IdentityStore {
    pub fn new(repo: impl IdentityRepository + 'static) -> Self {
        Self {
            repo: Box::new(repo),
        }
    }

    /// Store backed by a JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(FileIdentityRepository::new(path))
    }

    /// Create and persist a fresh identity, replacing any previous one.
    pub fn generate(&self, display_name: &str) -> Result<Identity> {
        let display_name = validate_display_name(display_name)?;
        let identity = Identity::generate(&display_name);
        self.repo.save(&identity.to_record())?;
        info!("Generated identity {}", identity.aid());
        Ok(identity)
    }

    /// Read the stored identity without touching the network.
    pub fn load(&self) -> Result<Option<Identity>> {
        let Some(record) = self.repo.load()? else {
            debug!("No stored identity");
            return Ok(None);
        };
        let identity = Identity::from_record(&record).map_err(Error::storage)?;
        Ok(Some(identity))
    }

    /// Irreversibly delete the stored identity.
    pub fn clear(&self) -> Result<()> {
        self.repo.clear()?;
        info!("Cleared stored identity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_load_same_key_material() {
        let store = IdentityStore::new(MemoryIdentityRepository::new());
        let created = store.generate("alice").unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.aid(), created.aid());
        assert_eq!(loaded.display_name(), "alice");
        assert_eq!(
            *loaded.signing().private_key_bytes(),
            *created.signing().private_key_bytes()
        );
        assert_eq!(
            *loaded.exchange().secret_bytes(),
            *created.exchange().secret_bytes()
        );
    }

    #[test]
    fn test_generate_overwrites_previous() {
        let store = IdentityStore::new(MemoryIdentityRepository::new());
        let first = store.generate("alice").unwrap();
        let second = store.generate("bob").unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_ne!(first.aid(), second.aid());
        assert_eq!(loaded.aid(), second.aid());
    }

    #[test]
    fn test_invalid_name_persists_nothing() {
        let store = IdentityStore::new(MemoryIdentityRepository::new());
        assert!(matches!(store.generate("a!"), Err(Error::Validation(_))));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = IdentityStore::new(MemoryIdentityRepository::new());
        store.clear().unwrap();
        store.generate("alice").unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
