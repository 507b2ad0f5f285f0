//! Ceremony snapshot storage
//!
//! One pretty-printed JSON document per ceremony under a base directory.
//! Snapshots are validated on load, so a hand-edited file that breaks the
//! ledger invariants is refused rather than resumed.
//!
//! A load, transition and save cycle must run under [`SnapshotLock`] so two
//! processes cannot both advance the same stored turn.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use axiom_ceremony::{Ceremony, CeremonyId};

use crate::error::{CoordinatorError, Result};

const SNAPSHOT_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Exclusive hold on one stored ceremony, released on drop
///
/// The lock file carries the holder's pid. A holder killed without
/// unwinding leaves it behind, and it must be removed by hand.
#[derive(Debug)]
pub struct SnapshotLock {
    path: PathBuf,
}

impl SnapshotLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release ceremony lock {:?}: {}", self.path, e);
        }
    }
}

/// Snapshot storage rooted at a directory
#[derive(Debug, Clone)]
pub struct SnapshotStorage {
    base_path: PathBuf,
}

impl SnapshotStorage {
    /// Open storage, creating the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn exists(&self, id: &CeremonyId) -> bool {
        self.snapshot_path(id).exists()
    }

    /// Take the exclusive lock for a ceremony
    ///
    /// Fails immediately with [`CoordinatorError::Locked`] if another
    /// holder exists.
    pub fn lock(&self, id: &CeremonyId) -> Result<SnapshotLock> {
        let path = self.lock_path(id);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CoordinatorError::Locked {
                    id: id.to_string(),
                    path: path.display().to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let lock = SnapshotLock { path };
        writeln!(file, "{}", std::process::id())?;

        debug!("Locked ceremony {} at {:?}", id, lock.path);
        Ok(lock)
    }

    /// Load and validate a snapshot
    pub fn load(&self, id: &CeremonyId) -> Result<Ceremony> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(CoordinatorError::NotFound(id.to_string()));
        }

        let content = std::fs::read_to_string(&path)?;
        let ceremony: Ceremony = serde_json::from_str(&content)?;
        if ceremony.ceremony_id() != id {
            return Err(CoordinatorError::Serialization(format!(
                "snapshot {:?} holds ceremony {}",
                path,
                ceremony.ceremony_id()
            )));
        }
        ceremony.check_invariants()?;

        debug!("Loaded ceremony {} from {:?}", id, path);
        Ok(ceremony)
    }

    /// Save a snapshot, replacing any previous one
    pub fn save(&self, ceremony: &Ceremony) -> Result<()> {
        let path = self.snapshot_path(ceremony.ceremony_id());
        let content = serde_json::to_string_pretty(ceremony)?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &path)?;

        debug!("Saved ceremony {} to {:?}", ceremony.ceremony_id(), path);
        Ok(())
    }

    /// Save a snapshot for a ceremony that must not exist yet
    pub fn create(&self, ceremony: &Ceremony) -> Result<()> {
        if self.exists(ceremony.ceremony_id()) {
            return Err(CoordinatorError::AlreadyExists(
                ceremony.ceremony_id().to_string(),
            ));
        }
        self.save(ceremony)
    }

    /// Ids of every stored ceremony, sorted
    pub fn list(&self) -> Result<Vec<CeremonyId>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| CeremonyId::new(s).ok());
            if let Some(id) = id {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn snapshot_path(&self, id: &CeremonyId) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", id.as_str(), SNAPSHOT_EXTENSION))
    }

    fn lock_path(&self, id: &CeremonyId) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", id.as_str(), LOCK_EXTENSION))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axiom_ceremony::{
        CeremonyError, ContentHasher, DigestVerifier, HashAlgorithm, Participant, Phase,
        Sha256Hasher,
    };
    use tempfile::tempdir;

    fn ceremony(id: &str) -> Ceremony {
        Ceremony::new(
            CeremonyId::new(id).unwrap(),
            vec![
                Participant::new("a", "A", "a@axiom.test"),
                Participant::new("b", "B", "b@axiom.test"),
            ],
            HashAlgorithm::Sha256,
        )
        .unwrap()
    }

    #[test]
    fn save_and_load_mid_ceremony() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path().join("state")).unwrap();

        let mut ceremony = ceremony("resume");
        ceremony.start().unwrap();
        ceremony
            .submit_contribution(
                &"a".into(),
                b"first",
                &Sha256Hasher.compute_hash(b"first"),
                &DigestVerifier::new(Sha256Hasher),
            )
            .unwrap();
        storage.save(&ceremony).unwrap();

        let loaded = storage.load(ceremony.ceremony_id()).unwrap();
        assert_eq!(loaded, ceremony);
        assert_eq!(loaded.current_turn(), 1);
        assert_eq!(loaded.phase(), &Phase::InProgress);
        assert!(!dir.path().join("state").join("resume.json.tmp").exists());
    }

    #[test]
    fn create_refuses_existing() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.create(&ceremony("once")).unwrap();

        let err = storage.create(&ceremony("once")).unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyExists(_)));
    }

    #[test]
    fn load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        let err = storage.load(&CeremonyId::new("nope").unwrap()).unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[test]
    fn tampered_snapshot_is_refused() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        let mut ceremony = ceremony("tamper");
        ceremony.start().unwrap();
        storage.save(&ceremony).unwrap();

        let path = dir.path().join("tamper.json");
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["current_turn"] = serde_json::json!(1);
        std::fs::write(&path, value.to_string()).unwrap();

        assert!(storage.load(ceremony.ceremony_id()).is_err());
    }

    #[test]
    fn list_skips_foreign_files() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.save(&ceremony("beta")).unwrap();
        storage.save(&ceremony("alpha")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("bad name.json"), b"{}").unwrap();

        let ids: Vec<String> = storage
            .list()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        let id = CeremonyId::new("locked").unwrap();

        let held = storage.lock(&id).unwrap();
        assert!(held.path().exists());
        let err = storage.lock(&id).unwrap_err();
        assert!(matches!(err, CoordinatorError::Locked { .. }));

        // other ceremonies are unaffected
        let other = storage.lock(&CeremonyId::new("other").unwrap()).unwrap();

        drop(held);
        assert!(!dir.path().join("locked.lock").exists());
        let _again = storage.lock(&id).unwrap();
        drop(other);
    }

    #[test]
    fn locked_cycles_accept_one_submission_per_turn() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        let mut stored = ceremony("race");
        stored.start().unwrap();
        storage.save(&stored).unwrap();

        let id = stored.ceremony_id().clone();
        let verifier = DigestVerifier::new(Sha256Hasher);
        let submit = |ceremony: &mut Ceremony, payload: &[u8]| {
            ceremony.submit_contribution(
                &"a".into(),
                payload,
                &Sha256Hasher.compute_hash(payload),
                &verifier,
            )
        };

        // first process holds the lock across load, submit and save
        let first_lock = storage.lock(&id).unwrap();
        let mut first = storage.load(&id).unwrap();

        // a second process cannot start its cycle meanwhile
        assert!(matches!(
            storage.lock(&id),
            Err(CoordinatorError::Locked { .. })
        ));

        submit(&mut first, b"first").unwrap();
        storage.save(&first).unwrap();
        drop(first_lock);

        // once released, the second process sees the advanced turn
        let _second_lock = storage.lock(&id).unwrap();
        let mut second = storage.load(&id).unwrap();
        let err = submit(&mut second, b"second").unwrap_err();
        assert!(matches!(err, CeremonyError::OutOfTurn { .. }));

        let stored = storage.load(&id).unwrap();
        assert_eq!(stored.history().len(), 1);
        assert_eq!(stored.current_turn(), 1);
    }

    #[test]
    fn list_ignores_lock_files() {
        let dir = tempdir().unwrap();
        let storage = SnapshotStorage::new(dir.path()).unwrap();
        storage.save(&ceremony("listed")).unwrap();
        let _lock = storage.lock(&CeremonyId::new("listed").unwrap()).unwrap();

        assert_eq!(storage.list().unwrap().len(), 1);
    }
}
