//! Identity store implementations: a JSON file of enrolled embeddings and an
//! in-memory map.

use crate::error::{VigilError, VigilResult};
use crate::sensors::IdentityStore;
use crate::session::UserId;
use crate::verifier::Embedding;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

type UserTable = BTreeMap<UserId, Embedding>;

/// File-backed store: a single JSON object mapping user name to embedding.
///
/// The file is re-read on every lookup so enrollments made by another process
/// are picked up. Writes replace the file atomically via a temp file.
#[derive(Debug)]
pub struct JsonIdentityStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> VigilResult<UserTable> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UserTable::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(UserTable::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            VigilError::Store(format!("{}: {}", self.path.display(), e))
        })
    }

    fn save(&self, table: &UserTable) -> VigilResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        std::fs::write(&temp_path, serde_json::to_vec_pretty(table)?)?;
        std::fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), users = table.len(), "identity store saved");
        Ok(())
    }
}

impl IdentityStore for JsonIdentityStore {
    fn get(&self, user: &UserId) -> VigilResult<Option<Embedding>> {
        Ok(self.load()?.remove(user))
    }

    fn put(&self, user: &UserId, embedding: Embedding) -> VigilResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut table = self.load()?;
        table.insert(user.clone(), embedding);
        self.save(&table)?;
        info!(%user, path = %self.path.display(), "identity stored");
        Ok(())
    }

    fn contains(&self, user: &UserId) -> VigilResult<bool> {
        Ok(self.load()?.contains_key(user))
    }

    fn entries(&self) -> VigilResult<Vec<(UserId, Embedding)>> {
        Ok(self.load()?.into_iter().collect())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    users: DashMap<UserId, Embedding>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, user: &UserId) -> VigilResult<Option<Embedding>> {
        Ok(self.users.get(user).map(|e| e.value().clone()))
    }

    fn put(&self, user: &UserId, embedding: Embedding) -> VigilResult<()> {
        self.users.insert(user.clone(), embedding);
        Ok(())
    }

    fn contains(&self, user: &UserId) -> VigilResult<bool> {
        Ok(self.users.contains_key(user))
    }

    fn entries(&self) -> VigilResult<Vec<(UserId, Embedding)>> {
        let mut entries: Vec<_> = self
            .users
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
