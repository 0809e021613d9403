//! Durable storage for the persisted session.
//!
//! The record is a single JSON document under the fixed name `auth-storage`,
//! wrapped as `{ "state": {...}, "version": 0 }`.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::session::PersistedSession;

pub const STORAGE_NAME: &str = "auth-storage";
const STORAGE_VERSION: u32 = 0;

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, ApiError>;
    fn save(&self, session: &PersistedSession) -> Result<(), ApiError>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    state: PersistedSession,
    #[serde(default)]
    version: u32,
}

/// Stores the session as `<dir>/auth-storage.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{STORAGE_NAME}.json")),
        }
    }

    /// `<platform data dir>/todo-client`.
    pub fn default_dir() -> Result<PathBuf, ApiError> {
        dirs::data_dir()
            .map(|dir| dir.join("todo-client"))
            .ok_or_else(|| ApiError::Storage("no platform data directory".into()))
    }

    pub fn default_location() -> Result<Self, ApiError> {
        Ok(Self::new(Self::default_dir()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<Option<PersistedSession>, ApiError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ApiError::Storage(e.to_string())),
        };
        let envelope: Envelope =
            serde_json::from_str(&raw).map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(Some(envelope.state))
    }

    fn save(&self, session: &PersistedSession) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ApiError::Storage(e.to_string()))?;
        }
        let envelope = Envelope {
            state: session.clone(),
            version: STORAGE_VERSION,
        };
        let json =
            serde_json::to_string_pretty(&envelope).map_err(|e| ApiError::Storage(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| ApiError::Storage(e.to_string()))
    }
}

/// In-process storage, for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    pub fn current(&self) -> Option<PersistedSession> {
        self.slot.lock().clone()
    }
}

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<Option<PersistedSession>, ApiError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), ApiError> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }
}
