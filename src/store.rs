//! JSON-backed archive of finished conversations.
//!
//! The archive is a single document, `{"sessions": [...]}`, that only ever
//! grows. Writers serialize on an in-process mutex and an advisory lock on a
//! sidecar `.lock` file, then replace the document through a temp file and
//! rename so readers never see a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use fs2::FileExt;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::session::{Message, SessionArchive, SessionRecord};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SessionStore {
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_guard: Mutex::new(()),
        }
    }

    /// Opens the archive at `path`, failing if the existing document cannot
    /// be read. A server or terminal chat should not start on a corrupt file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        let existing = store.load()?;
        info!(
            path = %store.path.display(),
            sessions = existing.sessions.len(),
            "session archive ready"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or blank files read as an empty archive; anything else that
    /// fails to parse is reported as corruption.
    pub fn load(&self) -> Result<SessionArchive, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionArchive::default());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(SessionArchive::default());
        }
        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Appends `messages` as a new record stamped with the local time.
    pub fn save(&self, messages: Vec<Message>) -> Result<SessionRecord, StoreError> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _lock = FileLock::acquire(&self.path)?;

        let mut archive = self.load()?;
        let record = SessionRecord {
            messages,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };
        archive.sessions.push(record.clone());
        self.write_atomic(&archive)?;

        info!(
            path = %self.path.display(),
            sessions = archive.sessions.len(),
            "session saved"
        );
        Ok(record)
    }

    fn write_atomic(&self, archive: &SessionArchive) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(archive)?;
        let tmp_path = sidecar(&self.path, "tmp");

        let mut tmp = File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp.write_all(json.as_bytes()).map_err(|e| StoreError::io(&tmp_path, e))?;
        tmp.sync_all().map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::io(&self.path, e))?;
        debug!(path = %self.path.display(), bytes = json.len(), "archive rewritten");
        Ok(())
    }
}

/// `data/chats.json` -> `data/.chats.json.<ext>`
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".into());
    path.with_file_name(format!(".{name}.{ext}"))
}

/// Exclusive advisory lock held for one read-modify-write cycle.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let lock_path = sidecar(path, "lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: lock_path,
            source,
        })?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
