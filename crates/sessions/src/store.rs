//! Durable per-session credential storage.
//!
//! Layout under the base directory, one sub-directory per session:
//!
//! ```text
//! <base>/<id>/creds.json       credential record
//! <base>/<id>/connected.json   written once the session authenticates
//! <base>/<id>/qr.txt           current QR payload (transient)
//! <base>/<id>/pair_code.json   current pairing code (transient)
//! ```

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use {async_trait::async_trait, fd_lock::RwLock, tracing::debug};

use crate::{
    error::{Error, Result},
    types::{CredentialRecord, PairingArtifact, SessionId},
};

pub const CREDS_FILE: &str = "creds.json";
pub const CONNECTED_FILE: &str = "connected.json";
pub const QR_FILE: &str = "qr.txt";
pub const PAIR_CODE_FILE: &str = "pair_code.json";
const LOCK_FILE: &str = ".lock";

/// Storage the lifecycle manager persists credentials and artifacts through.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the record, or an empty one when none exists yet.
    async fn load(&self, id: &SessionId) -> Result<CredentialRecord>;

    /// Durably replace the record. Returns once the data is on disk.
    async fn save(&self, id: &SessionId, record: &CredentialRecord) -> Result<()>;

    /// Whether a credential record exists.
    async fn exists(&self, id: &SessionId) -> Result<bool>;

    /// Remove everything stored for the session. Returns false if nothing existed.
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    /// Identifiers with a session directory on disk.
    async fn list(&self) -> Result<Vec<SessionId>>;

    async fn write_connected_marker(
        &self,
        id: &SessionId,
        at_ms: u64,
        account: Option<&str>,
    ) -> Result<()>;

    /// Mirror the current artifact to disk, replacing any other kind.
    async fn write_artifact(&self, id: &SessionId, artifact: &PairingArtifact) -> Result<()>;

    /// Remove artifact files. Missing files are not an error.
    async fn clear_artifact(&self, id: &SessionId) -> Result<()>;

    /// Every regular file in the session directory, by name. `None` if
    /// the directory does not exist.
    async fn export(&self, id: &SessionId) -> Result<Option<BTreeMap<String, String>>>;

    /// Raw bytes of the credential file, if present.
    async fn read_credentials_raw(&self, id: &SessionId) -> Result<Option<Vec<u8>>>;
}

/// Filesystem-backed store with locked, atomic (temp + rename) writes.
pub struct FsCredentialStore {
    base_dir: PathBuf,
}

impl FsCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding one session's files.
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.base_dir.join(id.as_str())
    }

    async fn blocking<T, F>(&self, id: &SessionId, context: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> io::Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| Error::storage(id, context, e))?
            .map_err(|e| Error::storage(id, context, e))
    }
}

/// Write `data` to `dir/name` through a temp file and rename, holding the
/// session's lock file for the duration.
fn write_locked(dir: &Path, name: &str, data: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write()?;

    let tmp = dir.join(format!(".{name}.tmp"));
    {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(name))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn load(&self, id: &SessionId) -> Result<CredentialRecord> {
        let path = self.session_dir(id).join(CREDS_FILE);
        let raw = self
            .blocking(id, "read credentials", move || match fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            })
            .await?;

        match raw {
            None => {
                debug!(session = %id, "no stored credentials, starting fresh");
                Ok(CredentialRecord::empty())
            },
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::storage(id, "parse credentials", e)),
        }
    }

    async fn save(&self, id: &SessionId, record: &CredentialRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::storage(id, "serialize credentials", e))?;
        let dir = self.session_dir(id);
        self.blocking(id, "write credentials", move || {
            write_locked(&dir, CREDS_FILE, &data)
        })
        .await
    }

    async fn exists(&self, id: &SessionId) -> Result<bool> {
        let path = self.session_dir(id).join(CREDS_FILE);
        self.blocking(id, "stat credentials", move || path.try_exists())
            .await
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        let dir = self.session_dir(id);
        self.blocking(id, "delete session directory", move || {
            match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let base = self.base_dir.clone();
        let names = tokio::task::spawn_blocking(move || -> io::Result<Vec<String>> {
            let entries = match fs::read_dir(&base) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir()
                    && let Some(name) = entry.file_name().to_str()
                {
                    names.push(name.to_string());
                }
            }
            Ok(names)
        })
        .await
        .map_err(|e| Error::storage("*", "list sessions", e))?
        .map_err(|e| Error::storage("*", "list sessions", e))?;

        // Foreign directories that are not valid ids are skipped.
        let mut ids: Vec<SessionId> = names
            .iter()
            .filter_map(|n| SessionId::parse(n).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn write_connected_marker(
        &self,
        id: &SessionId,
        at_ms: u64,
        account: Option<&str>,
    ) -> Result<()> {
        let marker = serde_json::json!({
            "connected": true,
            "time": at_ms,
            "account": account,
        });
        let data = serde_json::to_vec_pretty(&marker)
            .map_err(|e| Error::storage(id, "serialize connected marker", e))?;
        let dir = self.session_dir(id);
        self.blocking(id, "write connected marker", move || {
            write_locked(&dir, CONNECTED_FILE, &data)
        })
        .await
    }

    async fn write_artifact(&self, id: &SessionId, artifact: &PairingArtifact) -> Result<()> {
        let (name, stale, data) = match artifact {
            PairingArtifact::Qr { payload, .. } => (QR_FILE, PAIR_CODE_FILE, payload.clone().into_bytes()),
            PairingArtifact::Code(code) => (
                PAIR_CODE_FILE,
                QR_FILE,
                serde_json::to_vec_pretty(code)
                    .map_err(|e| Error::storage(id, "serialize pairing code", e))?,
            ),
        };
        let dir = self.session_dir(id);
        self.blocking(id, "write pairing artifact", move || {
            write_locked(&dir, name, &data)?;
            remove_if_exists(&dir.join(stale))
        })
        .await
    }

    async fn clear_artifact(&self, id: &SessionId) -> Result<()> {
        let dir = self.session_dir(id);
        self.blocking(id, "clear pairing artifact", move || {
            remove_if_exists(&dir.join(QR_FILE))?;
            remove_if_exists(&dir.join(PAIR_CODE_FILE))
        })
        .await
    }

    async fn export(&self, id: &SessionId) -> Result<Option<BTreeMap<String, String>>> {
        let dir = self.session_dir(id);
        self.blocking(id, "export session", move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            let mut files = BTreeMap::new();
            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if name.starts_with('.') || !entry.file_type()?.is_file() {
                    continue;
                }
                let bytes = fs::read(entry.path())?;
                files.insert(name, String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(Some(files))
        })
        .await
    }

    async fn read_credentials_raw(&self, id: &SessionId) -> Result<Option<Vec<u8>>> {
        let path = self.session_dir(id).join(CREDS_FILE);
        self.blocking(id, "read credentials", move || match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }
}
