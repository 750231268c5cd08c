//! Token storage
//!
//! Holds the access/refresh token pair. Reads are served from memory so a
//! write is visible to the very next read, whatever the backing medium.

use parking_lot::RwLock;
use sentinel_core::{storage_error, Session, SentinelResult, TokenPair};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Storage for the current session tokens.
///
/// `set_session` and `clear_session` replace both values together; a reader
/// never observes a new access token paired with an old refresh token.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    fn set_session(&self, tokens: &TokenPair);

    fn clear_session(&self);

    /// Snapshot of both values taken under one lock
    fn session(&self) -> Session;
}

/// In-process store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<Session>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.session.read().refresh_token.clone()
    }

    fn set_session(&self, tokens: &TokenPair) {
        *self.session.write() = Session::from(tokens.clone());
    }

    fn clear_session(&self) {
        *self.session.write() = Session::default();
    }

    fn session(&self) -> Session {
        self.session.read().clone()
    }
}

/// Store persisted as a small JSON document (`access_token`, `refresh_token`).
///
/// Every change is written to a sibling temporary file and renamed over the
/// target, so the file on disk always holds a complete pair.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    session: RwLock<Session>,
}

impl FileTokenStore {
    /// Open the store, loading any session left by a previous run.
    pub fn open(path: impl Into<PathBuf>) -> SentinelResult<Self> {
        let path = path.into();
        let session = Self::load(&path)?;

        debug!(
            path = %path.display(),
            has_access_token = session.access_token.is_some(),
            has_refresh_token = session.refresh_token.is_some(),
            "Opened session file"
        );

        Ok(Self {
            path,
            session: RwLock::new(session),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> SentinelResult<Session> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Session::default()),
            Err(e) => return Err(storage_error!("Failed to read session file", "token_store", e)),
        };

        if content.trim().is_empty() {
            return Ok(Session::default());
        }

        serde_json::from_str(&content)
            .map_err(|e| storage_error!("Session file is not valid JSON", "token_store", e))
    }

    fn persist(&self, session: &Session) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(session)?;
        let written = std::fs::write(&tmp, body).and_then(|_| std::fs::rename(&tmp, &self.path));
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written
    }

    fn replace(&self, next: Session) {
        // Hold the write lock across the file write so persisted order
        // matches in-memory order.
        let mut current = self.session.write();
        if let Err(e) = self.persist(&next) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to persist session; keeping it in memory only"
            );
        }
        *current = next;
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.session.read().access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.session.read().refresh_token.clone()
    }

    fn set_session(&self, tokens: &TokenPair) {
        self.replace(Session::from(tokens.clone()));
    }

    fn clear_session(&self) {
        self.replace(Session::default());
    }

    fn session(&self) -> Session {
        self.session.read().clone()
    }
}
