use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::types::UserProfile;

/// Durable key/value holder for the access token, refresh token and cached
/// user profile.
///
/// Exactly one session is resident at a time. Consumers inject the store
/// rather than reaching for ambient globals, so tests can substitute an
/// in-memory fake and run concurrently without cross-test leakage.
pub trait CredentialStore: Send + Sync + 'static {
    /// Atomically replace all three slots. There are no partial-field
    /// updates through this call.
    fn save(&self, access_token: &str, refresh_token: &str, profile: &UserProfile);

    /// The stored access token, if any.
    fn access_token(&self) -> Option<String>;

    /// The stored refresh token, if any.
    fn refresh_token(&self) -> Option<String>;

    /// The cached user profile, if any.
    fn profile(&self) -> Option<UserProfile>;

    /// Remove all three slots unconditionally. Clearing an empty store is
    /// a no-op, not an error.
    fn clear(&self);
}

/// The three persisted slots. The profile is kept serialized so the on-disk
/// and in-memory representations match.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Slots {
    access_token: Option<String>,
    refresh_token: Option<String>,
    profile: Option<String>,
}

impl Slots {
    fn filled(access_token: &str, refresh_token: &str, profile: &UserProfile) -> Self {
        Self {
            access_token: Some(access_token.to_owned()),
            refresh_token: Some(refresh_token.to_owned()),
            profile: serde_json::to_string(profile).ok(),
        }
    }

    fn decode_profile(&self) -> Option<UserProfile> {
        let raw = self.profile.as_deref()?;
        serde_json::from_str(raw).ok()
    }
}

/// In-memory credential store. The default for tests and for embedders that
/// manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<Slots>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn save(&self, access_token: &str, refresh_token: &str, profile: &UserProfile) {
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slots = Slots::filled(access_token, refresh_token, profile);
    }

    fn access_token(&self) -> Option<String> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .access_token
            .clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .refresh_token
            .clone()
    }

    fn profile(&self) -> Option<UserProfile> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .decode_profile()
    }

    fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slots = Slots::default();
    }
}

/// Credential store backed by a JSON file, surviving process restarts.
///
/// Writes are best-effort: a failed write leaves the in-memory state
/// authoritative and logs a warning, mirroring how the browser client
/// treats its local storage.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    slots: RwLock<Slots>,
}

impl FileStore {
    /// Open a store at `path`, loading any previously persisted session.
    /// A missing file yields an empty store; an unreadable one is an error.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file exists but cannot be
    /// read. A corrupt file is treated as empty rather than fatal.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let slots = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "corrupt credential file, starting empty");
                Slots::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Slots::default(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            slots: RwLock::new(slots),
        })
    }

    fn persist(&self, slots: &Slots) {
        let result = serde_json::to_vec_pretty(slots)
            .map_err(io::Error::other)
            .and_then(|bytes| std::fs::write(&self.path, bytes));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist credentials");
        }
    }
}

impl CredentialStore for FileStore {
    fn save(&self, access_token: &str, refresh_token: &str, profile: &UserProfile) {
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slots = Slots::filled(access_token, refresh_token, profile);
        self.persist(&slots);
    }

    fn access_token(&self) -> Option<String> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .access_token
            .clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .refresh_token
            .clone()
    }

    fn profile(&self) -> Option<UserProfile> {
        self.slots
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .decode_profile()
    }

    fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slots = Slots::default();
        self.persist(&slots);
    }
}
