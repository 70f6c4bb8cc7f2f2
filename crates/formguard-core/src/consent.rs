//! Cookie-consent persistence.
//!
//! The choice is a single stored string, `"accepted"` or `"declined"`.
//! Anything else, or nothing at all, means the user has not decided.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SecurityError;

/// File name of the stored choice inside the data directory.
pub const CONSENT_FILE: &str = "cookie-consent";

/// The user's analytics consent choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    Accepted,
    Declined,
    #[default]
    Undecided,
}

impl ConsentState {
    /// Interpret a stored value.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("accepted") => ConsentState::Accepted,
            Some("declined") => ConsentState::Declined,
            _ => ConsentState::Undecided,
        }
    }

    /// Value to persist, or `None` for undecided.
    pub fn as_stored(&self) -> Option<&'static str> {
        match self {
            ConsentState::Accepted => Some("accepted"),
            ConsentState::Declined => Some("declined"),
            ConsentState::Undecided => None,
        }
    }
}

impl std::fmt::Display for ConsentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_stored().unwrap_or("undecided"))
    }
}

/// Backing store for the consent flag.
pub trait ConsentStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, SecurityError>;
    fn store(&self, value: &str) -> Result<(), SecurityError>;
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryConsentStore {
    value: Mutex<Option<String>>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }
}

impl ConsentStore for MemoryConsentStore {
    fn load(&self) -> Result<Option<String>, SecurityError> {
        Ok(self.value.lock().clone())
    }

    fn store(&self, value: &str) -> Result<(), SecurityError> {
        *self.value.lock() = Some(value.to_string());
        Ok(())
    }
}

/// Stores the flag as the sole content of a file.
#[derive(Debug, Clone)]
pub struct FileConsentStore {
    path: PathBuf,
}

impl FileConsentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the platform data directory, if one can be determined.
    pub fn at_default_location() -> Option<Self> {
        Self::default_path().map(Self::new)
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "formguard", "formguard")
            .map(|dirs| dirs.data_dir().join(CONSENT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConsentStore for FileConsentStore {
    fn load(&self) -> Result<Option<String>, SecurityError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecurityError::ConsentStore(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn store(&self, value: &str) -> Result<(), SecurityError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SecurityError::ConsentStore(format!("create dir: {e}")))?;
            }
        }
        std::fs::write(&self.path, value).map_err(|e| {
            SecurityError::ConsentStore(format!("write {}: {e}", self.path.display()))
        })
    }
}

/// Consent read once from a store and updated on user choice.
pub struct Consent {
    store: Box<dyn ConsentStore>,
    state: RwLock<ConsentState>,
}

impl Consent {
    /// Read the stored choice. An unreadable store counts as undecided.
    pub fn load(store: Box<dyn ConsentStore>) -> Self {
        let state = match store.load() {
            Ok(value) => ConsentState::from_stored(value.as_deref()),
            Err(e) => {
                debug!(error = %e, "Consent store unreadable; treating as undecided");
                ConsentState::Undecided
            }
        };
        Self {
            store,
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> ConsentState {
        *self.state.read()
    }

    pub fn analytics_allowed(&self) -> bool {
        self.state() == ConsentState::Accepted
    }

    /// Whether the host should still ask the user.
    pub fn banner_visible(&self) -> bool {
        self.state() == ConsentState::Undecided
    }

    pub fn accept(&self) -> Result<(), SecurityError> {
        self.set(ConsentState::Accepted)
    }

    pub fn decline(&self) -> Result<(), SecurityError> {
        self.set(ConsentState::Declined)
    }

    fn set(&self, state: ConsentState) -> Result<(), SecurityError> {
        if let Some(value) = state.as_stored() {
            self.store.store(value)?;
        }
        *self.state.write() = state;
        debug!(%state, "Consent updated");
        Ok(())
    }
}

impl std::fmt::Debug for Consent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consent")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_values() {
        assert_eq!(ConsentState::from_stored(Some("accepted")), ConsentState::Accepted);
        assert_eq!(ConsentState::from_stored(Some("declined")), ConsentState::Declined);
        assert_eq!(ConsentState::from_stored(Some("maybe")), ConsentState::Undecided);
        assert_eq!(ConsentState::from_stored(None), ConsentState::Undecided);
    }

    #[test]
    fn test_memory_consent() {
        let consent = Consent::load(Box::new(MemoryConsentStore::new()));
        assert!(consent.banner_visible());
        assert!(!consent.analytics_allowed());

        consent.accept().unwrap();
        assert!(consent.analytics_allowed());
        assert!(!consent.banner_visible());

        consent.decline().unwrap();
        assert_eq!(consent.state(), ConsentState::Declined);
        assert!(!consent.banner_visible());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONSENT_FILE);

        let consent = Consent::load(Box::new(FileConsentStore::new(&path)));
        assert_eq!(consent.state(), ConsentState::Undecided);
        consent.accept().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "accepted");

        let reloaded = Consent::load(Box::new(FileConsentStore::new(&path)));
        assert_eq!(reloaded.state(), ConsentState::Accepted);
    }

    #[test]
    fn test_unreadable_store_is_undecided() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be read as a file.
        let consent = Consent::load(Box::new(FileConsentStore::new(dir.path())));
        assert_eq!(consent.state(), ConsentState::Undecided);
    }
}
