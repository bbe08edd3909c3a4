//! SaveLocationManager - remembers where screenshots are saved.
//!
//! The chosen directory is persisted as an opaque access token so it
//! survives restarts. Tokens are produced and resolved by an `AccessGrants`
//! implementation; on sandboxed platforms that is a security-scoped
//! bookmark, elsewhere `PathGrants` records the directory path itself.
//!
//! Every grant in use holds an `AccessSession`. Sessions stop access when
//! dropped, so replacing a grant (or dropping the manager) never leaks an
//! OS-level access handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::api::types::{ApiError, SaveDirectoryGrant};
use crate::runtime::notifier::Notifier;
use crate::runtime::path::canonicalize_directory;
use crate::runtime::preferences::{PreferenceStore, KEY_SAVE_DIRECTORY_GRANT};

/// Outcome of resolving a persisted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedGrant {
    pub directory: PathBuf,
    /// The token still resolves but should be re-created from `directory`
    pub stale: bool,
}

/// Platform mechanism for persistent directory access.
pub trait AccessGrants: Send + Sync {
    /// Create a persistable token for `directory`.
    fn create_token(&self, directory: &Path) -> Result<Vec<u8>, ApiError>;

    /// Resolve a token back into a directory.
    fn resolve_token(&self, token: &[u8]) -> Result<ResolvedGrant, ApiError>;

    /// Begin using the directory. Returns false if access was refused.
    fn start_access(&self, directory: &Path) -> bool;

    /// Stop using the directory. Paired with every successful `start_access`.
    fn stop_access(&self, directory: &Path);
}

#[derive(Debug, Serialize, Deserialize)]
struct PathToken {
    path: PathBuf,
    canonical: PathBuf,
}

/// Portable grants backed by plain paths.
///
/// A token is stale when its path now canonicalizes somewhere else, e.g. a
/// symlinked directory that was retargeted.
#[derive(Debug, Default)]
pub struct PathGrants;

impl AccessGrants for PathGrants {
    fn create_token(&self, directory: &Path) -> Result<Vec<u8>, ApiError> {
        let canonical = canonicalize_directory(directory)?;
        let token = PathToken {
            path: directory.to_path_buf(),
            canonical,
        };
        serde_json::to_vec(&token).map_err(|e| ApiError::IoError {
            message: format!("Failed to encode directory token: {e}"),
        })
    }

    fn resolve_token(&self, token: &[u8]) -> Result<ResolvedGrant, ApiError> {
        let token: PathToken = serde_json::from_slice(token).map_err(|e| ApiError::InvalidInput {
            message: format!("Unreadable directory token: {e}"),
        })?;
        let canonical = canonicalize_directory(&token.path)?;
        Ok(ResolvedGrant {
            stale: canonical != token.canonical,
            directory: token.path,
        })
    }

    fn start_access(&self, directory: &Path) -> bool {
        match std::fs::metadata(directory) {
            Ok(metadata) => metadata.is_dir() && !metadata.permissions().readonly(),
            Err(_) => false,
        }
    }

    fn stop_access(&self, directory: &Path) {
        log::trace!("Stopped directory access: {}", directory.display());
    }
}

/// An open access session; stops access when dropped.
pub struct AccessSession {
    grants: Arc<dyn AccessGrants>,
    directory: PathBuf,
}

impl AccessSession {
    fn start(grants: Arc<dyn AccessGrants>, directory: &Path) -> Option<Self> {
        if !grants.start_access(directory) {
            return None;
        }
        log::debug!("Started directory access: {}", directory.display());
        Some(Self {
            grants,
            directory: directory.to_path_buf(),
        })
    }
}

impl Drop for AccessSession {
    fn drop(&mut self) {
        self.grants.stop_access(&self.directory);
    }
}

struct ActiveGrant {
    grant: SaveDirectoryGrant,
    _session: AccessSession,
}

pub struct SaveLocationManager {
    grants: Arc<dyn AccessGrants>,
    prefs: Arc<dyn PreferenceStore>,
    notifier: Arc<Notifier>,
    active: Mutex<Option<ActiveGrant>>,
}

impl SaveLocationManager {
    pub fn new(
        grants: Arc<dyn AccessGrants>,
        prefs: Arc<dyn PreferenceStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            grants,
            prefs,
            notifier,
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveGrant>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Restore the persisted grant.
    ///
    /// A stale token is re-derived from its resolved directory once; if that
    /// fails, or nothing was ever stored, there is no grant. Never notifies.
    pub fn restore(&self) -> Option<SaveDirectoryGrant> {
        let token = self.prefs.get_bytes(KEY_SAVE_DIRECTORY_GRANT)?;

        match self.grants.resolve_token(&token) {
            Ok(resolved) if !resolved.stale => {
                let grant = SaveDirectoryGrant {
                    directory: resolved.directory,
                    token,
                };
                self.activate(grant)
            }
            Ok(resolved) => {
                log::info!(
                    "Save directory grant is stale, re-deriving: dir={}",
                    resolved.directory.display()
                );
                match self.create_grant(&resolved.directory) {
                    Ok(grant) => Some(grant),
                    Err(e) => {
                        log::warn!("Failed to re-derive save directory grant: {e}");
                        None
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to resolve save directory grant: {e}");
                None
            }
        }
    }

    /// Create, persist and start a grant for `directory`.
    ///
    /// On failure the previous grant stays in place and the error is shown
    /// through the notifier.
    pub fn grant(&self, directory: &Path) -> Option<SaveDirectoryGrant> {
        match self.create_grant(directory) {
            Ok(grant) => {
                log::info!("Save directory set: dir={}", grant.directory.display());
                Some(grant)
            }
            Err(e) => {
                self.notifier
                    .error(format!("Could not use {}: {e}", directory.display()));
                None
            }
        }
    }

    fn create_grant(&self, directory: &Path) -> Result<SaveDirectoryGrant, ApiError> {
        let token = self.grants.create_token(directory)?;
        let session = AccessSession::start(Arc::clone(&self.grants), directory).ok_or_else(|| {
            ApiError::IoError {
                message: format!("Access to '{}' was refused", directory.display()),
            }
        })?;

        self.prefs.set_bytes(KEY_SAVE_DIRECTORY_GRANT, &token)?;

        let grant = SaveDirectoryGrant {
            directory: directory.to_path_buf(),
            token,
        };

        // Replacing the slot drops the previous session, stopping its access
        *self.slot() = Some(ActiveGrant {
            grant: grant.clone(),
            _session: session,
        });
        Ok(grant)
    }

    fn activate(&self, grant: SaveDirectoryGrant) -> Option<SaveDirectoryGrant> {
        let Some(session) = AccessSession::start(Arc::clone(&self.grants), &grant.directory) else {
            log::warn!(
                "Access refused for restored save directory: dir={}",
                grant.directory.display()
            );
            return None;
        };
        *self.slot() = Some(ActiveGrant {
            grant: grant.clone(),
            _session: session,
        });
        Some(grant)
    }

    /// The grant currently in use.
    pub fn current(&self) -> Option<SaveDirectoryGrant> {
        self.slot().as_ref().map(|active| active.grant.clone())
    }

    /// Directory of the grant currently in use.
    pub fn current_dir(&self) -> Option<PathBuf> {
        self.slot()
            .as_ref()
            .map(|active| active.grant.directory.clone())
    }

    /// Stop the current access session without forgetting the persisted token.
    pub fn release(&self) {
        if self.slot().take().is_some() {
            log::debug!("Save directory access released");
        }
    }
}
