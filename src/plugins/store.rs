//! Plugin Store - filesystem-backed registry of installed plugin bundles.
//!
//! # Directory Structure
//!
//! ```text
//! <plugin root>/
//! ├── shotty/              # default plugin, refreshed by the update agent
//! │   └── index.html
//! ├── my-annotator/
//! │   ├── index.html
//! │   └── assets/...
//! └── .staging-<uuid>/     # hidden, transient install staging
//! ```
//!
//! A plugin is any visible subdirectory; its name is the identifier. Only
//! the preferred identifier is persisted. Filesystem failures are reported
//! through the notifier and never leave a half-copied bundle behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::api::types::{ActivePlugin, ApiError, DocumentSource, PluginDescriptor};
use crate::runtime::archive::{extract_zip, find_bundle_root};
use crate::runtime::fs::{copy_dir_recursive, remove_path, staging_dir, swap_into_place};
use crate::runtime::notifier::Notifier;
use crate::runtime::path::{
    canonicalize_directory, is_hidden_name, plugin_dir_in_root, resolve_path_in_bundle,
    validate_plugin_id,
};
use crate::runtime::preferences::{PreferenceStore, KEY_PREFERRED_PLUGIN};

/// Name of the plugin shipped with the application
pub const DEFAULT_PLUGIN_NAME: &str = "shotty";

/// Entry document every plugin bundle must provide
pub const ENTRY_DOCUMENT: &str = "index.html";

/// A bundle copied into a hidden staging location, ready to be renamed in.
struct StagedBundle {
    /// Directory to rename onto the destination
    bundle: PathBuf,
    /// Scratch directory to remove afterwards (may equal `bundle`)
    scratch: PathBuf,
}

pub struct PluginStore {
    root: PathBuf,
    default_name: String,
    /// Bundled copy of the default plugin, used by `bootstrap_default`
    default_asset: Option<PathBuf>,
    prefs: Arc<dyn PreferenceStore>,
    notifier: Arc<Notifier>,
    /// Catalog from the last `reload`
    catalog: Mutex<Vec<PluginDescriptor>>,
    /// Single-writer lock for the plugin root
    root_lock: Mutex<()>,
}

impl PluginStore {
    /// Create a store over `root`.
    ///
    /// # Arguments
    ///
    /// * `root` - Plugin root directory (created by `bootstrap_default`)
    /// * `default_name` - Directory name of the default plugin
    /// * `default_asset` - Bundled default plugin to copy on first start
    /// * `prefs` - Preference store holding the preferred identifier
    /// * `notifier` - Sink for user-visible failures
    pub fn new(
        root: PathBuf,
        default_name: impl Into<String>,
        default_asset: Option<PathBuf>,
        prefs: Arc<dyn PreferenceStore>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            root,
            default_name: default_name.into(),
            default_asset,
            prefs,
            notifier,
            catalog: Mutex::new(Vec::new()),
            root_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Take the single-writer lock for the plugin root.
    ///
    /// Held by install, overwrite, bootstrap and the update agent's
    /// replace step so they never interleave.
    pub async fn lock_root(&self) -> MutexGuard<'_, ()> {
        self.root_lock.lock().await
    }

    /// Rescan the plugin root.
    ///
    /// Fails soft: an unreadable root yields an empty catalog and a notice.
    pub async fn reload(&self) -> Vec<PluginDescriptor> {
        let plugins = match self.scan().await {
            Ok(plugins) => plugins,
            Err(e) => {
                self.notifier.error(format!("Failed to load plugins: {e}"));
                Vec::new()
            }
        };

        log::debug!("Plugins reloaded: count={}", plugins.len());
        *self.catalog.lock().await = plugins.clone();
        plugins
    }

    async fn scan(&self) -> Result<Vec<PluginDescriptor>, ApiError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| ApiError::IoError {
                message: format!("Failed to read '{}': {e}", self.root.display()),
            })?;

        let preferred = self.preferred();
        let mut plugins = Vec::new();

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(ApiError::IoError {
                        message: format!("Failed to read '{}': {e}", self.root.display()),
                    })
                }
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if is_hidden_name(&name) {
                continue;
            }
            // Follows symlinks so a linked development checkout counts as a plugin
            let is_dir = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            plugins.push(PluginDescriptor {
                is_default: preferred.as_deref() == Some(name.as_str()),
                root_dir: entry.path(),
                plugin_id: name,
            });
        }

        plugins.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        Ok(plugins)
    }

    /// Catalog from the last `reload`.
    pub async fn plugins(&self) -> Vec<PluginDescriptor> {
        self.catalog.lock().await.clone()
    }

    /// Whether something is installed under `name`.
    pub async fn exists(&self, name: &str) -> bool {
        match plugin_dir_in_root(&self.root, name) {
            Ok(dir) => tokio::fs::symlink_metadata(dir).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Install a bundle under its base name.
    ///
    /// Accepts a directory, a single `.html` file (becomes `<stem>/index.html`)
    /// or a `.zip` archive (extracted into `<stem>/`).
    ///
    /// # Errors
    ///
    /// Returns `PluginAlreadyExists` without touching anything when the name
    /// is taken; the caller decides whether to `overwrite`. Other failures
    /// are also shown through the notifier.
    pub async fn install(&self, source: &Path) -> Result<PluginDescriptor, ApiError> {
        self.install_bundle(source, false).await
    }

    /// Replace an installed plugin with `source`, or install it if absent.
    pub async fn overwrite(&self, source: &Path) -> Result<PluginDescriptor, ApiError> {
        self.install_bundle(source, true).await
    }

    async fn install_bundle(
        &self,
        source: &Path,
        replace: bool,
    ) -> Result<PluginDescriptor, ApiError> {
        let result = self.install_bundle_inner(source, replace).await;

        match &result {
            Ok(descriptor) => {
                log::info!(
                    "Plugin installed: plugin_id={}, replace={replace}",
                    descriptor.plugin_id
                );
                self.notifier
                    .success(format!("Installed plugin {}", descriptor.plugin_id));
            }
            Err(ApiError::PluginAlreadyExists { plugin_id }) => {
                log::info!("Plugin install needs overwrite decision: plugin_id={plugin_id}");
            }
            Err(e) => {
                log::error!(
                    "Plugin install failed: source={}, error={e}",
                    source.display()
                );
                self.notifier.error(format!("Failed to install plugin: {e}"));
            }
        }

        result
    }

    async fn install_bundle_inner(
        &self,
        source: &Path,
        replace: bool,
    ) -> Result<PluginDescriptor, ApiError> {
        let plugin_id = install_name(source)?;
        let dest = plugin_dir_in_root(&self.root, &plugin_id)?;

        let _guard = self.lock_root().await;

        self.ensure_root().await?;

        if !replace && tokio::fs::symlink_metadata(&dest).await.is_ok() {
            return Err(ApiError::PluginAlreadyExists { plugin_id });
        }

        self.stage_and_swap(source, &plugin_id, &dest).await?;

        let plugins = self.reload().await;
        Ok(plugins
            .into_iter()
            .find(|p| p.plugin_id == plugin_id)
            .unwrap_or_else(|| PluginDescriptor {
                is_default: self.is_preferred(&plugin_id),
                root_dir: dest,
                plugin_id,
            }))
    }

    /// Replace `plugin_id` with the bundle inside a zip `archive`.
    ///
    /// Other plugins are untouched. The installed bundle is only replaced
    /// once the archive has been fully extracted.
    pub async fn replace_from_archive(&self, archive: &Path, plugin_id: &str) -> Result<(), ApiError> {
        let dest = plugin_dir_in_root(&self.root, plugin_id)?;

        let _guard = self.lock_root().await;
        self.ensure_root().await?;
        self.stage_and_swap(archive, plugin_id, &dest).await
    }

    /// Stage `source` and rename it onto `dest`. Caller holds the root lock.
    async fn stage_and_swap(&self, source: &Path, plugin_id: &str, dest: &Path) -> Result<(), ApiError> {
        let staged = self.stage(source.to_path_buf(), plugin_id.to_string()).await?;
        let swapped = swap_into_place(&staged.bundle, dest).await;
        if let Err(e) = remove_path(&staged.scratch).await {
            log::warn!("Failed to clean up staging directory: {e}");
        }
        swapped
    }

    /// Copy `source` into a hidden staging directory under the root.
    async fn stage(&self, source: PathBuf, plugin_id: String) -> Result<StagedBundle, ApiError> {
        let scratch = staging_dir(&self.root);
        let scratch_for_task = scratch.clone();

        let staged = tokio::task::spawn_blocking(move || -> Result<StagedBundle, ApiError> {
            let scratch = scratch_for_task;
            let io_err = |e: std::io::Error| ApiError::IoError {
                message: format!("Failed to stage '{}': {e}", source.display()),
            };

            if source.is_dir() {
                copy_dir_recursive(&source, &scratch).map_err(io_err)?;
                return Ok(StagedBundle {
                    bundle: scratch.clone(),
                    scratch,
                });
            }

            match extension_of(&source).as_deref() {
                Some("html") | Some("htm") => {
                    std::fs::create_dir_all(&scratch).map_err(io_err)?;
                    std::fs::copy(&source, scratch.join(ENTRY_DOCUMENT)).map_err(io_err)?;
                    Ok(StagedBundle {
                        bundle: scratch.clone(),
                        scratch,
                    })
                }
                Some("zip") => {
                    extract_zip(&source, &scratch)?;
                    let bundle = find_bundle_root(&scratch, Some(&plugin_id)).ok_or_else(|| {
                        ApiError::InvalidInput {
                            message: format!(
                                "Archive '{}' does not contain a plugin bundle",
                                source.display()
                            ),
                        }
                    })?;
                    Ok(StagedBundle { bundle, scratch })
                }
                _ => Err(ApiError::InvalidInput {
                    message: format!("Unsupported plugin bundle: {}", source.display()),
                }),
            }
        })
        .await
        .map_err(|e| ApiError::IoError {
            message: format!("Failed to spawn blocking task: {e}"),
        })?;

        if staged.is_err() {
            let _ = remove_path(&scratch).await;
        }
        staged
    }

    async fn ensure_root(&self) -> Result<(), ApiError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ApiError::IoError {
                message: format!(
                    "Failed to create plugin directory '{}': {e}",
                    self.root.display()
                ),
            })
    }

    /// Persist the preferred plugin. No existence check: a missing plugin
    /// simply resolves to "no active plugin" later.
    pub async fn set_preferred(&self, plugin_id: &str) {
        if let Err(e) = self.prefs.set_string(KEY_PREFERRED_PLUGIN, plugin_id) {
            self.notifier
                .error(format!("Failed to save preferred plugin: {e}"));
            return;
        }

        log::info!("Preferred plugin set: plugin_id={plugin_id}");
        for plugin in self.catalog.lock().await.iter_mut() {
            plugin.is_default = plugin.plugin_id == plugin_id;
        }
    }

    /// The persisted preferred identifier, if any.
    pub fn preferred(&self) -> Option<String> {
        self.prefs.get_string(KEY_PREFERRED_PLUGIN)
    }

    pub fn is_preferred(&self, plugin_id: &str) -> bool {
        self.preferred().as_deref() == Some(plugin_id)
    }

    /// What should load on startup.
    ///
    /// A preferred identifier whose directory no longer exists (or is not
    /// a valid identifier) yields `None` rather than an error.
    pub async fn active_plugin(&self) -> Option<ActivePlugin> {
        let preferred = self.preferred()?;
        match ActivePlugin::parse(&preferred) {
            ActivePlugin::Installed { plugin_id } => {
                let dir = plugin_dir_in_root(&self.root, &plugin_id).ok()?;
                let is_dir = tokio::fs::metadata(&dir)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    Some(ActivePlugin::Installed { plugin_id })
                } else {
                    log::debug!("Preferred plugin is not installed: plugin_id={plugin_id}");
                    None
                }
            }
            live => Some(live),
        }
    }

    /// Resolve what the rendering surface should load for `plugin`.
    pub fn resolve_document(&self, plugin: &ActivePlugin) -> Result<DocumentSource, ApiError> {
        match plugin {
            ActivePlugin::LiveEndpoint { url } => Ok(DocumentSource::Url(url.clone())),
            ActivePlugin::Installed { plugin_id } => {
                let dir = plugin_dir_in_root(&self.root, plugin_id)?;
                let read_access = canonicalize_directory(&dir).map_err(|e| match e {
                    ApiError::PathNotFound { .. } | ApiError::PathNotDirectory { .. } => {
                        ApiError::PluginNotFound {
                            plugin_id: plugin_id.clone(),
                        }
                    }
                    other => other,
                })?;
                let entry = resolve_path_in_bundle(&read_access, ENTRY_DOCUMENT)?;
                Ok(DocumentSource::LocalFile { entry, read_access })
            }
        }
    }

    /// Make sure the plugin root and the default plugin exist.
    ///
    /// Idempotent: when the default plugin directory is present nothing is
    /// copied and the preference is left alone. Returns whether the default
    /// plugin was installed by this call.
    pub async fn bootstrap_default(&self) -> bool {
        let _guard = self.lock_root().await;

        if let Err(e) = self.ensure_root().await {
            self.notifier.error(e.to_string());
            return false;
        }

        let dest = self.root.join(&self.default_name);
        if tokio::fs::symlink_metadata(&dest).await.is_ok() {
            log::debug!("Default plugin present: path={}", dest.display());
            return false;
        }

        let asset = match self.default_asset.as_ref().filter(|p| p.is_dir()) {
            Some(asset) => asset.clone(),
            None => {
                let err = ApiError::DefaultAssetMissing {
                    path: self
                        .default_asset
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                };
                log::warn!("{err}");
                self.notifier.error(err.to_string());
                return false;
            }
        };

        if let Err(e) = self.stage_and_swap(&asset, &self.default_name, &dest).await {
            self.notifier
                .error(format!("Failed to install default plugin: {e}"));
            return false;
        }

        self.set_preferred(&self.default_name).await;
        log::info!("Default plugin installed: path={}", dest.display());
        true
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Identifier a source will be installed under.
fn install_name(source: &Path) -> Result<String, ApiError> {
    let metadata = std::fs::metadata(source).map_err(|_| ApiError::PathNotFound {
        path: source.display().to_string(),
    })?;

    let name = if metadata.is_dir() {
        source.file_name()
    } else {
        match extension_of(source).as_deref() {
            Some("html") | Some("htm") | Some("zip") => source.file_stem(),
            _ => {
                return Err(ApiError::InvalidInput {
                    message: format!("Unsupported plugin bundle: {}", source.display()),
                })
            }
        }
    };

    let name = name
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ApiError::InvalidInput {
            message: format!("Cannot derive a plugin name from {}", source.display()),
        })?;

    validate_plugin_id(&name)?;
    Ok(name)
}
