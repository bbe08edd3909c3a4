//! BridgeChannel - host side of the plugin bridge.
//!
//! Owns what the rendering surface shows (the loaded plugin and the current
//! image) and answers what page script asks for (save, dismiss, pickers,
//! downloads).
//!
//! # Image hand-off
//!
//! Only the latest image is kept. Every change is sent as the full payload
//! (level-triggered), so a failed injection heals on the next change. Each
//! `set_image` call takes a sequence number before encoding; a call that
//! finishes encoding after a newer one has been applied is dropped.
//!
//! # Serialization
//!
//! All state changes and all surface calls happen under one async lock, so
//! navigations and script injections reach the surface in call order.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::api::types::{ActivePlugin, ApiError, PickerKind};
use crate::capture::CapturedImage;
use crate::plugins::store::PluginStore;
use crate::protocols::bridge::{
    bootstrap_script, decode_payload, image_change_script, save_file_name, BridgeMessage,
    MESSAGE_CHANNELS,
};
use crate::protocols::host::{DocumentLoad, ReloadSignal, RenderSurface, WindowControl};
use crate::runtime::downloads::{is_downloadable, Downloader};
use crate::runtime::fs::{move_file, write_file_atomic};
use crate::runtime::notifier::Notifier;
use crate::runtime::pickers::PickerHub;
use crate::runtime::save_location::SaveLocationManager;

/// Answer to a navigation request from inside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    /// Navigation was cancelled; the target is downloaded out of band
    Cancel,
}

#[derive(Default)]
struct BridgeState {
    /// Plugin currently loaded into the surface
    loaded: Option<ActivePlugin>,
    image: Option<CapturedImage>,
    /// Transport form of `image` ("" when there is none)
    payload: String,
    /// Sequence number of the applied image
    image_seq: u64,
}

pub struct BridgeChannel {
    surface: Arc<dyn RenderSurface>,
    window: Arc<dyn WindowControl>,
    store: Arc<PluginStore>,
    save_location: Arc<SaveLocationManager>,
    pickers: Arc<PickerHub>,
    downloader: Downloader,
    notifier: Arc<Notifier>,
    state: Mutex<BridgeState>,
    next_image_seq: AtomicU64,
    /// Runtime for work started from non-async callbacks (navigation policy)
    runtime: Option<Handle>,
}

impl BridgeChannel {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        window: Arc<dyn WindowControl>,
        store: Arc<PluginStore>,
        save_location: Arc<SaveLocationManager>,
        pickers: Arc<PickerHub>,
        downloader: Downloader,
        notifier: Arc<Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            surface,
            window,
            store,
            save_location,
            pickers,
            downloader,
            notifier,
            state: Mutex::new(BridgeState::default()),
            next_image_seq: AtomicU64::new(1),
            runtime: Handle::try_current().ok(),
        })
    }

    /// Load `plugin` into the surface unless it is already loaded.
    ///
    /// # Returns
    ///
    /// `Ok(true)` if a navigation happened, `Ok(false)` if `plugin` was
    /// already loaded. Failures are also shown through the notifier.
    pub async fn load(&self, plugin: &ActivePlugin) -> Result<bool, ApiError> {
        let mut state = self.state.lock().await;

        if state.loaded.as_ref() == Some(plugin) {
            log::debug!("Load skipped, already loaded: source={}", plugin.source_key());
            return Ok(false);
        }

        self.navigate(&mut state, plugin).await?;
        Ok(true)
    }

    /// Reload whatever is loaded, even if unchanged.
    pub async fn reload_active(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        let Some(plugin) = state.loaded.clone() else {
            log::debug!("Reload skipped, nothing loaded");
            return Ok(());
        };
        self.navigate(&mut state, &plugin).await
    }

    async fn navigate(&self, state: &mut BridgeState, plugin: &ActivePlugin) -> Result<(), ApiError> {
        let result = async {
            let source = self.store.resolve_document(plugin)?;
            let load = DocumentLoad {
                source,
                user_script: bootstrap_script(&state.payload),
                message_channels: MESSAGE_CHANNELS.to_vec(),
            };
            self.surface.navigate(load).await
        }
        .await;

        match result {
            Ok(()) => {
                log::info!("Plugin loaded: source={}", plugin.source_key());
                state.loaded = Some(plugin.clone());
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "Plugin load failed: source={}, error={e}",
                    plugin.source_key()
                );
                self.notifier
                    .error(format!("Failed to load {}: {e}", plugin.source_key()));
                Err(e)
            }
        }
    }

    /// The plugin currently loaded into the surface.
    pub async fn loaded(&self) -> Option<ActivePlugin> {
        self.state.lock().await.loaded.clone()
    }

    /// Hand a new image (or none) to the surface.
    ///
    /// Never fails: encoding and script errors are shown through the
    /// notifier and the next change resends the full state.
    pub async fn set_image(&self, image: Option<CapturedImage>) {
        let seq = self.next_image_seq.fetch_add(1, Ordering::SeqCst);

        let encoded = match &image {
            Some(image) => {
                let image = image.clone();
                tokio::task::spawn_blocking(move || image.to_png_base64())
                    .await
                    .map_err(|e| ApiError::IoError {
                        message: format!("Failed to spawn blocking task: {e}"),
                    })
                    .and_then(|r| r)
            }
            None => Ok(String::new()),
        };

        self.apply_image(seq, image, encoded).await;
    }

    /// Apply an encoded image unless a newer request already claimed the slot.
    ///
    /// A failed encode still claims its sequence number, so an older image
    /// finishing later cannot overtake it.
    async fn apply_image(
        &self,
        seq: u64,
        image: Option<CapturedImage>,
        encoded: Result<String, ApiError>,
    ) {
        let mut state = self.state.lock().await;
        if seq < state.image_seq {
            log::debug!("Image superseded before hand-off: seq={seq}");
            return;
        }
        state.image_seq = seq;

        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                self.notifier.error(format!("Failed to prepare image: {e}"));
                return;
            }
        };

        if state.image == image {
            return;
        }
        state.image = image;
        state.payload = payload;

        if state.loaded.is_none() {
            // The bootstrap script of the next load carries the payload
            return;
        }

        if let Err(e) = self
            .surface
            .evaluate_script(&image_change_script(&state.payload))
            .await
        {
            log::warn!("Image injection failed: seq={seq}, error={e}");
            self.notifier.error(format!("Failed to update editor: {e}"));
        }
    }

    /// Transport payload of the current image ("" when there is none).
    pub async fn current_payload(&self) -> String {
        self.state.lock().await.payload.clone()
    }

    /// Entry point for messages posted by page script.
    ///
    /// Undecodable messages are dropped without a notice.
    pub async fn handle_message(&self, channel: &str, body: serde_json::Value) {
        match BridgeMessage::decode(channel, body) {
            Ok(BridgeMessage::SaveImage {
                payload,
                close_after,
            }) => {
                self.save_image(&payload, close_after).await;
            }
            Ok(BridgeMessage::Dismiss) => {
                log::debug!("Editor dismissed by plugin");
                self.window.close_editor();
            }
            Err(e) => {
                log::debug!("Dropped bridge message: channel={channel}, error={e}");
            }
        }
    }

    /// Save an edited image posted by the plugin.
    ///
    /// Writes into the granted save directory, asking for one first if none
    /// is set. A malformed payload is dropped silently.
    ///
    /// # Returns
    ///
    /// The written file, or `None` if nothing was saved.
    pub async fn save_image(&self, payload: &str, close_after: bool) -> Option<PathBuf> {
        let decoded = match decode_payload(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::debug!("Ignoring malformed save payload: {e}");
                return None;
            }
        };

        let directory = match self.save_location.current_dir() {
            Some(directory) if is_directory(&directory).await => directory,
            Some(missing) => {
                log::warn!(
                    "Granted save directory is gone, asking again: dir={}",
                    missing.display()
                );
                self.save_location.release();
                self.choose_save_directory().await?
            }
            None => self.choose_save_directory().await?,
        };

        let path = directory.join(save_file_name(
            chrono::Local::now().naive_local(),
            decoded.extension,
        ));

        match write_file_atomic(&path, &decoded.bytes).await {
            Ok(bytes) => {
                log::info!("Image saved: path={}, bytes={bytes}", path.display());
                self.notifier.success(format!("Saved to {}", path.display()));
                if close_after {
                    self.window.close_editor();
                }
                Some(path)
            }
            Err(e) => {
                self.notifier.error(format!("Failed to save image: {e}"));
                None
            }
        }
    }

    /// Ask the user for a save directory and grant it.
    async fn choose_save_directory(&self) -> Option<PathBuf> {
        match self.pickers.request(PickerKind::Directory).await {
            Ok(Some(paths)) => {
                let directory = paths.into_iter().next()?;
                self.save_location
                    .grant(&directory)
                    .map(|grant| grant.directory)
            }
            Ok(None) => {
                log::info!("Save directory selection cancelled");
                None
            }
            Err(e) => {
                self.notifier
                    .error(format!("Could not choose a save directory: {e}"));
                None
            }
        }
    }

    /// Native open dialog on behalf of page script.
    ///
    /// `None` when the user cancelled or the dialog could not be shown.
    pub async fn pick_files(&self, allow_multiple: bool) -> Option<Vec<PathBuf>> {
        match self
            .pickers
            .request(PickerKind::OpenFiles { allow_multiple })
            .await
        {
            Ok(Some(mut paths)) => {
                if !allow_multiple {
                    paths.truncate(1);
                }
                Some(paths)
            }
            Ok(None) => None,
            Err(ApiError::PickerInProgress) => {
                log::debug!("File picker skipped, another picker is open");
                None
            }
            Err(e) => {
                self.notifier.error(format!("Could not open files: {e}"));
                None
            }
        }
    }

    /// Decide whether the surface may follow a navigation.
    ///
    /// Activated links to downloadable files are cancelled and fetched in
    /// the background instead. Callable from threads outside the runtime:
    /// the download runs on the runtime the channel was created in. With no
    /// runtime at all the navigation is allowed.
    pub fn decide_navigation(self: &Arc<Self>, url: &str, link_activated: bool) -> NavigationDecision {
        if !link_activated || !is_downloadable(url) {
            return NavigationDecision::Allow;
        }

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            log::warn!("No async runtime for download, allowing navigation: url={url}");
            return NavigationDecision::Allow;
        };

        log::info!("Intercepted download link: url={url}");
        let bridge = Arc::clone(self);
        let url = url.to_string();
        runtime.spawn(async move {
            bridge.download_to_user_location(&url).await;
        });
        NavigationDecision::Cancel
    }

    /// Download `url` and move it where the user chooses.
    pub async fn download_to_user_location(&self, url: &str) -> Option<PathBuf> {
        let file = match self.downloader.fetch(url).await {
            Ok(file) => file,
            Err(e) => {
                self.notifier.error(format!("Download failed: {e}"));
                return None;
            }
        };

        let selection = self
            .pickers
            .request(PickerKind::SaveFile {
                suggested_name: file.suggested_name.clone(),
            })
            .await;

        let destination = match selection {
            Ok(Some(paths)) => paths.into_iter().next(),
            Ok(None) => None,
            Err(e) => {
                self.notifier.error(format!("Could not save download: {e}"));
                None
            }
        };

        let Some(destination) = destination else {
            let _ = tokio::fs::remove_file(&file.path).await;
            return None;
        };

        match move_file(&file.path, &destination).await {
            Ok(()) => {
                self.notifier
                    .success(format!("Downloaded {}", file.suggested_name));
                Some(destination)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&file.path).await;
                self.notifier.error(format!("Could not save download: {e}"));
                None
            }
        }
    }
}

#[async_trait]
impl ReloadSignal for BridgeChannel {
    async fn force_reload(&self) {
        // Failures are already reported through the notifier
        let _ = self.reload_active().await;
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
