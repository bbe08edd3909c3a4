//! Application wiring: configuration and the component graph.
//!
//! `ShottyApp` builds every component once and hands each its collaborators
//! explicitly. The embedding layer supplies the host traits (surface, window,
//! capture) and drives the app through the methods below.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::types::{
    ActivePlugin, ApiError, PickerKind, PickerRequestedEvent, PluginDescriptor,
    SaveDirectoryGrant,
};
use crate::plugins::store::{PluginStore, DEFAULT_PLUGIN_NAME};
use crate::protocols::host::{RenderSurface, ScreenCapture, WindowControl};
use crate::runtime::bridge_channel::BridgeChannel;
use crate::runtime::downloads::Downloader;
use crate::runtime::notifier::Notifier;
use crate::runtime::pickers::PickerHub;
use crate::runtime::preferences::{JsonPreferenceStore, PreferenceStore};
use crate::runtime::save_location::{AccessGrants, PathGrants, SaveLocationManager};
use crate::runtime::update_agent::{
    HttpUpdateSource, UpdateAgent, UpdateSource, DEFAULT_UPDATE_INTERVAL, DEFAULT_UPDATE_URL,
};

/// Development server loaded by `use_live_endpoint`
pub const DEFAULT_LIVE_ENDPOINT: &str = "http://localhost:5173/";

const APP_DIR_NAME: &str = "shotty";

pub const ENV_PLUGIN_DIR: &str = "SHOTTY_PLUGIN_DIR";
pub const ENV_PREFERENCES: &str = "SHOTTY_PREFERENCES";
pub const ENV_DEFAULT_ASSET: &str = "SHOTTY_DEFAULT_ASSET";
pub const ENV_UPDATE_URL: &str = "SHOTTY_UPDATE_URL";
pub const ENV_UPDATE_INTERVAL_SECS: &str = "SHOTTY_UPDATE_INTERVAL_SECS";
pub const ENV_LIVE_ENDPOINT: &str = "SHOTTY_LIVE_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShottyConfig {
    /// Directory holding one subdirectory per plugin
    pub plugin_root: PathBuf,
    pub preferences_path: PathBuf,
    pub default_plugin_name: String,
    /// Bundled copy of the default plugin
    pub default_asset: Option<PathBuf>,
    pub update_url: String,
    pub update_interval: Duration,
    pub live_endpoint: String,
}

impl Default for ShottyConfig {
    /// Platform config directory layout:
    ///   macOS:   ~/Library/Application Support/shotty/
    ///   Linux:   ~/.config/shotty/
    ///   Windows: %APPDATA%/shotty/
    fn default() -> Self {
        let base = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        let default_asset = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .map(|dir| dir.join("resources").join(DEFAULT_PLUGIN_NAME));

        Self {
            plugin_root: base.join("plugins"),
            preferences_path: base.join("preferences.json"),
            default_plugin_name: DEFAULT_PLUGIN_NAME.to_string(),
            default_asset,
            update_url: DEFAULT_UPDATE_URL.to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            live_endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
        }
    }
}

impl ShottyConfig {
    /// Defaults overridden by `SHOTTY_*` environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ApiError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = get(ENV_PLUGIN_DIR) {
            self.plugin_root = PathBuf::from(dir);
        }
        if let Some(path) = get(ENV_PREFERENCES) {
            self.preferences_path = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_DEFAULT_ASSET) {
            self.default_asset = Some(PathBuf::from(path));
        }
        if let Some(url) = get(ENV_UPDATE_URL) {
            self.update_url = url;
        }
        if let Some(url) = get(ENV_LIVE_ENDPOINT) {
            if !matches!(ActivePlugin::parse(&url), ActivePlugin::LiveEndpoint { .. }) {
                return Err(ApiError::InvalidInput {
                    message: format!("{ENV_LIVE_ENDPOINT} must be an http(s) URL: {url}"),
                });
            }
            self.live_endpoint = url;
        }
        if let Some(secs) = get(ENV_UPDATE_INTERVAL_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| ApiError::InvalidInput {
                message: format!("{ENV_UPDATE_INTERVAL_SECS} must be a number of seconds: {secs}"),
            })?;
            if secs == 0 {
                return Err(ApiError::InvalidInput {
                    message: format!("{ENV_UPDATE_INTERVAL_SECS} must be greater than zero"),
                });
            }
            self.update_interval = Duration::from_secs(secs);
        }

        Ok(self)
    }
}

/// Collaborators supplied by the embedding layer.
pub struct ShottyHost {
    pub surface: Arc<dyn RenderSurface>,
    pub window: Arc<dyn WindowControl>,
    pub capture: Arc<dyn ScreenCapture>,
}

/// Shared HTTP client for update checks and link downloads.
pub fn http_client() -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .user_agent(concat!("shotty/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ApiError::NetworkError {
            message: format!("Failed to build HTTP client: {e}"),
        })
}

pub struct ShottyApp {
    config: ShottyConfig,
    notifier: Arc<Notifier>,
    store: Arc<PluginStore>,
    save_location: Arc<SaveLocationManager>,
    pickers: Arc<PickerHub>,
    bridge: Arc<BridgeChannel>,
    updates: Arc<UpdateAgent>,
    window: Arc<dyn WindowControl>,
    capture: Arc<dyn ScreenCapture>,
}

impl ShottyApp {
    /// Wire every component.
    ///
    /// # Returns
    ///
    /// The app and the receiver on which the embedding layer gets picker
    /// requests; answer them with `pickers().respond(..)`.
    pub fn new(
        config: ShottyConfig,
        host: ShottyHost,
        prefs: Arc<dyn PreferenceStore>,
        grants: Arc<dyn AccessGrants>,
        update_source: Arc<dyn UpdateSource>,
        client: reqwest::Client,
    ) -> (Self, mpsc::UnboundedReceiver<PickerRequestedEvent>) {
        let notifier = Arc::new(Notifier::new());

        let store = Arc::new(PluginStore::new(
            config.plugin_root.clone(),
            config.default_plugin_name.clone(),
            config.default_asset.clone(),
            Arc::clone(&prefs),
            Arc::clone(&notifier),
        ));

        let save_location = Arc::new(SaveLocationManager::new(
            grants,
            Arc::clone(&prefs),
            Arc::clone(&notifier),
        ));

        let (hub, picker_rx) = PickerHub::new();
        let pickers = Arc::new(hub);

        let bridge = BridgeChannel::new(
            host.surface,
            Arc::clone(&host.window),
            Arc::clone(&store),
            Arc::clone(&save_location),
            Arc::clone(&pickers),
            Downloader::new(client),
            Arc::clone(&notifier),
        );

        let updates = UpdateAgent::new(
            update_source,
            Arc::clone(&store),
            prefs,
            Arc::clone(&notifier),
            bridge.clone(),
            config.update_interval,
        );

        let app = Self {
            config,
            notifier,
            store,
            save_location,
            pickers,
            bridge,
            updates,
            window: host.window,
            capture: host.capture,
        };
        (app, picker_rx)
    }

    /// Wire the app with file-backed preferences, path grants and HTTP updates.
    pub fn with_defaults(
        config: ShottyConfig,
        host: ShottyHost,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PickerRequestedEvent>), ApiError> {
        let client = http_client()?;
        let prefs = Arc::new(JsonPreferenceStore::open(config.preferences_path.clone()));
        let source = Arc::new(HttpUpdateSource::new(client.clone(), config.update_url.clone()));
        Ok(Self::new(
            config,
            host,
            prefs,
            Arc::new(PathGrants),
            source,
            client,
        ))
    }

    pub fn config(&self) -> &ShottyConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn store(&self) -> &Arc<PluginStore> {
        &self.store
    }

    pub fn save_location(&self) -> &Arc<SaveLocationManager> {
        &self.save_location
    }

    pub fn pickers(&self) -> &Arc<PickerHub> {
        &self.pickers
    }

    pub fn bridge(&self) -> &Arc<BridgeChannel> {
        &self.bridge
    }

    pub fn updates(&self) -> &Arc<UpdateAgent> {
        &self.updates
    }

    /// Startup sequence: default plugin, catalog, save grant, active plugin.
    ///
    /// # Returns
    ///
    /// The plugin loaded into the surface, if any.
    pub async fn startup(&self) -> Option<ActivePlugin> {
        self.store.bootstrap_default().await;
        let plugins = self.store.reload().await;
        let grant = self.save_location.restore();

        log::info!(
            "Startup: plugins={}, save_dir={:?}",
            plugins.len(),
            grant.as_ref().map(|g| g.directory.display().to_string())
        );

        let active = self.store.active_plugin().await?;
        self.bridge.load(&active).await.ok()?;
        Some(active)
    }

    /// Start the periodic update check.
    pub fn start_updates(&self) -> JoinHandle<()> {
        self.updates.start()
    }

    /// Capture the screen and open the result in the editor.
    ///
    /// Returns whether an image was handed to the editor.
    pub async fn capture_and_edit(&self) -> bool {
        match self.capture.capture().await {
            Ok(Some(image)) => {
                self.bridge.set_image(Some(image)).await;
                self.window.show_editor();
                true
            }
            Ok(None) => {
                self.notifier.info("Capture cancelled");
                false
            }
            Err(e) => {
                self.notifier.error(format!("Screen capture failed: {e}"));
                false
            }
        }
    }

    /// Make `plugin_id` the preferred plugin and load it.
    pub async fn select_plugin(&self, plugin_id: &str) -> Result<(), ApiError> {
        self.store.set_preferred(plugin_id).await;
        self.bridge
            .load(&ActivePlugin::Installed {
                plugin_id: plugin_id.to_string(),
            })
            .await
            .map(|_| ())
    }

    /// Load the development endpoint without changing the preference.
    pub async fn use_live_endpoint(&self) -> Result<(), ApiError> {
        let live = ActivePlugin::parse(&self.config.live_endpoint);
        if self.bridge.load(&live).await? {
            return Ok(());
        }
        // Already showing it: reload to pick up changes
        self.bridge.reload_active().await
    }

    /// Install a plugin bundle; `overwrite` replaces an existing one.
    pub async fn install_plugin(
        &self,
        source: &Path,
        overwrite: bool,
    ) -> Result<PluginDescriptor, ApiError> {
        if overwrite {
            self.store.overwrite(source).await
        } else {
            self.store.install(source).await
        }
    }

    /// Ask the user for a new save directory and grant it.
    pub async fn choose_save_directory(&self) -> Option<SaveDirectoryGrant> {
        match self.pickers.request(PickerKind::Directory).await {
            Ok(Some(paths)) => self.save_location.grant(paths.first()?),
            Ok(None) => None,
            Err(e) => {
                self.notifier
                    .error(format!("Could not choose a save directory: {e}"));
                None
            }
        }
    }

    /// Release OS-level resources before exit.
    pub fn shutdown(&self) {
        self.save_location.release();
        log::info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::DocumentSource;
    use crate::capture::CapturedImage;
    use crate::protocols::host::DocumentLoad;
    use crate::runtime::preferences::{MemoryPreferenceStore, KEY_PREFERRED_PLUGIN};
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSurface {
        loads: Mutex<Vec<DocumentLoad>>,
        scripts: AtomicUsize,
    }

    #[async_trait]
    impl RenderSurface for RecordingSurface {
        async fn navigate(&self, load: DocumentLoad) -> Result<(), ApiError> {
            self.loads.lock().unwrap().push(load);
            Ok(())
        }

        async fn evaluate_script(&self, _script: &str) -> Result<(), ApiError> {
            self.scripts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingWindow {
        shown: AtomicUsize,
    }

    impl WindowControl for CountingWindow {
        fn close_editor(&self) {}

        fn show_editor(&self) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedCapture(Option<CapturedImage>);

    #[async_trait]
    impl ScreenCapture for FixedCapture {
        async fn capture(&self) -> Result<Option<CapturedImage>, ApiError> {
            Ok(self.0.clone())
        }
    }

    struct CurrentSource;

    #[async_trait]
    impl UpdateSource for CurrentSource {
        async fn remote_validator(&self) -> Result<Option<String>, ApiError> {
            Ok(None)
        }

        async fn download(&self, _dest: &Path) -> Result<u64, ApiError> {
            Err(ApiError::NetworkError {
                message: "offline".to_string(),
            })
        }
    }

    struct Fixture {
        base: PathBuf,
        app: ShottyApp,
        surface: Arc<RecordingSurface>,
        window: Arc<CountingWindow>,
        prefs: Arc<MemoryPreferenceStore>,
    }

    impl Fixture {
        fn new(capture: Option<CapturedImage>) -> Self {
            let base = std::env::temp_dir().join(format!("shotty_app_{}", Uuid::new_v4()));
            let asset = base.join("resources").join(DEFAULT_PLUGIN_NAME);
            std::fs::create_dir_all(&asset).unwrap();
            std::fs::write(asset.join("index.html"), "default").unwrap();

            let config = ShottyConfig {
                plugin_root: base.join("plugins"),
                preferences_path: base.join("preferences.json"),
                default_asset: Some(asset),
                ..ShottyConfig::default()
            };

            let surface = Arc::new(RecordingSurface::default());
            let window = Arc::new(CountingWindow::default());
            let prefs = Arc::new(MemoryPreferenceStore::new());
            let host = ShottyHost {
                surface: surface.clone(),
                window: window.clone(),
                capture: Arc::new(FixedCapture(capture)),
            };

            let (app, _picker_rx) = ShottyApp::new(
                config,
                host,
                prefs.clone(),
                Arc::new(PathGrants),
                Arc::new(CurrentSource),
                reqwest::Client::new(),
            );

            Self {
                base,
                app,
                surface,
                window,
                prefs,
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.base);
        }
    }

    #[test]
    fn test_config_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_PLUGIN_DIR, "/srv/shotty/plugins"),
            (ENV_UPDATE_INTERVAL_SECS, "3600"),
            (ENV_LIVE_ENDPOINT, "HTTPS://dev.local:8443/"),
            (ENV_UPDATE_URL, ""),
        ]
        .into_iter()
        .collect();

        let config = ShottyConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.plugin_root, PathBuf::from("/srv/shotty/plugins"));
        assert_eq!(config.update_interval, Duration::from_secs(3600));
        assert_eq!(config.live_endpoint, "HTTPS://dev.local:8443/");
        assert_eq!(config.update_url, DEFAULT_UPDATE_URL);
        assert_eq!(config.default_plugin_name, DEFAULT_PLUGIN_NAME);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let zero = ShottyConfig::default()
            .with_overrides(|key| (key == ENV_UPDATE_INTERVAL_SECS).then(|| "0".to_string()));
        assert!(matches!(zero, Err(ApiError::InvalidInput { .. })));

        let words = ShottyConfig::default()
            .with_overrides(|key| (key == ENV_UPDATE_INTERVAL_SECS).then(|| "daily".to_string()));
        assert!(matches!(words, Err(ApiError::InvalidInput { .. })));

        let endpoint = ShottyConfig::default()
            .with_overrides(|key| (key == ENV_LIVE_ENDPOINT).then(|| "localhost".to_string()));
        assert!(matches!(endpoint, Err(ApiError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_startup_bootstraps_and_loads_default() {
        let fx = Fixture::new(None);

        let active = fx.app.startup().await;
        assert_eq!(
            active,
            Some(ActivePlugin::Installed {
                plugin_id: DEFAULT_PLUGIN_NAME.to_string()
            })
        );
        assert_eq!(
            fx.prefs.get_string(KEY_PREFERRED_PLUGIN).as_deref(),
            Some(DEFAULT_PLUGIN_NAME)
        );
        assert_eq!(fx.app.store().plugins().await.len(), 1);
        assert_eq!(fx.surface.loads.lock().unwrap().len(), 1);

        // Second startup is a no-op for the surface
        fx.app.startup().await;
        assert_eq!(fx.surface.loads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_capture_and_edit() {
        let fx = Fixture::new(Some(CapturedImage::new(DynamicImage::new_rgba8(2, 2))));
        fx.app.startup().await;

        assert!(fx.app.capture_and_edit().await);
        assert_eq!(fx.window.shown.load(Ordering::SeqCst), 1);
        assert_eq!(fx.surface.scripts.load(Ordering::SeqCst), 1);
        assert!(!fx.app.bridge().current_payload().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_capture_shows_notice() {
        let fx = Fixture::new(None);
        assert!(!fx.app.capture_and_edit().await);
        assert_eq!(fx.window.shown.load(Ordering::SeqCst), 0);
        assert_eq!(
            fx.app.notifier().current().map(|n| n.message),
            Some("Capture cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn test_live_endpoint_and_plugin_selection() {
        let fx = Fixture::new(None);
        fx.app.startup().await;

        fx.app.use_live_endpoint().await.unwrap();
        fx.app.use_live_endpoint().await.unwrap();
        {
            let loads = fx.surface.loads.lock().unwrap();
            assert_eq!(loads.len(), 3);
            assert_eq!(
                loads[1].source,
                DocumentSource::Url(DEFAULT_LIVE_ENDPOINT.to_string())
            );
        }
        // The live endpoint is never persisted
        assert_eq!(
            fx.prefs.get_string(KEY_PREFERRED_PLUGIN).as_deref(),
            Some(DEFAULT_PLUGIN_NAME)
        );

        fx.app.select_plugin(DEFAULT_PLUGIN_NAME).await.unwrap();
        assert_eq!(fx.surface.loads.lock().unwrap().len(), 4);

        let missing = fx.app.select_plugin("ghost").await;
        assert!(matches!(missing, Err(ApiError::PluginNotFound { .. })));
        assert!(fx.app.store().is_preferred("ghost"));
        assert_eq!(fx.app.store().active_plugin().await, None);
    }
}
