//! UpdateAgent - keeps the default plugin current.
//!
//! # Cycle
//!
//! ```text
//! Idle → Checking → UpToDate
//!                 → Downloading → Installing → Installed | Failed
//! ```
//!
//! Every terminal state returns to `Idle`. A cycle runs once on start and
//! then on a fixed interval. Each tick spawns its own cycle; a tick that
//! finds a cycle still running is skipped.
//!
//! The remote archive is checked with a HEAD request and only downloaded
//! when its validator (ETag, else Last-Modified) differs from the one
//! persisted after the last install.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::api::types::{ApiError, UpdateOutcome, UpdateStatus};
use crate::plugins::store::PluginStore;
use crate::protocols::host::ReloadSignal;
use crate::runtime::downloads::stream_to_file;
use crate::runtime::notifier::Notifier;
use crate::runtime::preferences::{PreferenceStore, KEY_UPDATE_VALIDATOR};

/// Time between scheduled checks
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Remote location of the default plugin archive
pub const DEFAULT_UPDATE_URL: &str = "https://shotty.app/plugins/shotty.zip";

/// Where plugin updates come from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Metadata-only lookup of the remote content validator.
    async fn remote_validator(&self) -> Result<Option<String>, ApiError>;

    /// Download the archive body to `dest`. Returns the number of bytes written.
    async fn download(&self, dest: &Path) -> Result<u64, ApiError>;
}

/// Update source backed by a single HTTP(S) URL.
pub struct HttpUpdateSource {
    client: reqwest::Client,
    url: String,
}

impl HttpUpdateSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl UpdateSource for HttpUpdateSource {
    async fn remote_validator(&self) -> Result<Option<String>, ApiError> {
        let resp = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| ApiError::NetworkError {
                message: format!("Update check failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(ApiError::NetworkError {
                message: format!("Update check failed: HTTP {}", resp.status()),
            });
        }

        let headers = resp.headers();
        let validator = headers
            .get(reqwest::header::ETAG)
            .or_else(|| headers.get(reqwest::header::LAST_MODIFIED))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(validator)
    }

    async fn download(&self, dest: &Path) -> Result<u64, ApiError> {
        let mut resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ApiError::NetworkError {
                message: format!("Update download failed: {e}"),
            })?;

        if !resp.status().is_success() {
            return Err(ApiError::NetworkError {
                message: format!("Update download failed: HTTP {}", resp.status()),
            });
        }

        stream_to_file(&mut resp, dest).await
    }
}

/// Clears the busy flag when a cycle ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct UpdateAgent {
    source: Arc<dyn UpdateSource>,
    store: Arc<PluginStore>,
    prefs: Arc<dyn PreferenceStore>,
    notifier: Arc<Notifier>,
    reload: Arc<dyn ReloadSignal>,
    interval: Duration,
    busy: AtomicBool,
    status: watch::Sender<UpdateStatus>,
}

impl UpdateAgent {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        store: Arc<PluginStore>,
        prefs: Arc<dyn PreferenceStore>,
        notifier: Arc<Notifier>,
        reload: Arc<dyn ReloadSignal>,
        interval: Duration,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(UpdateStatus::Idle);
        Arc::new(Self {
            source,
            store,
            prefs,
            notifier,
            reload,
            interval,
            busy: AtomicBool::new(false),
            status,
        })
    }

    /// Watch the state machine.
    pub fn subscribe(&self) -> watch::Receiver<UpdateStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> UpdateStatus {
        self.status.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: UpdateStatus) {
        log::debug!("Update status: {status:?}");
        self.status.send_replace(status);
    }

    /// Start the timer: one cycle now, then one per interval.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(agent.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("Update agent started: interval_secs={}", agent.interval.as_secs());
            loop {
                ticker.tick().await;
                let cycle = Arc::clone(&agent);
                tokio::spawn(async move {
                    cycle.run_cycle().await;
                });
            }
        })
    }

    /// Check outside the timer, with a notice when already current.
    pub async fn check_now(&self) -> UpdateOutcome {
        let outcome = self.run_cycle().await;
        match &outcome {
            UpdateOutcome::UpToDate => {
                self.notifier.info("Default plugin is up to date");
            }
            UpdateOutcome::Skipped => {
                self.notifier.info("An update check is already running");
            }
            _ => {}
        }
        outcome
    }

    /// Run one update cycle. Never fails; errors become `Failed` plus a notice.
    pub async fn run_cycle(&self) -> UpdateOutcome {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("Update cycle skipped, previous cycle still running");
            return UpdateOutcome::Skipped;
        }
        let _busy = BusyGuard(&self.busy);

        self.set_status(UpdateStatus::Checking);

        let outcome = match self.check_and_install().await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Plugin update failed: {e}");
                self.notifier.error(format!("Plugin update failed: {e}"));
                UpdateOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };

        self.set_status(match &outcome {
            UpdateOutcome::UpToDate => UpdateStatus::UpToDate,
            UpdateOutcome::Installed { validator } => UpdateStatus::Installed {
                validator: validator.clone(),
            },
            UpdateOutcome::Failed { message } => UpdateStatus::Failed {
                message: message.clone(),
            },
            UpdateOutcome::Skipped => UpdateStatus::Idle,
        });
        self.set_status(UpdateStatus::Idle);

        outcome
    }

    async fn check_and_install(&self) -> Result<UpdateOutcome, ApiError> {
        let remote = self.source.remote_validator().await?;
        let stored = self.prefs.get_string(KEY_UPDATE_VALIDATOR);

        if remote.is_some() && remote == stored {
            log::info!("Default plugin up to date: validator={remote:?}");
            return Ok(UpdateOutcome::UpToDate);
        }

        log::info!("Plugin update available: remote={remote:?}, stored={stored:?}");
        self.set_status(UpdateStatus::Downloading);

        let archive = std::env::temp_dir().join(format!("shotty-update-{}.zip", Uuid::new_v4()));
        let installed = async {
            let bytes = self.source.download(&archive).await?;
            log::info!("Plugin update downloaded: bytes={bytes}");

            self.set_status(UpdateStatus::Installing);
            self.store
                .replace_from_archive(&archive, self.store.default_name())
                .await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove update archive: {e}");
            }
        }
        installed?;

        match &remote {
            Some(validator) => self.prefs.set_string(KEY_UPDATE_VALIDATOR, validator)?,
            None => self.prefs.remove(KEY_UPDATE_VALIDATOR)?,
        }

        self.store.reload().await;
        self.reload.force_reload().await;

        log::info!("Plugin update installed: validator={remote:?}");
        self.notifier.success("Default plugin updated");

        Ok(UpdateOutcome::Installed { validator: remote })
    }
}
