//! Host collaborator traits: runtime → presentation boundary.
//!
//! The runtime never draws windows or runs scripts itself. Whatever embeds
//! the editor (a native window, a webview crate, a test fake) implements
//! these traits and is handed to the runtime at construction time.

use async_trait::async_trait;

use crate::api::types::{ApiError, DocumentSource};
use crate::capture::CapturedImage;

/// A navigation request for the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLoad {
    /// Entry document or URL to load
    pub source: DocumentSource,
    /// Script to run at document start, before any page script
    pub user_script: String,
    /// Message channels to register for this document
    pub message_channels: Vec<&'static str>,
}

/// The embedded, script-capable surface that renders the active plugin.
///
/// Implementations must expose every registered channel to page script as
/// `window.shottyHost.postMessage(channel, body)` and route the posted
/// bodies back to `BridgeChannel::handle_message`.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Replace the current document.
    ///
    /// Any previously registered message channels are dropped and the ones in
    /// `load` are registered before `load.user_script` runs.
    async fn navigate(&self, load: DocumentLoad) -> Result<(), ApiError>;

    /// Evaluate a script in the current document.
    async fn evaluate_script(&self, script: &str) -> Result<(), ApiError>;
}

/// The editor window hosting the rendering surface.
pub trait WindowControl: Send + Sync {
    /// Hide the editor (after a save with close requested, or on dismiss).
    fn close_editor(&self);

    /// Bring the editor to the front.
    fn show_editor(&self);
}

/// OS-level screen capture.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Capture a screenshot. `Ok(None)` when the user cancelled.
    async fn capture(&self) -> Result<Option<CapturedImage>, ApiError>;
}

/// Receives "reload whatever is active" requests, e.g. after a plugin update.
#[async_trait]
pub trait ReloadSignal: Send + Sync {
    async fn force_reload(&self);
}
