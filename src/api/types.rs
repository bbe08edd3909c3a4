//! Bridge types shared with the presentation layer.
//!
//! These types provide a stable surface for whatever draws the windows,
//! menus and toasts, hiding the plugin and update internals.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique identifier for a host-mediated operation (UUID v4 string)
pub type OperationId = String;

/// An installed plugin bundle discovered under the plugin root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Directory name; doubles as the display name and the lookup key
    pub plugin_id: String,
    /// Absolute path to the bundle directory
    pub root_dir: PathBuf,
    /// Whether this plugin matches the persisted preferred identifier
    pub is_default: bool,
}

/// What is currently loaded (or about to be loaded) into the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActivePlugin {
    /// A bundle installed under the plugin root
    Installed { plugin_id: String },
    /// A URL loaded directly, used while iterating on a plugin
    LiveEndpoint { url: String },
}

impl ActivePlugin {
    /// Classify a raw reference string.
    ///
    /// Anything starting with `http://` or `https://` (any case) is a live
    /// endpoint; everything else names an installed plugin.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ActivePlugin::LiveEndpoint {
                url: raw.trim().to_string(),
            }
        } else {
            ActivePlugin::Installed {
                plugin_id: raw.trim().to_string(),
            }
        }
    }

    /// The string the bridge compares to decide whether a reload is needed.
    pub fn source_key(&self) -> &str {
        match self {
            ActivePlugin::Installed { plugin_id } => plugin_id,
            ActivePlugin::LiveEndpoint { url } => url,
        }
    }
}

/// A resolved document the rendering surface should navigate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// Local entry document plus the directory the surface may read from
    LocalFile { entry: PathBuf, read_access: PathBuf },
    /// Remote document loaded by URL
    Url(String),
}

/// Severity of a notice, used for styling and log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// An ephemeral, auto-dismissing status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    /// Monotonic notice identifier
    pub id: u64,
    /// Message text shown to the user
    pub message: String,
    pub level: NoticeLevel,
    /// How long the presentation layer should keep it visible
    pub duration_ms: u64,
}

/// Native picker kinds the host can present on behalf of the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PickerKind {
    /// Choose a directory to save screenshots into
    Directory,
    /// Open one or more files for sandboxed plugin content
    #[serde(rename_all = "camelCase")]
    OpenFiles { allow_multiple: bool },
    /// Choose a destination for a downloaded file
    #[serde(rename_all = "camelCase")]
    SaveFile { suggested_name: String },
}

/// Event emitted when the host needs the presentation layer to show a picker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerRequestedEvent {
    pub operation_id: OperationId,
    pub kind: PickerKind,
    /// Milliseconds since epoch; f64 for JavaScript number compatibility
    pub requested_at_ms: f64,
}

/// A persisted, revocable permission to write into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDirectoryGrant {
    /// Directory the grant gives access to
    pub directory: PathBuf,
    /// Opaque persisted token
    pub token: Vec<u8>,
}

/// Observable state of the plugin update agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum UpdateStatus {
    Idle,
    Checking,
    UpToDate,
    Downloading,
    Installing,
    Installed { validator: Option<String> },
    Failed { message: String },
}

/// Result of one update cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum UpdateOutcome {
    /// Another cycle was already running
    Skipped,
    UpToDate,
    Installed { validator: Option<String> },
    Failed { message: String },
}

/// API errors for presentation-layer consumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ApiError {
    /// Invalid input parameter
    InvalidInput { message: String },
    /// Path does not exist or is not accessible
    PathNotFound { path: String },
    /// Path is not a directory
    PathNotDirectory { path: String },
    /// IO error during file system operation
    IoError { message: String },
    /// HTTP request failed or returned an error status
    NetworkError { message: String },
    /// No installed plugin with this identifier
    PluginNotFound { plugin_id: String },
    /// A plugin with this identifier is already installed
    PluginAlreadyExists { plugin_id: String },
    /// The bundled default plugin could not be located
    DefaultAssetMissing { path: String },
    /// Another native picker is still waiting for the user
    PickerInProgress,
    /// No pending operation with this ID
    OperationNotFound { operation_id: OperationId },
    /// The pending operation was already answered
    OperationAlreadyResolved { operation_id: OperationId },
    /// Bridge payload could not be decoded
    MalformedPayload { message: String },
    /// Script evaluation in the rendering surface failed
    ScriptError { message: String },
    /// Screen capture produced an error
    CaptureFailed { message: String },
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::InvalidInput { message } => write!(f, "Invalid input: {message}"),
            ApiError::PathNotFound { path } => write!(f, "Path not found: {path}"),
            ApiError::PathNotDirectory { path } => write!(f, "Path is not a directory: {path}"),
            ApiError::IoError { message } => write!(f, "IO error: {message}"),
            ApiError::NetworkError { message } => write!(f, "Network error: {message}"),
            ApiError::PluginNotFound { plugin_id } => write!(f, "Plugin not found: {plugin_id}"),
            ApiError::PluginAlreadyExists { plugin_id } => {
                write!(f, "Plugin already exists: {plugin_id}")
            }
            ApiError::DefaultAssetMissing { path } => {
                write!(f, "Default plugin asset not found: {path}")
            }
            ApiError::PickerInProgress => write!(f, "Another picker is already open"),
            ApiError::OperationNotFound { operation_id } => {
                write!(f, "Operation not found: {operation_id}")
            }
            ApiError::OperationAlreadyResolved { operation_id } => {
                write!(f, "Operation already resolved: {operation_id}")
            }
            ApiError::MalformedPayload { message } => write!(f, "Malformed payload: {message}"),
            ApiError::ScriptError { message } => write!(f, "Script error: {message}"),
            ApiError::CaptureFailed { message } => write!(f, "Capture failed: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}
