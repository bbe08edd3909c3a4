//! Captured screenshots and the external-process capture backend.

use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tokio::process::Command;
use uuid::Uuid;

use crate::api::types::ApiError;
use crate::protocols::host::ScreenCapture;

/// Argument placeholder replaced with the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// An in-memory screenshot owned by the host for one edit session.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    image: DynamicImage,
}

impl CapturedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Decode an encoded image (PNG, JPEG, ...).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ApiError> {
        image::load_from_memory(bytes)
            .map(Self::new)
            .map_err(|e| ApiError::CaptureFailed {
                message: format!("Failed to decode captured image: {e}"),
            })
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, ApiError> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| ApiError::CaptureFailed {
                message: format!("Failed to encode image: {e}"),
            })?;
        Ok(bytes)
    }

    /// Transport form handed to page script: PNG, base64, no data-URL header.
    pub fn to_png_base64(&self) -> Result<String, ApiError> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_png()?))
    }
}

/// Screen capture by running an external program that writes a PNG file.
///
/// Every `{output}` in the arguments is replaced with a fresh temp path; if
/// no argument contains it, the path is appended. A zero exit status with no
/// file written means the user cancelled.
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Interactive region capture with the platform's screenshot tool.
    #[cfg(target_os = "macos")]
    pub fn platform_default() -> Self {
        Self::new(
            "screencapture",
            vec!["-i".to_string(), OUTPUT_PLACEHOLDER.to_string()],
        )
    }

    /// Interactive region capture with the platform's screenshot tool.
    #[cfg(not(target_os = "macos"))]
    pub fn platform_default() -> Self {
        Self::new(
            "gnome-screenshot",
            vec![
                "-a".to_string(),
                "-f".to_string(),
                OUTPUT_PLACEHOLDER.to_string(),
            ],
        )
    }

    fn build_args(&self, output: &Path) -> Vec<String> {
        let output = output.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect();
        if !self.args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
            args.push(output);
        }
        args
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture(&self) -> Result<Option<CapturedImage>, ApiError> {
        let output = std::env::temp_dir().join(format!("shotty-capture-{}.png", Uuid::new_v4()));
        let args = self.build_args(&output);

        log::debug!("Capture started: program={}, args={args:?}", self.program);

        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ApiError::CaptureFailed {
                message: format!("Failed to run {}: {e}", self.program),
            })?;

        let bytes = match tokio::fs::read(&output).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if status.success() {
                    log::info!("Capture cancelled");
                    return Ok(None);
                }
                return Err(ApiError::CaptureFailed {
                    message: format!("{} exited with {status}", self.program),
                });
            }
            Err(e) => {
                return Err(ApiError::CaptureFailed {
                    message: format!("Failed to read capture output: {e}"),
                })
            }
        };

        if let Err(e) = tokio::fs::remove_file(&output).await {
            log::warn!("Failed to remove capture file: path={}, error={e}", output.display());
        }

        let image = CapturedImage::from_bytes(&bytes)?;
        let (width, height) = image.dimensions();
        log::info!("Capture finished: width={width}, height={height}");
        Ok(Some(image))
    }
}
