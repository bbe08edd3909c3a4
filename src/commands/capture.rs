//! Screen capture commands.

use std::path::{Path, PathBuf};

use crate::api::types::ApiError;
use crate::protocols::host::ScreenCapture;
use crate::runtime::fs::write_file_atomic;

/// Capture the screen and write it to `output` as PNG.
///
/// # Returns
/// * `Option<PathBuf>` - The written file, or `None` when the user cancelled
///
/// # Errors
/// * `ApiError::InvalidInput` - If output is empty
/// * `ApiError::CaptureFailed` - If the capture backend fails
/// * `ApiError::IoError` - If the file cannot be written
pub async fn capture_to_file(
    capture: &dyn ScreenCapture,
    output: &Path,
) -> Result<Option<PathBuf>, ApiError> {
    log::debug!("capture_to_file called: output={}", output.display());

    if output.as_os_str().is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Output path cannot be empty".to_string(),
        });
    }

    let Some(image) = capture.capture().await? else {
        log::info!("Capture cancelled");
        return Ok(None);
    };

    let bytes = image.to_png()?;
    write_file_atomic(output, &bytes).await?;

    let (width, height) = image.dimensions();
    log::info!(
        "Capture saved: path={}, width={width}, height={height}",
        output.display()
    );
    Ok(Some(output.to_path_buf()))
}
