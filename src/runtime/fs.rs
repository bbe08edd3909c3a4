//! Filesystem helpers that never leave partial results behind.
//!
//! Writes go to a temp sibling and are renamed into place. Bundle installs
//! are copied into a hidden staging directory first and swapped in with
//! renames, so a failure mid-copy leaves the previous bundle untouched.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::api::types::ApiError;

/// Hidden sibling directory used to stage a bundle before it is renamed into place.
pub fn staging_dir(root: &Path) -> PathBuf {
    root.join(format!(".staging-{}", Uuid::new_v4()))
}

fn trash_path(dest: &Path) -> PathBuf {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".trash-{}", Uuid::new_v4()))
}

/// Write bytes to `path` atomically.
///
/// Refuses to replace directories or symlinks. Returns the number of bytes written.
pub async fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<u64, ApiError> {
    let display = path.display().to_string();

    let parent = path.parent().ok_or_else(|| ApiError::InvalidInput {
        message: format!("Path must include a parent directory: {display}"),
    })?;

    let parent_metadata = fs::metadata(parent).await.map_err(|e| ApiError::IoError {
        message: format!("Failed to read metadata for '{}': {e}", parent.display()),
    })?;

    if !parent_metadata.is_dir() {
        return Err(ApiError::PathNotDirectory {
            path: parent.display().to_string(),
        });
    }

    match fs::symlink_metadata(path).await {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(ApiError::InvalidInput {
                    message: format!("Path is a symlink: {display}"),
                });
            }
            if metadata.is_dir() {
                return Err(ApiError::InvalidInput {
                    message: format!("Path is a directory: {display}"),
                });
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ApiError::IoError {
                message: format!("Failed to read metadata for '{display}': {e}"),
            });
        }
    }

    let temp_path = parent.join(format!(".tmp_write_{}", Uuid::new_v4()));
    let mut temp_file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|e| ApiError::IoError {
            message: format!("Failed to create temp file for '{display}': {e}"),
        })?;

    let written = async {
        temp_file.write_all(bytes).await?;
        temp_file.flush().await?;
        temp_file.sync_all().await
    }
    .await;

    drop(temp_file);

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(ApiError::IoError {
            message: format!("Failed to write temp file for '{display}': {e}"),
        });
    }

    if let Err(e) = replace_file(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(bytes.len() as u64)
}

async fn replace_file(from: &Path, to: &Path) -> Result<(), ApiError> {
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            fs::remove_file(to).await.map_err(|err| ApiError::IoError {
                message: format!("Failed to replace existing file: {err}"),
            })?;
            fs::rename(from, to).await.map_err(|err| ApiError::IoError {
                message: format!("Failed to replace file: {err}"),
            })
        }
        Err(e) => Err(ApiError::IoError {
            message: format!("Failed to replace file: {e}"),
        }),
    }
}

/// Move a file, falling back to copy + delete when a rename is not possible
/// (e.g. the temp directory lives on another volume).
pub async fn move_file(from: &Path, to: &Path) -> Result<(), ApiError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    fs::copy(from, to).await.map_err(|e| ApiError::IoError {
        message: format!(
            "Failed to move '{}' to '{}': {e}",
            from.display(),
            to.display()
        ),
    })?;

    if let Err(e) = fs::remove_file(from).await {
        log::warn!("Failed to remove moved file source: path={}, error={e}", from.display());
    }
    Ok(())
}

/// Recursively copy a directory tree. Symlinks are skipped.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Remove a file or directory tree; missing paths are not an error.
pub async fn remove_path(path: &Path) -> Result<(), ApiError> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(ApiError::IoError {
                message: format!("Failed to read metadata for '{}': {e}", path.display()),
            })
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    result.map_err(|e| ApiError::IoError {
        message: format!("Failed to remove '{}': {e}", path.display()),
    })
}

/// Rename a fully staged bundle onto `dest`, replacing whatever is there.
///
/// An existing destination is first moved aside; if the final rename fails
/// it is moved back, so `dest` is either the old bundle or the new one.
pub async fn swap_into_place(staged: &Path, dest: &Path) -> Result<(), ApiError> {
    let existing = fs::symlink_metadata(dest).await.is_ok();

    if !existing {
        return fs::rename(staged, dest).await.map_err(|e| ApiError::IoError {
            message: format!("Failed to move bundle into '{}': {e}", dest.display()),
        });
    }

    let trash = trash_path(dest);
    fs::rename(dest, &trash).await.map_err(|e| ApiError::IoError {
        message: format!("Failed to move aside '{}': {e}", dest.display()),
    })?;

    if let Err(e) = fs::rename(staged, dest).await {
        if let Err(restore) = fs::rename(&trash, dest).await {
            log::error!(
                "Failed to restore previous bundle: dest={}, error={restore}",
                dest.display()
            );
        }
        return Err(ApiError::IoError {
            message: format!("Failed to move bundle into '{}': {e}", dest.display()),
        });
    }

    if let Err(e) = remove_path(&trash).await {
        log::warn!("Failed to clean up replaced bundle: {e}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    async fn temp_root(prefix: &str) -> PathBuf {
        let root = env::temp_dir().join(format!("{prefix}_{}", Uuid::new_v4()));
        fs::create_dir_all(&root)
            .await
            .expect("failed to create root dir");
        root
    }

    #[tokio::test]
    async fn test_write_file_atomic_success() {
        let root = temp_root("fs_write").await;
        let target = root.join("shot.png");

        let bytes = write_file_atomic(&target, b"hello world").await.unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(fs::read(&target).await.unwrap(), b"hello world");

        // Replacing an existing file keeps only the new content and no temp files
        write_file_atomic(&target, b"second").await.unwrap();
        assert_eq!(fs::read(&target).await.unwrap(), b"second");
        let mut entries = fs::read_dir(&root).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["shot.png".to_string()]);

        fs::remove_dir_all(&root)
            .await
            .expect("failed to remove root dir");
    }

    #[tokio::test]
    async fn test_write_file_atomic_rejects_directory() {
        let root = temp_root("fs_write").await;
        let nested = root.join("nested");
        fs::create_dir_all(&nested).await.unwrap();

        let result = write_file_atomic(&nested, b"data").await;
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));

        fs::remove_dir_all(&root)
            .await
            .expect("failed to remove root dir");
    }

    #[tokio::test]
    async fn test_write_file_atomic_missing_parent() {
        let root = env::temp_dir().join(format!("fs_missing_{}", Uuid::new_v4()));
        let result = write_file_atomic(&root.join("a.png"), b"data").await;
        assert!(matches!(result, Err(ApiError::IoError { .. })));
    }

    #[tokio::test]
    async fn test_copy_dir_recursive_and_swap() {
        let root = temp_root("fs_swap").await;
        let src = root.join("src");
        fs::create_dir_all(src.join("assets")).await.unwrap();
        fs::write(src.join("index.html"), "new").await.unwrap();
        fs::write(src.join("assets").join("app.js"), "js").await.unwrap();

        let dest = root.join("plugin");
        fs::create_dir_all(&dest).await.unwrap();
        fs::write(dest.join("index.html"), "old").await.unwrap();
        fs::write(dest.join("stale.txt"), "stale").await.unwrap();

        let staged = staging_dir(&root);
        copy_dir_recursive(&src, &staged).unwrap();
        swap_into_place(&staged, &dest).await.unwrap();

        assert_eq!(fs::read_to_string(dest.join("index.html")).await.unwrap(), "new");
        assert!(dest.join("assets").join("app.js").exists());
        assert!(!dest.join("stale.txt").exists());
        assert!(!staged.exists());

        fs::remove_dir_all(&root)
            .await
            .expect("failed to remove root dir");
    }

    #[tokio::test]
    async fn test_swap_into_place_failure_keeps_previous() {
        let root = temp_root("fs_swap").await;
        let dest = root.join("plugin");
        fs::create_dir_all(&dest).await.unwrap();
        fs::write(dest.join("index.html"), "old").await.unwrap();

        let missing_stage = root.join(".staging-missing");
        let result = swap_into_place(&missing_stage, &dest).await;

        assert!(matches!(result, Err(ApiError::IoError { .. })));
        assert_eq!(fs::read_to_string(dest.join("index.html")).await.unwrap(), "old");

        fs::remove_dir_all(&root)
            .await
            .expect("failed to remove root dir");
    }

    #[tokio::test]
    async fn test_move_file_and_remove_path() {
        let root = temp_root("fs_move").await;
        let from = root.join("download.bin");
        let to = root.join("saved.bin");
        fs::write(&from, "payload").await.unwrap();

        move_file(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).await.unwrap(), "payload");

        remove_path(&to).await.unwrap();
        remove_path(&to).await.unwrap();
        assert!(!to.exists());

        fs::remove_dir_all(&root)
            .await
            .expect("failed to remove root dir");
    }
}
