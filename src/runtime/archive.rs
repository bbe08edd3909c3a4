//! Zip extraction confined to a destination directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::api::types::ApiError;
use crate::plugins::store::ENTRY_DOCUMENT;

/// Extract a zip archive from disk into `dest_root`.
///
/// Entries whose names would escape `dest_root` and symlink entries are
/// skipped. Runs synchronously; call it from `spawn_blocking`.
pub fn extract_zip(archive_path: &Path, dest_root: &Path) -> Result<usize, ApiError> {
    let file = File::open(archive_path).map_err(|e| ApiError::IoError {
        message: format!("Failed to open archive '{}': {e}", archive_path.display()),
    })?;

    let mut archive = zip::ZipArchive::new(file).map_err(|e| ApiError::InvalidInput {
        message: format!("Invalid zip archive '{}': {e}", archive_path.display()),
    })?;

    std::fs::create_dir_all(dest_root).map_err(|e| ApiError::IoError {
        message: format!("Failed to create '{}': {e}", dest_root.display()),
    })?;

    let dest_root = dest_root.canonicalize().map_err(|e| ApiError::IoError {
        message: format!("Failed to canonicalize '{}': {e}", dest_root.display()),
    })?;

    let mut extracted = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| ApiError::InvalidInput {
            message: format!("Corrupt zip entry #{i}: {e}"),
        })?;

        let Some(rel_path) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            log::warn!("Skipping zip entry outside of archive root: {}", entry.name());
            continue;
        };

        if let Some(mode) = entry.unix_mode() {
            if (mode & 0o170000) == 0o120000 {
                continue;
            }
        }

        let outpath = dest_root.join(&rel_path);
        if !outpath.starts_with(&dest_root) {
            continue;
        }

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath).map_err(|e| ApiError::IoError {
                message: format!("Failed to create '{}': {e}", outpath.display()),
            })?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::IoError {
                message: format!("Failed to create '{}': {e}", parent.display()),
            })?;
        }
        let mut outfile = File::create(&outpath).map_err(|e| ApiError::IoError {
            message: format!("Failed to create '{}': {e}", outpath.display()),
        })?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| ApiError::IoError {
            message: format!("Failed to extract '{}': {e}", outpath.display()),
        })?;
        extracted += 1;
    }

    log::debug!(
        "Extracted archive: path={}, files={extracted}",
        archive_path.display()
    );
    Ok(extracted)
}

/// Locate the bundle inside an extracted archive.
///
/// Accepts either a flat bundle (`index.html` at the top) or a single
/// visible top-level folder. When `preferred_name` names a top-level folder
/// that folder wins, which lets archives carry extra metadata entries.
/// Whatever is picked must contain the entry document.
pub fn find_bundle_root(extracted: &Path, preferred_name: Option<&str>) -> Option<PathBuf> {
    if let Some(name) = preferred_name {
        let candidate = extracted.join(name);
        if has_entry_document(&candidate) {
            return Some(candidate);
        }
    }

    if has_entry_document(extracted) {
        return Some(extracted.to_path_buf());
    }

    let dirs: Vec<PathBuf> = std::fs::read_dir(extracted)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            !name.starts_with('.') && name != "__MACOSX"
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();

    match dirs.as_slice() {
        [single] if has_entry_document(single) => Some(single.clone()),
        _ => None,
    }
}

fn has_entry_document(dir: &Path) -> bool {
    dir.join(ENTRY_DOCUMENT).is_file()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::path::Path;

    use zip::write::SimpleFileOptions;

    /// Build a zip archive in memory from `(name, contents)` pairs.
    /// Names ending in `/` become directory entries.
    pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options.clone()).unwrap();
            } else {
                writer.start_file(*name, options.clone()).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        std::fs::write(path, zip_bytes(entries)).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::write_zip;
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_extract_zip_nested_bundle() {
        let root = env::temp_dir().join(format!("archive_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("bundle.zip");
        write_zip(
            &archive,
            &[
                ("shotty/", ""),
                ("shotty/index.html", "<html>v2</html>"),
                ("shotty/js/app.js", "console.log(1)"),
                ("__MACOSX/", ""),
            ],
        );

        let out = root.join("out");
        let count = extract_zip(&archive, &out).unwrap();
        assert_eq!(count, 2);

        let bundle = find_bundle_root(&out, Some("shotty")).unwrap();
        assert_eq!(
            std::fs::read_to_string(bundle.join("index.html")).unwrap(),
            "<html>v2</html>"
        );

        // Without a preferred name the single visible folder is picked
        let bundle = find_bundle_root(&out, None).unwrap();
        assert!(bundle.ends_with("shotty"));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_extract_zip_flat_bundle() {
        let root = env::temp_dir().join(format!("archive_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("flat.zip");
        write_zip(&archive, &[("index.html", "flat"), ("style.css", "body{}")]);

        let out = root.join("out");
        extract_zip(&archive, &out).unwrap();
        let bundle = find_bundle_root(&out, Some("shotty")).unwrap();
        assert_eq!(bundle, out);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_find_bundle_root_requires_entry_document() {
        let root = env::temp_dir().join(format!("archive_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("docs.zip");
        write_zip(
            &archive,
            &[("docs/readme.txt", "x"), ("shotty/app.js", "1")],
        );

        let out = root.join("out");
        extract_zip(&archive, &out).unwrap();
        assert!(find_bundle_root(&out, Some("shotty")).is_none());
        assert!(find_bundle_root(&out, None).is_none());

        // A lone folder without index.html is not a bundle either
        std::fs::remove_dir_all(out.join("shotty")).unwrap();
        assert!(find_bundle_root(&out, None).is_none());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_extract_zip_rejects_garbage() {
        let root = env::temp_dir().join(format!("archive_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let result = extract_zip(&archive, &root.join("out"));
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
