//! Path utilities for plugin root boundary validation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::api::types::ApiError;

/// Maximum accepted length of a plugin identifier.
const MAX_PLUGIN_ID_LEN: usize = 128;

/// Validate a plugin identifier to prevent path traversal.
///
/// Identifiers are directory names, so the rules are about what can safely
/// be joined onto the plugin root:
/// - 1 to 128 characters
/// - no path separators, no `..`, no control characters
/// - must not start with `.` (hidden entries are reserved for staging)
pub fn validate_plugin_id(plugin_id: &str) -> Result<(), ApiError> {
    if plugin_id.trim().is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Plugin ID cannot be empty".to_string(),
        });
    }

    if plugin_id.chars().count() > MAX_PLUGIN_ID_LEN {
        return Err(ApiError::InvalidInput {
            message: format!("Plugin ID cannot exceed {MAX_PLUGIN_ID_LEN} characters"),
        });
    }

    if plugin_id.contains('/') || plugin_id.contains('\\') || plugin_id.contains("..") {
        return Err(ApiError::InvalidInput {
            message: "Plugin ID contains invalid path characters".to_string(),
        });
    }

    if plugin_id.chars().any(|c| c.is_control()) {
        return Err(ApiError::InvalidInput {
            message: "Plugin ID cannot contain control characters".to_string(),
        });
    }

    if is_hidden_name(plugin_id) {
        return Err(ApiError::InvalidInput {
            message: "Plugin ID cannot start with '.'".to_string(),
        });
    }

    Ok(())
}

/// Whether a directory entry name is hidden (staging, trash, OS metadata).
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Canonicalizes and validates an existing directory.
///
/// # Returns
/// * `Ok(PathBuf)` - Canonicalized absolute path
/// * `Err(ApiError)` - If path doesn't exist, isn't a directory, or can't be canonicalized
pub fn canonicalize_directory(dir: &Path) -> Result<PathBuf, ApiError> {
    let display = dir.display().to_string();

    if display.trim().is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Directory cannot be empty".to_string(),
        });
    }

    if !dir.exists() {
        return Err(ApiError::PathNotFound { path: display });
    }

    if !dir.is_dir() {
        return Err(ApiError::PathNotDirectory { path: display });
    }

    dir.canonicalize().map_err(|e| ApiError::IoError {
        message: format!("Failed to canonicalize path '{display}': {e}"),
    })
}

/// Join a validated plugin identifier onto the plugin root.
///
/// The result need not exist; use it for install destinations.
pub fn plugin_dir_in_root(root: &Path, plugin_id: &str) -> Result<PathBuf, ApiError> {
    validate_plugin_id(plugin_id)?;
    Ok(root.join(plugin_id))
}

/// Resolve an existing file inside a plugin bundle.
///
/// Canonicalizes both sides so a symlinked entry document cannot point
/// outside of the bundle directory.
pub fn resolve_path_in_bundle(bundle: &Path, input: &str) -> Result<PathBuf, ApiError> {
    if input.trim().is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Path cannot be empty".to_string(),
        });
    }

    let bundle = canonicalize_directory(bundle)?;

    let candidate = bundle.join(input);
    let resolved = candidate.canonicalize().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ApiError::PathNotFound {
                path: candidate.display().to_string(),
            }
        } else {
            ApiError::IoError {
                message: format!("Failed to canonicalize path '{input}': {e}"),
            }
        }
    })?;

    if !resolved.starts_with(&bundle) {
        return Err(ApiError::InvalidInput {
            message: format!("Path escapes plugin bundle: {input}"),
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use uuid::Uuid;

    #[test]
    fn test_validate_plugin_id_valid() {
        assert!(validate_plugin_id("shotty").is_ok());
        assert!(validate_plugin_id("My Annotator").is_ok());
        assert!(validate_plugin_id("editor_v2.1").is_ok());
        assert!(validate_plugin_id("a").is_ok());
    }

    #[test]
    fn test_validate_plugin_id_empty() {
        let result = validate_plugin_id("");
        match result.unwrap_err() {
            ApiError::InvalidInput { message } => assert!(message.contains("empty")),
            other => panic!("Expected InvalidInput error, got {other:?}"),
        }
        assert!(validate_plugin_id("   ").is_err());
    }

    #[test]
    fn test_validate_plugin_id_too_long() {
        let long_id = "a".repeat(MAX_PLUGIN_ID_LEN + 1);
        assert!(validate_plugin_id(&long_id).is_err());
        assert!(validate_plugin_id(&"a".repeat(MAX_PLUGIN_ID_LEN)).is_ok());
    }

    #[test]
    fn test_validate_plugin_id_path_traversal() {
        assert!(validate_plugin_id("../etc").is_err());
        assert!(validate_plugin_id("foo/bar").is_err());
        assert!(validate_plugin_id("foo\\bar").is_err());
        assert!(validate_plugin_id("..").is_err());
    }

    #[test]
    fn test_validate_plugin_id_hidden_and_control() {
        assert!(validate_plugin_id(".staging").is_err());
        assert!(validate_plugin_id("bad\nname").is_err());
    }

    #[test]
    fn test_canonicalize_nonexistent_directory() {
        let result = canonicalize_directory(Path::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(ApiError::PathNotFound { .. })));
    }

    #[test]
    fn test_canonicalize_file_not_directory() {
        let temp_file = env::temp_dir().join(format!("not_dir_{}.txt", Uuid::new_v4()));
        std::fs::write(&temp_file, "test").expect("failed to create temp file");
        let result = canonicalize_directory(&temp_file);
        assert!(matches!(result, Err(ApiError::PathNotDirectory { .. })));
        std::fs::remove_file(&temp_file).expect("failed to remove temp file");
    }

    #[test]
    fn test_resolve_path_in_bundle() {
        let bundle = env::temp_dir().join(format!("bundle_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&bundle).expect("failed to create bundle dir");
        let entry = bundle.join("index.html");
        std::fs::write(&entry, "<html></html>").expect("failed to write entry");

        let resolved = resolve_path_in_bundle(&bundle, "index.html").unwrap();
        assert_eq!(resolved, entry.canonicalize().unwrap());

        let missing = resolve_path_in_bundle(&bundle, "missing.html");
        assert!(matches!(missing, Err(ApiError::PathNotFound { .. })));

        std::fs::remove_dir_all(&bundle).expect("failed to remove bundle dir");
    }

    #[test]
    fn test_resolve_path_in_bundle_rejects_escape() {
        let bundle = env::temp_dir().join(format!("bundle_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&bundle).expect("failed to create bundle dir");
        let outside = env::temp_dir().join(format!("outside_{}.html", Uuid::new_v4()));
        std::fs::write(&outside, "secret").expect("failed to write outside file");

        let escape = format!("../{}", outside.file_name().unwrap().to_string_lossy());
        let result = resolve_path_in_bundle(&bundle, &escape);
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));

        std::fs::remove_file(&outside).expect("failed to remove outside file");
        std::fs::remove_dir_all(&bundle).expect("failed to remove bundle dir");
    }
}
