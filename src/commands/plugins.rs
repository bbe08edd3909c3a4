//! Plugin management commands.
//!
//! Handles listing, installing and choosing plugins from the command line.

use std::path::PathBuf;

use crate::api::types::{ActivePlugin, ApiError, PluginDescriptor};
use crate::plugins::store::PluginStore;
use crate::runtime::path::validate_plugin_id;

/// List installed plugins.
///
/// # Returns
/// * `Vec<PluginDescriptor>` - Plugins sorted by identifier, preferred one flagged
pub async fn plugin_list(store: &PluginStore) -> Vec<PluginDescriptor> {
    log::debug!("plugin_list called: root={}", store.root().display());
    store.reload().await
}

/// Install a plugin bundle from a directory, `.html` file or `.zip` archive.
///
/// # Arguments
/// * `source` - Path to the bundle
/// * `force` - Replace an installed plugin with the same name
///
/// # Errors
/// * `ApiError::InvalidInput` - If source is empty or not a supported bundle
/// * `ApiError::PathNotFound` - If the source does not exist
/// * `ApiError::PluginAlreadyExists` - If the name is taken and `force` is not set
/// * `ApiError::IoError` - If staging or renaming fails
pub async fn plugin_install(
    store: &PluginStore,
    source: String,
    force: bool,
) -> Result<PluginDescriptor, ApiError> {
    log::debug!("plugin_install called: source={source}, force={force}");

    if source.trim().is_empty() {
        return Err(ApiError::InvalidInput {
            message: "Source path cannot be empty".to_string(),
        });
    }

    let source = PathBuf::from(source);
    if force {
        store.overwrite(&source).await
    } else {
        store.install(&source).await
    }
}

/// Set the preferred plugin.
///
/// Accepts an installed plugin identifier or an http(s) URL. The plugin
/// need not be installed yet.
///
/// # Returns
/// * `bool` - Whether the preferred plugin is currently installed
///
/// # Errors
/// * `ApiError::InvalidInput` - If the identifier is not a valid plugin name
pub async fn plugin_prefer(store: &PluginStore, plugin: String) -> Result<bool, ApiError> {
    log::debug!("plugin_prefer called: plugin={plugin}");

    let parsed = ActivePlugin::parse(&plugin);
    if let ActivePlugin::Installed { plugin_id } = &parsed {
        validate_plugin_id(plugin_id)?;
    }

    store.set_preferred(parsed.source_key()).await;
    Ok(store.active_plugin().await.is_some())
}

/// Create the plugin root and install the bundled default plugin if missing.
pub async fn plugin_bootstrap(store: &PluginStore) -> bool {
    log::debug!("plugin_bootstrap called");
    store.bootstrap_default().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::notifier::Notifier;
    use crate::runtime::preferences::MemoryPreferenceStore;
    use std::env;
    use std::sync::Arc;
    use uuid::Uuid;

    fn store(root: PathBuf) -> PluginStore {
        PluginStore::new(
            root,
            "shotty",
            None,
            Arc::new(MemoryPreferenceStore::new()),
            Arc::new(Notifier::new()),
        )
    }

    #[tokio::test]
    async fn test_plugin_install_invalid_input_empty() {
        let store = store(env::temp_dir().join(format!("cmd_plugins_{}", Uuid::new_v4())));
        let result = plugin_install(&store, "  ".to_string(), false).await;
        assert!(matches!(result, Err(ApiError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_plugin_install_force_and_list() {
        let base = env::temp_dir().join(format!("cmd_plugins_{}", Uuid::new_v4()));
        let source = base.join("src").join("marker");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("index.html"), "v1").unwrap();
        let store = store(base.join("plugins"));

        let source_arg = source.display().to_string();
        plugin_install(&store, source_arg.clone(), false).await.unwrap();
        let again = plugin_install(&store, source_arg.clone(), false).await;
        assert!(matches!(again, Err(ApiError::PluginAlreadyExists { .. })));
        plugin_install(&store, source_arg, true).await.unwrap();

        let listed = plugin_list(&store).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].plugin_id, "marker");

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[tokio::test]
    async fn test_plugin_prefer() {
        let base = env::temp_dir().join(format!("cmd_plugins_{}", Uuid::new_v4()));
        std::fs::create_dir_all(base.join("installed")).unwrap();
        let store = store(base.clone());

        assert!(plugin_prefer(&store, "installed".to_string()).await.unwrap());
        assert!(!plugin_prefer(&store, "missing".to_string()).await.unwrap());
        assert!(plugin_prefer(&store, "http://localhost:5173/".to_string())
            .await
            .unwrap());

        let invalid = plugin_prefer(&store, "../escape".to_string()).await;
        assert!(matches!(invalid, Err(ApiError::InvalidInput { .. })));
        assert_eq!(store.preferred().as_deref(), Some("http://localhost:5173/"));

        std::fs::remove_dir_all(&base).unwrap();
    }
}
