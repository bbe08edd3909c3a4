//! Plugin management domain.
//!
//! Handles plugin installation, discovery and the preferred plugin.
//! Plugins are stored in `<config_dir>/shotty/plugins/<pluginId>/`.

pub mod store;
