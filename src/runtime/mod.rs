//! Runtime services behind the plugin editor.
//!
//! Filesystem and archive helpers, persisted preferences, notices, the
//! native picker hub, the save location, the page bridge and the update
//! agent.

pub mod archive;
pub mod bridge_channel;
pub mod downloads;
pub mod fs;
pub mod notifier;
pub mod path;
pub mod pickers;
pub mod preferences;
pub mod save_location;
pub mod update_agent;
