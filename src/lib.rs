//! Shotty host library.
//!
//! Hosts hot-swappable HTML editor plugins for screenshots: installs and
//! updates plugin bundles, hands captured images to the loaded plugin and
//! brokers its requests (save, dismiss, pick files, download links) back to
//! the native side. A native shell embeds this through [`app::ShottyApp`];
//! the `shotty` binary exposes the headless parts on the command line.

pub mod api;
pub mod app;
pub mod capture;
pub mod commands;
pub mod plugins;
pub mod protocols;
pub mod runtime;

pub use api::types::ApiError;
pub use app::{ShottyApp, ShottyConfig, ShottyHost};
