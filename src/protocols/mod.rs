//! Protocol layer - the host/surface boundary.
//!
//! This module provides:
//! - `host`: collaborator traits the runtime calls into (surface, window, capture)
//! - `bridge`: the script bridge wire format (message kinds, injected scripts,
//!   image payload decoding)
//!
//! The protocol layer holds no state. `runtime::bridge_channel` owns the
//! loaded document and image and drives both halves.

pub mod bridge;
pub mod host;

pub use bridge::BridgeMessage;
pub use host::{DocumentLoad, ReloadSignal, RenderSurface, ScreenCapture, WindowControl};
