//! API types for the host-presentation boundary.
//!
//! This module defines stable types consumed by the window, menu and
//! settings layers, isolating plugin and update internals from them.

pub mod types;
