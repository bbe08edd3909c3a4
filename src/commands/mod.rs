//! Command handlers organized by domain.
//!
//! Each submodule contains related commands and their helper functions.
//! The `shotty` binary parses arguments and dispatches here.

pub mod capture;
pub mod plugins;
pub mod updates;
