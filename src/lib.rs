//! Workspace facade crate.
//!
//! Re-exports the streaming engine so host applications can depend on
//! `netstream-workspace` and pick features here instead of wiring each crate.
//!
//! - `desktop-shims` (default): reqwest-backed HTTP client when none is injected
//! - `symphonia`: expose the feed as a Symphonia `MediaSource`

pub use core_streaming::*;
