//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the streaming crates:
//! - Logging and tracing bootstrap
//! - Log redaction helpers
//!
//! Host applications call [`logging::init_logging`] once at startup; the
//! engine crates only ever emit through `tracing` macros.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
