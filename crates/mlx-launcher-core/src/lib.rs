//! MLX launcher core - platform-independent building blocks
//!
//! This crate provides the configuration types, error taxonomy, process
//! traits, readiness probe and supervisor state machine shared by the
//! platform-specific process managers and the launcher binary.

mod config;
mod error;
mod preflight;
mod probe;
mod process;
mod stdio;
mod supervisor;

pub use config::*;
pub use error::*;
pub use preflight::*;
pub use probe::*;
pub use process::*;
pub use stdio::*;
pub use supervisor::*;
