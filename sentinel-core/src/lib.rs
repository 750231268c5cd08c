//! Sentinel Core - shared types, errors, configuration and logging
//!
//! Everything here is free of network access; the HTTP side lives in
//! `sentinel-client`.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use tracing;
