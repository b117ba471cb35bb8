//! # SOP Common
//!
//! Shared types, errors, and logging for the SOP translation engine.
//!
//! This crate provides the foundational types used across the workspace:
//! the supported [`Locale`] set, the workspace-wide [`SopError`], and the
//! `tracing` subscriber setup.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod logging;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use error::{Result, SopError};
pub use logging::{init_default_logging, init_dev_logging, init_logging, LoggingConfig};
pub use types::*;
