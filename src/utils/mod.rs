// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::ExporterConfig;
pub use errors::{ErrorKind, ExporterError, Result};
