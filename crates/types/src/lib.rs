//! Core types, errors, and configuration for clusterboot.
//!
//! This crate provides the foundational types shared by the coordination
//! layer and the node binary:
//! - Node identity, registry entries, engine status, and the startup state machine
//! - The closed set of bootstrap error kinds, using snafu
//! - Validated configuration structs
//! - Retry policies with cancellation

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{BootstrapError, ErrorKind, Result, StartupFailure};
pub use retry::{Backoff, Delays, RetryPolicy};
pub use types::*;
