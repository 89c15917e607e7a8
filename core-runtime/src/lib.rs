//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the toolbox:
//! - Logging and tracing infrastructure
//! - Worker pool configuration
//! - Shared error type
//!
//! ## Overview
//!
//! This crate contains the ambient utilities that the concurrency core depends
//! on. It establishes the logging conventions and the validated configuration
//! used to size and name background worker threads.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{Error, Result};
