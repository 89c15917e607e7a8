//! # Worker Pool Configuration
//!
//! Provides validated configuration for background worker pools.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `PoolConfig`
//! instance that holds the sizing and naming settings of a worker pool. It
//! enforces fail-fast validation so that a misconfigured pool is rejected
//! before any thread is spawned.
//!
//! ## Defaults
//!
//! - `worker_count` - twice the host parallelism. Shared pools mostly run
//!   I/O-bound work, so oversubscribing the CPUs keeps them busy while other
//!   workers are blocked.
//! - `thread_name_prefix` - `"toolbox-worker"`; threads are named
//!   `"{prefix} #{n}"` with `n` starting at 1.
//! - `stack_size` - platform default.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::PoolConfig;
//!
//! let config = PoolConfig::builder()
//!     .worker_count(4)
//!     .thread_name_prefix("image-decoder")
//!     .build()
//!     .expect("valid pool config");
//!
//! assert_eq!(config.thread_name(1), "image-decoder #1");
//! ```
//!
//! ## Error Handling
//!
//! The builder validates every value and returns an actionable message:
//!
//! ```should_panic
//! use core_runtime::config::PoolConfig;
//!
//! let config = PoolConfig::builder()
//!     .worker_count(0)
//!     .build()
//!     .expect("Should fail - a pool needs at least one worker");
//! ```

use crate::error::{Error, Result};
use std::num::NonZeroUsize;
use std::thread;

/// Largest worker count accepted by [`PoolConfig::validate`].
pub const MAX_WORKERS: usize = 1024;

/// Smallest explicit stack size accepted by [`PoolConfig::validate`].
pub const MIN_STACK_SIZE: usize = 64 * 1024;

const DEFAULT_THREAD_NAME_PREFIX: &str = "toolbox-worker";

/// Configuration for a pool of background worker threads.
///
/// Use [`PoolConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads started with the pool
    pub worker_count: usize,

    /// Prefix used to name worker threads
    pub thread_name_prefix: String,

    /// Stack size for worker threads (platform default when `None`)
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
        }
    }
}

/// Twice the available parallelism, or 2 when the host cannot report it.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_mul(2)
        .min(MAX_WORKERS)
}

impl PoolConfig {
    /// Creates a new builder for constructing a `PoolConfig`.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::PoolConfig;
    ///
    /// let builder = PoolConfig::builder();
    /// ```
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Worker count is between 1 and [`MAX_WORKERS`]
    /// - Thread name prefix is not blank
    /// - Stack size, when given, is at least [`MIN_STACK_SIZE`]
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config(
                "Worker count must be greater than 0".to_string(),
            ));
        }

        if self.worker_count > MAX_WORKERS {
            return Err(Error::Config(format!(
                "Worker count {} exceeds maximum of {}",
                self.worker_count, MAX_WORKERS
            )));
        }

        if self.thread_name_prefix.trim().is_empty() {
            return Err(Error::Config(
                "Thread name prefix cannot be empty. Use .thread_name_prefix() to set it."
                    .to_string(),
            ));
        }

        if let Some(stack_size) = self.stack_size {
            if stack_size < MIN_STACK_SIZE {
                return Err(Error::Config(format!(
                    "Stack size of {} bytes is below the minimum of {} bytes",
                    stack_size, MIN_STACK_SIZE
                )));
            }
        }

        Ok(())
    }

    /// Name of the `index`-th worker thread.
    pub fn thread_name(&self, index: usize) -> String {
        format!("{} #{}", self.thread_name_prefix, index)
    }

    /// A `std::thread::Builder` preconfigured with this pool's naming and stack size.
    pub fn thread_builder(&self, index: usize) -> thread::Builder {
        let builder = thread::Builder::new().name(self.thread_name(index));
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}

/// Builder for constructing [`PoolConfig`] instances.
///
/// Unset values fall back to the defaults documented at the module level;
/// [`build()`](PoolConfigBuilder::build) validates the result.
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    worker_count: Option<usize>,
    thread_name_prefix: Option<String>,
    stack_size: Option<usize>,
}

impl PoolConfigBuilder {
    /// Sets the number of worker threads.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::PoolConfig;
    ///
    /// let config = PoolConfig::builder().worker_count(3).build().unwrap();
    /// assert_eq!(config.worker_count, 3);
    /// ```
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    /// Sets the prefix used to name worker threads.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = Some(prefix.into());
        self
    }

    /// Sets the stack size of worker threads, in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Builds the final `PoolConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(PoolConfig)` on success, or `Error::Config` if any value
    /// fails [`PoolConfig::validate`].
    pub fn build(self) -> Result<PoolConfig> {
        let defaults = PoolConfig::default();

        let config = PoolConfig {
            worker_count: self.worker_count.unwrap_or(defaults.worker_count),
            thread_name_prefix: self
                .thread_name_prefix
                .unwrap_or(defaults.thread_name_prefix),
            stack_size: self.stack_size.or(defaults.stack_size),
        };

        config.validate()?;

        Ok(config)
    }
}
