//! Errors shared by the runtime infrastructure.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A configuration value was rejected; the message says which and why.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The global tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
