//! Daemon-fatal error types.
//!
//! Check failures are deliberately absent here: they are recoverable by
//! design and never escape the loop that owns them. Only configuration,
//! responder (transport), and supervisor failures terminate the daemon.

use std::fmt;

use crate::config::ConfigError;
use crate::supervisor::SupervisorError;

/// Unrecoverable daemon error.
#[derive(Debug)]
pub enum Error {
    /// Malformed configuration or check construction failure.
    Config(ConfigError),
    /// The responder's HTTP listener could not bind or serve.
    Responder(std::io::Error),
    /// The wrapped child process failed or exited unexpectedly.
    Supervisor(SupervisorError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "{}", e),
            Error::Responder(e) => write!(f, "responder failed: {}", e),
            Error::Supervisor(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Responder(e) => Some(e),
            Error::Supervisor(e) => Some(e),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<SupervisorError> for Error {
    fn from(e: SupervisorError) -> Self {
        Error::Supervisor(e)
    }
}
