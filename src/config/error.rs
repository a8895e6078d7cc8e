//! Configuration error types.

use std::fmt;

/// Error type for configuration loading and check construction.
///
/// Everything here is fatal: a malformed configuration is never retried.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read a local configuration file.
    Io { path: String, error: std::io::Error },
    /// Failed to fetch configuration over HTTP(S).
    Fetch { url: String, message: String },
    /// Unsupported configuration source scheme.
    Scheme { url: String },
    /// Failed to parse the configuration document.
    Parse(serde_yaml::Error),
    /// A check definition is malformed (bad command line, URL, pattern,
    /// status-code specification, or probe-variant selection).
    Check { name: String, message: String },
}

impl ConfigError {
    /// Shorthand for a per-check construction failure.
    pub fn check(name: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Check {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "failed to read config '{}': {}", path, error)
            }
            ConfigError::Fetch { url, message } => {
                write!(f, "failed to fetch config from {}: {}", url, message)
            }
            ConfigError::Scheme { url } => {
                write!(
                    f,
                    "invalid config source {}: scheme must be http, https, or a file path",
                    url
                )
            }
            ConfigError::Parse(e) => write!(f, "failed to parse config: {}", e),
            ConfigError::Check { name, message } => {
                write!(f, "invalid check '{}': {}", name, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { error, .. } => Some(error),
            ConfigError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e)
    }
}
