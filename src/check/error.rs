//! Check failure types.

use std::fmt;
use std::time::Duration;

/// A probe returned an unhealthy result.
///
/// Recoverable by design: the startup loop retries at a fixed interval and
/// the readiness loop folds it into the published signal. Never fatal to
/// the daemon.
#[derive(Debug)]
pub enum CheckError {
    /// The tokenized command line was empty.
    NoCommand,
    /// The probe command could not be started.
    Spawn(std::io::Error),
    /// The probe command exited non-zero.
    Exit { code: Option<i32>, output: String },
    /// The probe did not finish within its timeout.
    Timeout { after: Duration },
    /// The probe was interrupted by daemon shutdown.
    Interrupted,
    /// Connecting (including any TLS handshake) failed.
    Connect { addr: String, error: std::io::Error },
    /// I/O on an established connection failed.
    Io(std::io::Error),
    /// The HTTP request failed in transport.
    Request(reqwest::Error),
    /// The HTTP response status was not in the accepted set.
    Status { code: u16 },
    /// The response did not match the expected pattern.
    Pattern { pattern: String },
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::NoCommand => write!(f, "no command"),
            CheckError::Spawn(e) => write!(f, "failed to spawn command: {}", e),
            CheckError::Exit { code, output } => {
                match code {
                    Some(code) => write!(f, "command exited with code {}", code)?,
                    None => write!(f, "command terminated by signal")?,
                }
                if !output.is_empty() {
                    write!(f, ": {}", output.trim_end())?;
                }
                Ok(())
            }
            CheckError::Timeout { after } => {
                write!(f, "timed out after {:?}", after)
            }
            CheckError::Interrupted => write!(f, "interrupted by shutdown"),
            CheckError::Connect { addr, error } => {
                write!(f, "connect to {} failed: {}", addr, error)
            }
            CheckError::Io(e) => write!(f, "i/o failed: {}", e),
            CheckError::Request(e) => write!(f, "http request failed: {}", e),
            CheckError::Status { code } => {
                write!(f, "unexpected status code {}", code)
            }
            CheckError::Pattern { pattern } => {
                write!(f, "response did not match pattern {:?}", pattern)
            }
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckError::Spawn(e) | CheckError::Io(e) => Some(e),
            CheckError::Connect { error, .. } => Some(error),
            CheckError::Request(e) => Some(e),
            _ => None,
        }
    }
}

/// A [`CheckError`] tagged with the identity of the failing check.
#[derive(Debug)]
pub struct CheckFailure {
    pub index: usize,
    pub name: String,
    pub error: CheckError,
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "check index:{} name:{} failed: {}",
            self.index, self.name, self.error
        )
    }
}

impl std::error::Error for CheckFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Every failure from one readiness pass, joined for reporting.
///
/// The readiness loop never short-circuits, so one pass can accumulate
/// several of these; no individual cause is dropped.
#[derive(Debug)]
pub struct PassFailures(pub Vec<CheckFailure>);

impl PassFailures {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PassFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for PassFailures {}
