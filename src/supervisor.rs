//! Wrapped child process supervision.
//!
//! When the daemon wraps a command, the supervisor owns that process for
//! the daemon's lifetime. The child's termination — for any reason,
//! including a clean exit — tears down the whole gate: a health responder
//! that outlives the thing it vouches for would be lying to the load
//! balancer.

use std::fmt;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace window between SIGTERM and SIGKILL at shutdown.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// Failure starting, waiting on, or an unexpected exit of the wrapped
/// process. Always fatal to the daemon.
#[derive(Debug)]
pub enum SupervisorError {
    Spawn {
        command: String,
        error: std::io::Error,
    },
    Wait(std::io::Error),
    /// The child exited while the daemon was still running. Exit code 0 is
    /// no less fatal: the wrapped service is gone either way.
    Exited(std::process::ExitStatus),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::Spawn { command, error } => {
                write!(f, "failed to start wrapped command {:?}: {}", command, error)
            }
            SupervisorError::Wait(e) => {
                write!(f, "failed to wait on wrapped command: {}", e)
            }
            SupervisorError::Exited(status) => {
                write!(f, "wrapped command exited: {}", status)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Spawn { error, .. } => Some(error),
            SupervisorError::Wait(e) => Some(e),
            SupervisorError::Exited(_) => None,
        }
    }
}

/// Runs and owns one external process for the daemon's lifetime.
#[derive(Debug)]
pub struct Supervisor {
    argv: Vec<String>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            grace: STOP_GRACE,
        }
    }

    #[cfg(test)]
    fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run the wrapped process until it exits or the daemon shuts down.
    ///
    /// Returns `Ok(())` only on the deliberate shutdown path: the daemon
    /// asked the child to stop, so its termination is not an error. Any
    /// exit the daemon did not request resolves to
    /// [`SupervisorError::Exited`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(SupervisorError::Spawn {
                command: String::new(),
                error: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };
        let mut child = Command::new(program)
            .args(args)
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|error| SupervisorError::Spawn {
                command: self.argv.join(" "),
                error,
            })?;

        info!(pid = child.id(), command = ?self.argv, "wrapped process started");

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        match status {
            Some(Ok(status)) => {
                warn!(%status, "wrapped process exited");
                Err(SupervisorError::Exited(status))
            }
            Some(Err(e)) => Err(SupervisorError::Wait(e)),
            None => {
                self.stop(&mut child).await;
                Ok(())
            }
        }
    }

    /// SIGTERM, bounded grace window, then SIGKILL.
    async fn stop(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            info!(pid, "stopping wrapped process");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(_) => return,
                Err(_) => {
                    warn!(pid, "wrapped process ignored SIGTERM, killing");
                }
            }
        }
        let _ = child.kill().await;
    }
}
