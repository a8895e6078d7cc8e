//! Command probe.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::{CheckContext, CheckError, Checker};
use crate::config::{CheckConfig, CommandCheckConfig, ConfigError};

/// Grace window between SIGTERM and SIGKILL for a probe command that is
/// being torn down on timeout or shutdown.
const KILL_GRACE: Duration = Duration::from_secs(3);

/// Runs a command; exit code 0 means healthy.
///
/// The command line is tokenized with shell-word splitting exactly once at
/// construction. The spawned process inherits the daemon's environment;
/// stdout and stderr are captured together for failure reports.
#[derive(Debug)]
pub struct CommandChecker {
    name: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandChecker {
    pub fn new(cfg: &CheckConfig, command: &CommandCheckConfig) -> Result<Self, ConfigError> {
        let argv = shell_words::split(&command.run).map_err(|e| {
            ConfigError::check(
                &cfg.name,
                format!("failed to tokenize command {:?}: {}", command.run, e),
            )
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            argv,
            timeout: cfg.timeout(),
        })
    }

    /// Wait for the child while draining stdout and stderr into one buffer.
    /// The streams are read concurrently so neither pipe can fill up and
    /// wedge the child.
    async fn collect(child: &mut Child) -> std::io::Result<(std::process::ExitStatus, String)> {
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out = Vec::new();
        let mut err = Vec::new();

        let (read_out, read_err) = tokio::join!(
            async {
                match stdout.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut out).await.map(|_| ()),
                    None => Ok(()),
                }
            },
            async {
                match stderr.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut err).await.map(|_| ()),
                    None => Ok(()),
                }
            },
        );
        read_out?;
        read_err?;

        let status = child.wait().await?;
        out.extend_from_slice(&err);
        Ok((status, String::from_utf8_lossy(&out).into_owned()))
    }

    /// SIGTERM, a bounded grace window, then SIGKILL. Keeps a timed-out or
    /// interrupted probe from leaving an orphan behind.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            match tokio::time::timeout(KILL_GRACE, child.wait()).await {
                Ok(_) => return,
                Err(_) => {
                    warn!(name = %self.name, pid, "command ignored SIGTERM, killing");
                }
            }
        }
        let _ = child.kill().await;
    }
}

#[async_trait]
impl Checker for CommandChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        if self.argv.is_empty() {
            return Err(CheckError::NoCommand);
        }

        debug!(
            name = %self.name,
            phase = %ctx.phase,
            index = ctx.index,
            command = ?self.argv,
            "executing command"
        );

        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(CheckError::Spawn)?;

        // None means the deadline or shutdown won before the child finished;
        // the collect future is dropped here so the child handle is free
        // again for termination.
        let outcome = {
            let work = Self::collect(&mut child);
            tokio::pin!(work);
            tokio::select! {
                _ = ctx.cancel.cancelled() => None,
                result = tokio::time::timeout(self.timeout, work.as_mut()) => Some(result),
            }
        };

        match outcome {
            Some(Ok(Ok((status, output)))) => {
                if status.success() {
                    debug!(name = %self.name, output = %output.trim_end(), "command succeeded");
                    Ok(())
                } else {
                    info!(
                        name = %self.name,
                        phase = %ctx.phase,
                        index = ctx.index,
                        exit_code = status.code(),
                        output = %output.trim_end(),
                        "command failed"
                    );
                    Err(CheckError::Exit {
                        code: status.code(),
                        output,
                    })
                }
            }
            Some(Ok(Err(e))) => Err(CheckError::Io(e)),
            Some(Err(_)) => {
                self.terminate(&mut child).await;
                Err(CheckError::Timeout { after: self.timeout })
            }
            None => {
                self.terminate(&mut child).await;
                Err(CheckError::Interrupted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;
    use tokio_util::sync::CancellationToken;

    fn checker(run: &str, timeout: Duration) -> CommandChecker {
        let cfg = CheckConfig {
            name: "test".to_string(),
            timeout: Some(timeout),
            command: Some(CommandCheckConfig {
                run: run.to_string(),
            }),
            tcp: None,
            http: None,
        };
        let command = cfg.command.clone().unwrap();
        CommandChecker::new(&cfg, &command).unwrap()
    }

    fn ctx() -> CheckContext {
        CheckContext {
            phase: Phase::Startup,
            index: 0,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_bad_tokenization_is_config_error() {
        let cfg = CheckConfig {
            name: "broken".to_string(),
            timeout: None,
            command: Some(CommandCheckConfig {
                run: "echo 'unterminated".to_string(),
            }),
            tcp: None,
            http: None,
        };
        let command = cfg.command.clone().unwrap();
        let err = CommandChecker::new(&cfg, &command).unwrap_err();
        assert!(err.to_string().contains("tokenize"));
    }

    #[tokio::test]
    async fn test_zero_exit_succeeds() {
        let checker = checker("true", Duration::from_secs(5));
        checker.run(&ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_code() {
        let checker = checker("sh -c 'echo boom >&2; exit 3'", Duration::from_secs(5));
        let err = checker.run(&ctx()).await.unwrap_err();
        match err {
            CheckError::Exit { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("expected Exit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_command_never_spawns() {
        let checker = checker("", Duration::from_secs(5));
        let err = checker.run(&ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "no command");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let checker = checker("/no/such/program-xyz", Duration::from_secs(5));
        let err = checker.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, CheckError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_deadline_kills_command() {
        let checker = checker("sleep 30", Duration::from_millis(100));
        let start = std::time::Instant::now();
        let err = checker.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, CheckError::Timeout { .. }));
        // SIGTERM should end sleep well inside the kill grace window.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_command() {
        let checker = checker("sleep 30", Duration::from_secs(60));
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = checker.run(&ctx).await.unwrap_err();
        assert!(matches!(err, CheckError::Interrupted));
    }
}
