//! Pluggable health probes.
//!
//! A [`Checker`] is one unit of probing work: identify yourself, then
//! execute against a deadline. Three variants exist — command, TCP, and
//! HTTP — selected by which section of the check's configuration is
//! populated. All expensive preparation (command tokenization, pattern
//! compilation, URL validation, status-range parsing, TLS client setup)
//! happens once at construction; a run costs exactly the I/O it performs.

mod command;
mod error;
mod http;
mod tcp;

pub use command::CommandChecker;
pub use error::{CheckError, CheckFailure, PassFailures};
pub use http::HttpChecker;
pub use tcp::TcpChecker;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{CheckConfig, ConfigError};
use crate::state::Phase;

/// Invocation metadata handed to every run.
///
/// Passed explicitly rather than smuggled through an ambient context so a
/// checker can be exercised in isolation.
#[derive(Debug, Clone)]
pub struct CheckContext {
    /// Phase the owning loop is in, for log correlation.
    pub phase: Phase,
    /// Position of this check in its phase's declared order.
    pub index: usize,
    /// Daemon-wide shutdown token; runs must not outlive it.
    pub cancel: CancellationToken,
}

/// One health probe.
#[async_trait]
pub trait Checker: Send + Sync + std::fmt::Debug {
    /// Configured name, for logs and failure reports.
    fn name(&self) -> &str;

    /// Execute the probe once.
    ///
    /// Must return within the check's own timeout or the shared
    /// cancellation, whichever comes first. Malformed runtime input
    /// (network errors, non-zero exits, pattern mismatches) resolves to a
    /// [`CheckError`], never a panic.
    async fn run(&self, ctx: &CheckContext) -> Result<(), CheckError>;
}

/// Build the checker selected by `cfg`.
///
/// Exactly one of the probe variants must be populated; zero or several is
/// a configuration error rather than a silent priority pick.
pub fn new_checker(cfg: &CheckConfig) -> Result<Box<dyn Checker>, ConfigError> {
    match (&cfg.command, &cfg.tcp, &cfg.http) {
        (Some(command), None, None) => Ok(Box::new(CommandChecker::new(cfg, command)?)),
        (None, Some(tcp), None) => Ok(Box::new(TcpChecker::new(cfg, tcp)?)),
        (None, None, Some(http)) => Ok(Box::new(HttpChecker::new(cfg, http)?)),
        (None, None, None) => Err(ConfigError::check(
            &cfg.name,
            "one of command, tcp, or http must be set",
        )),
        _ => Err(ConfigError::check(
            &cfg.name,
            "only one of command, tcp, or http may be set",
        )),
    }
}

/// Run `work` bounded by `timeout` and the shared cancellation token.
pub(crate) async fn bounded<F>(
    timeout: Duration,
    ctx: &CheckContext,
    work: F,
) -> Result<(), CheckError>
where
    F: Future<Output = Result<(), CheckError>>,
{
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(CheckError::Interrupted),
        result = tokio::time::timeout(timeout, work) => match result {
            Ok(result) => result,
            Err(_) => Err(CheckError::Timeout { after: timeout }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandCheckConfig, HttpCheckConfig, TcpCheckConfig};

    fn base(name: &str) -> CheckConfig {
        CheckConfig {
            name: name.to_string(),
            timeout: Some(Duration::from_secs(1)),
            command: None,
            tcp: None,
            http: None,
        }
    }

    #[test]
    fn test_exactly_one_variant_required() {
        let none = base("none");
        let err = new_checker(&none).unwrap_err();
        assert!(err.to_string().contains("one of command, tcp, or http"));

        let mut both = base("both");
        both.command = Some(CommandCheckConfig {
            run: "true".to_string(),
        });
        both.tcp = Some(TcpCheckConfig {
            host: "127.0.0.1".to_string(),
            port: 80,
            send: None,
            quit: None,
            max_bytes: None,
            expect_pattern: None,
            tls: false,
            no_check_certificate: false,
        });
        let err = new_checker(&both).unwrap_err();
        assert!(err.to_string().contains("only one"));
    }

    #[test]
    fn test_each_variant_builds() {
        let mut command = base("command");
        command.command = Some(CommandCheckConfig {
            run: "echo ok".to_string(),
        });
        assert_eq!(new_checker(&command).unwrap().name(), "command");

        let mut tcp = base("tcp");
        tcp.tcp = Some(TcpCheckConfig {
            host: "localhost".to_string(),
            port: 5432,
            send: None,
            quit: None,
            max_bytes: None,
            expect_pattern: None,
            tls: false,
            no_check_certificate: false,
        });
        assert_eq!(new_checker(&tcp).unwrap().name(), "tcp");

        let mut http = base("http");
        http.http = Some(HttpCheckConfig {
            url: "http://localhost:8080/healthz".to_string(),
            method: None,
            headers: Default::default(),
            body: None,
            expect_code: None,
            expect_pattern: None,
            no_check_certificate: false,
        });
        assert_eq!(new_checker(&http).unwrap().name(), "http");
    }
}
