//! Configuration for the gate daemon.
//!
//! The configuration is a YAML document with `startup` and `readiness`
//! sections (each an ordered list of checks plus a polling interval and
//! optional grace period) and a `responder` listen address:
//!
//! ```yaml
//! responder:
//!   addr: "127.0.0.1:8081"
//! startup:
//!   interval: 6s
//!   checks:
//!     - name: migrated
//!       command:
//!         run: "test -f /var/run/app/migrated"
//! readiness:
//!   checks:
//!     - name: upstream
//!       tcp:
//!         host: 127.0.0.1
//!         port: 5432
//! ```
//!
//! The optional wrapped command is supplied on the command line, not in
//! the document.

mod error;
mod load;
mod parse;

pub use error::ConfigError;
pub use load::load;
pub use parse::parse_duration;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

/// Interval between check passes when the config does not set one.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(6);
/// Per-check timeout applied when a check sets none (or zero).
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Responder (health endpoint) configuration.
    #[serde(default)]
    pub responder: ResponderConfig,
    /// Startup phase: checks gating the transition to running.
    #[serde(default)]
    pub startup: PhaseConfig,
    /// Readiness phase: checks polled for the lifetime of the daemon.
    #[serde(default)]
    pub readiness: PhaseConfig,
    /// Wrapped command to supervise, from the command line.
    #[serde(skip)]
    pub wrap: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            responder: ResponderConfig::default(),
            startup: PhaseConfig::default(),
            readiness: PhaseConfig::default(),
            wrap: None,
        }
    }
}

impl Config {
    /// Parse a YAML document and apply defaults.
    pub fn from_yaml(doc: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_slice(doc)?;
        config.apply_defaults();
        Ok(config)
    }

    /// Fill in per-check timeouts left at zero/absent.
    fn apply_defaults(&mut self) {
        for check in self
            .startup
            .checks
            .iter_mut()
            .chain(self.readiness.checks.iter_mut())
        {
            if check.timeout.is_none() {
                check.timeout = Some(DEFAULT_CHECK_TIMEOUT);
            }
        }
    }
}

/// Listen address for the health responder.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponderConfig {
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

/// One phase's check list and pacing.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Ordered list of checks; order is correctness-relevant for startup.
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    /// Fixed interval between passes. No backoff.
    #[serde(default, deserialize_with = "parse::de_opt_duration")]
    pub interval: Option<Duration>,
    /// One-time sleep before the first pass.
    #[serde(default, deserialize_with = "parse::de_opt_duration")]
    pub grace_period: Option<Duration>,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            checks: Vec::new(),
            interval: None,
            grace_period: None,
        }
    }
}

impl PhaseConfig {
    /// Interval between passes, with the default applied.
    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_CHECK_INTERVAL)
    }
}

/// One check entry. Exactly one of `command`, `tcp`, or `http` must be
/// populated; anything else is rejected when the checker is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub name: String,
    #[serde(default, deserialize_with = "parse::de_opt_duration")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub command: Option<CommandCheckConfig>,
    #[serde(default)]
    pub tcp: Option<TcpCheckConfig>,
    #[serde(default)]
    pub http: Option<HttpCheckConfig>,
}

impl CheckConfig {
    /// Per-check timeout with the default applied.
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_CHECK_TIMEOUT)
    }
}

/// Command probe: run a program, exit code 0 is healthy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandCheckConfig {
    /// Shell-style command line, tokenized once at construction.
    pub run: String,
}

/// TCP probe: connect, optionally exchange payloads, optionally match a
/// response pattern.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpCheckConfig {
    pub host: String,
    pub port: u16,
    /// Payload written right after connecting.
    #[serde(default)]
    pub send: Option<String>,
    /// Payload written (best-effort) before disconnecting.
    #[serde(default)]
    pub quit: Option<String>,
    /// Cap on bytes read when matching a pattern. Default 32 KiB.
    #[serde(default)]
    pub max_bytes: Option<usize>,
    /// Pattern the response must match.
    #[serde(default)]
    pub expect_pattern: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub no_check_certificate: bool,
}

/// HTTP probe: issue a request, require an expected status and optionally
/// a body pattern.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpCheckConfig {
    pub url: String,
    /// Request method, default GET.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Accepted status codes, e.g. "200,201,300-399". Default: [200, 400).
    #[serde(default)]
    pub expect_code: Option<String>,
    /// Pattern the response body must match.
    #[serde(default)]
    pub expect_pattern: Option<String>,
    #[serde(default)]
    pub no_check_certificate: bool,
}
