//! readygate - Readiness gating daemon powered by Rust and Tokio.
//!
//! This crate runs a sequence of startup checks before a managed service
//! is declared usable, then continuously runs readiness checks and
//! exposes the aggregated health as an HTTP signal for an external
//! orchestrator (load balancer, container platform) to poll. It can also
//! wrap a child process whose exit tears the whole gate down.
//!
//! # Features
//!
//! - **Three probe types**: command (exit code), TCP (dial/payload/pattern,
//!   optionally over TLS), and HTTP (status ranges and body patterns)
//! - **Startup resume**: a failed startup pass retries from the failing
//!   check, never re-running ones that already passed
//! - **Binary readiness signal**: every pass publishes Green or Yellow;
//!   the responder maps it to 200/503 for any request
//! - **Child supervision**: optional wrapped command with
//!   SIGTERM-then-SIGKILL shutdown semantics
//!
//! # Example
//!
//! ```rust,ignore
//! use readygate::{Gate, config};
//! use tokio_util::sync::CancellationToken;
//!
//! let cfg = config::load("readygate.yaml").await?;
//! let gate = Gate::new(cfg)?;
//! gate.run(CancellationToken::new()).await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod check;
pub mod config;
pub mod error;
pub mod gate;
pub mod responder;
pub mod signal;
pub mod state;
pub mod supervisor;

// Re-exports for convenience
pub use config::Config;
pub use error::Error;
pub use gate::Gate;
pub use signal::Signal;
