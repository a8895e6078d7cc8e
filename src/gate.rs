//! Check orchestration.
//!
//! The gate drives the whole daemon: a sequential startup retry loop, then
//! the readiness loop, responder, and optional child supervisor racing
//! each other under one shared cancellation token. The first component to
//! finish decides the daemon's fate; everything else unwinds through the
//! token per its own cancellation contract.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::check::{new_checker, CheckContext, CheckFailure, Checker, PassFailures};
use crate::config::Config;
use crate::error::Error;
use crate::responder::Responder;
use crate::signal::Signal;
use crate::state::PhaseState;
use crate::supervisor::Supervisor;

/// Completion report from one of the long-lived tasks.
enum Exit {
    /// Readiness loop stopped; only happens on cancellation.
    Readiness,
    Responder(Result<(), Error>),
    Supervisor(Result<(), Error>),
}

/// The daemon core: owns the phase state, both check lists, and the
/// composition of responder and supervisor.
#[derive(Debug)]
pub struct Gate {
    config: Config,
    state: PhaseState,
    startup_checks: Vec<Box<dyn Checker>>,
    readiness_checks: Vec<Box<dyn Checker>>,
    supervisor: Option<Supervisor>,
}

impl Gate {
    /// Build every checker up front; misconfiguration surfaces here, not
    /// at probe time.
    pub fn new(config: Config) -> Result<Self, Error> {
        let startup_checks = config
            .startup
            .checks
            .iter()
            .map(new_checker)
            .collect::<Result<Vec<_>, _>>()?;
        let readiness_checks = config
            .readiness
            .checks
            .iter()
            .map(new_checker)
            .collect::<Result<Vec<_>, _>>()?;
        let supervisor = config
            .wrap
            .as_ref()
            .filter(|argv| !argv.is_empty())
            .map(|argv| Supervisor::new(argv.clone()));

        Ok(Self {
            config,
            state: PhaseState::new(),
            startup_checks,
            readiness_checks,
            supervisor,
        })
    }

    /// Run until cancellation or the first fatal component failure.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), Error> {
        let (responder, signal) = Responder::new(self.config.responder.addr);
        let (done, mut events) = mpsc::channel::<Exit>(3);
        let mut live = 0usize;

        if let Some(supervisor) = self.supervisor.take() {
            let token = cancel.clone();
            let done = done.clone();
            live += 1;
            tokio::spawn(async move {
                let result = supervisor.run(token).await.map_err(Error::Supervisor);
                let _ = done.send(Exit::Supervisor(result)).await;
            });
        }

        // Startup gate, racing the wrapped process if one is running.
        {
            let startup = self.run_startup(&cancel);
            tokio::pin!(startup);
            tokio::select! {
                _ = startup.as_mut() => {}
                event = events.recv(), if live > 0 => {
                    cancel.cancel();
                    return match event {
                        Some(Exit::Supervisor(result)) => result,
                        _ => Ok(()),
                    };
                }
            }
        }

        if cancel.is_cancelled() {
            // Shut down during startup; unwind anything already running.
            return drain(&mut events, live, Ok(())).await;
        }

        // Every startup check has passed: open the gate.
        let _ = signal.send(Signal::Green);

        {
            let token = cancel.clone();
            let done = done.clone();
            live += 1;
            tokio::spawn(async move {
                let result = responder.run(token).await;
                let _ = done.send(Exit::Responder(result)).await;
            });
        }
        {
            let token = cancel.clone();
            live += 1;
            tokio::spawn(async move {
                let mut gate = self;
                gate.run_readiness(signal, &token).await;
                let _ = done.send(Exit::Readiness).await;
            });
        }

        // First completion decides the overall exit.
        let first = events.recv().await;
        cancel.cancel();
        live -= 1;
        let outcome = match first {
            Some(Exit::Readiness) | None => Ok(()),
            Some(Exit::Responder(result)) | Some(Exit::Supervisor(result)) => result,
        };
        drain(&mut events, live, outcome).await
    }

    /// Startup retry loop. Exits on success or cancellation, never with an
    /// error: a failed pass just sleeps and resumes at the failing check.
    async fn run_startup(&mut self, cancel: &CancellationToken) {
        info!(phase = %self.state.phase(), "phase start");
        if let Some(grace) = self.config.startup.grace_period {
            info!(phase = %self.state.phase(), grace_period = ?grace, "sleeping grace period");
            idle(grace, cancel).await;
        }
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.startup_pass(cancel).await {
                Ok(()) => {
                    let from = self.state.phase();
                    self.state.advance();
                    info!(from = %from, to = %self.state.phase(), "all startup checks passed");
                    return;
                }
                Err(failure) => {
                    info!(
                        phase = %self.state.phase(),
                        index = self.state.check_index(),
                        error = %failure,
                        "startup checks failed"
                    );
                    debug!(
                        phase = %self.state.phase(),
                        interval = ?self.config.startup.interval(),
                        "sleeping until next pass"
                    );
                    idle(self.config.startup.interval(), cancel).await;
                }
            }
        }
    }

    /// One startup pass, resuming at the stored check index. Aborts at the
    /// first failure and leaves the index there, so checks that already
    /// passed are never re-run within this startup phase.
    async fn startup_pass(&mut self, cancel: &CancellationToken) -> Result<(), CheckFailure> {
        for index in self.state.check_index()..self.startup_checks.len() {
            self.state.set_check_index(index);
            let check = &self.startup_checks[index];
            let ctx = CheckContext {
                phase: self.state.phase(),
                index,
                cancel: cancel.clone(),
            };
            let started = Instant::now();
            match check.run(&ctx).await {
                Ok(()) => {
                    debug!(
                        name = check.name(),
                        phase = %ctx.phase,
                        index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "check passed"
                    );
                }
                Err(error) => {
                    info!(
                        name = check.name(),
                        phase = %ctx.phase,
                        index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %error,
                        "check failed"
                    );
                    return Err(CheckFailure {
                        index,
                        name: check.name().to_string(),
                        error,
                    });
                }
            }
        }
        Ok(())
    }

    /// Readiness loop. Publishes Green or Yellow after every pass and only
    /// ever terminates on cancellation.
    async fn run_readiness(&mut self, signal: watch::Sender<Signal>, cancel: &CancellationToken) {
        info!(phase = %self.state.phase(), "phase start");
        if let Some(grace) = self.config.readiness.grace_period {
            info!(phase = %self.state.phase(), grace_period = ?grace, "sleeping grace period");
            idle(grace, cancel).await;
        }
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let failures = self.readiness_pass(cancel).await;
            if cancel.is_cancelled() {
                return;
            }
            if failures.is_empty() {
                debug!(phase = %self.state.phase(), "all readiness checks passed");
                let _ = signal.send(Signal::Green);
            } else {
                info!(phase = %self.state.phase(), error = %failures, "readiness checks failed");
                let _ = signal.send(Signal::Yellow);
            }
            idle(self.config.readiness.interval(), cancel).await;
        }
    }

    /// One readiness pass. Every check runs, in order, no matter how many
    /// before it failed; all failures are reported together.
    async fn readiness_pass(&self, cancel: &CancellationToken) -> PassFailures {
        let mut failures = Vec::new();
        for (index, check) in self.readiness_checks.iter().enumerate() {
            let ctx = CheckContext {
                phase: self.state.phase(),
                index,
                cancel: cancel.clone(),
            };
            let started = Instant::now();
            match check.run(&ctx).await {
                Ok(()) => {
                    debug!(
                        name = check.name(),
                        phase = %ctx.phase,
                        index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "check passed"
                    );
                }
                Err(error) => {
                    info!(
                        name = check.name(),
                        phase = %ctx.phase,
                        index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        error = %error,
                        "check failed"
                    );
                    failures.push(CheckFailure {
                        index,
                        name: check.name().to_string(),
                        error,
                    });
                }
            }
        }
        PassFailures(failures)
    }
}

/// Consume the remaining completion events so every component has stopped
/// before the daemon returns. The first error seen wins if the outcome so
/// far is clean.
async fn drain(
    events: &mut mpsc::Receiver<Exit>,
    mut remaining: usize,
    mut outcome: Result<(), Error>,
) -> Result<(), Error> {
    while remaining > 0 {
        match events.recv().await {
            Some(event) => {
                remaining -= 1;
                let result = match event {
                    Exit::Readiness => Ok(()),
                    Exit::Responder(result) | Exit::Supervisor(result) => result,
                };
                if outcome.is_ok() {
                    if let Err(e) = result {
                        outcome = Err(e);
                    }
                }
            }
            None => break,
        }
    }
    outcome
}

/// Cancellable fixed-interval sleep.
async fn idle(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
