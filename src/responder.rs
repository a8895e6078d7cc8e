//! HTTP health responder.
//!
//! Serves the current [`Signal`] as a status code on every request,
//! regardless of path or method: an orchestrator's poller only cares
//! about the code. Updates arrive over a single-slot watch channel —
//! intentionally lossy under backpressure, since only the most recent
//! health state matters — and a dedicated listener task writes them into
//! the mutex-guarded cell the request handlers read.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming as IncomingBody;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::signal::Signal;

/// HTTP endpoint reporting the current signal.
pub struct Responder {
    addr: SocketAddr,
    current: Arc<Mutex<Signal>>,
    rx: watch::Receiver<Signal>,
}

impl Responder {
    /// Create a responder and the sender used to publish signal updates.
    pub fn new(addr: SocketAddr) -> (Self, watch::Sender<Signal>) {
        let (tx, rx) = watch::channel(Signal::Unset);
        (
            Self {
                addr,
                current: Arc::new(Mutex::new(Signal::Unset)),
                rx,
            },
            tx,
        )
    }

    /// Bind and serve until cancellation.
    ///
    /// Returns `Ok(())` only when stopped by the token; while the daemon
    /// is running this function is not supposed to return at all, so any
    /// bind or accept failure is fatal.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(Error::Responder)?;
        info!(addr = %self.addr, "responder listening");

        let drain = tokio::spawn(drain_signals(
            self.rx.clone(),
            Arc::clone(&self.current),
            cancel.clone(),
        ));

        loop {
            let (stream, _) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted.map_err(Error::Responder)?,
            };
            let _ = stream.set_nodelay(true);

            let current = Arc::clone(&self.current);
            let token = cancel.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<IncomingBody>| {
                    let signal = read_cell(&current);
                    async move { Ok::<_, std::convert::Infallible>(signal_response(signal)) }
                });

                let io = TokioIo::new(stream);
                let conn = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(conn);
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!(error = %e, "responder connection error");
                        }
                    }
                    _ = token.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        let _ = conn.as_mut().await;
                    }
                }
            });
        }

        let _ = drain.await;
        Ok(())
    }
}

/// Drain the signal channel into the shared cell until cancellation or
/// until the publisher goes away.
async fn drain_signals(
    mut rx: watch::Receiver<Signal>,
    current: Arc<Mutex<Signal>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let next = *rx.borrow_and_update();
                debug!(signal = %next, "signal received");
                set_cell(&current, next);
            }
        }
    }
}

fn read_cell(cell: &Mutex<Signal>) -> Signal {
    *cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Write the new value, coalescing redundant writes of the same signal.
fn set_cell(cell: &Mutex<Signal>, next: Signal) {
    let mut current = cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *current == next {
        return;
    }
    info!(from = %*current, to = %next, "signal changed");
    *current = next;
}

/// Total mapping from signal to HTTP response.
fn signal_response(signal: Signal) -> Response<Full<Bytes>> {
    let (status, message) = match signal {
        Signal::Green => (StatusCode::OK, "OK"),
        Signal::Yellow | Signal::Red => {
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
        Signal::Unset => {
            warn!(signal = %signal, "no signal published yet");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_mapping_is_total() {
        assert_eq!(signal_response(Signal::Green).status(), StatusCode::OK);
        assert_eq!(
            signal_response(Signal::Yellow).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            signal_response(Signal::Red).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            signal_response(Signal::Unset).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_redundant_writes_coalesce() {
        let cell = Mutex::new(Signal::Unset);
        set_cell(&cell, Signal::Green);
        set_cell(&cell, Signal::Green);
        assert_eq!(read_cell(&cell), Signal::Green);
        set_cell(&cell, Signal::Yellow);
        assert_eq!(read_cell(&cell), Signal::Yellow);
    }

    async fn free_port() -> SocketAddr {
        // Bind to pick an unused port, then release it for the responder.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    async fn get_status(addr: SocketAddr) -> Option<u16> {
        reqwest::get(format!("http://{}/", addr))
            .await
            .ok()
            .map(|r| r.status().as_u16())
    }

    /// Poll until the endpoint reports the wanted status or time runs out.
    async fn wait_for_status(addr: SocketAddr, wanted: u16) {
        for _ in 0..50 {
            if get_status(addr).await == Some(wanted) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("endpoint never reported {}", wanted);
    }

    #[tokio::test]
    async fn test_serves_published_signal() {
        let addr = free_port().await;
        let (responder, signal) = Responder::new(addr);
        let cancel = CancellationToken::new();
        let server = tokio::spawn(responder.run(cancel.clone()));

        wait_for_status(addr, 500).await;

        signal.send(Signal::Green).unwrap();
        wait_for_status(addr, 200).await;

        signal.send(Signal::Yellow).unwrap();
        wait_for_status(addr, 503).await;

        signal.send(Signal::Green).unwrap();
        wait_for_status(addr, 200).await;

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        // Occupy a port, then ask the responder to bind the same one.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (responder, _signal) = Responder::new(addr);
        let err = responder.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Responder(_)));
    }
}
