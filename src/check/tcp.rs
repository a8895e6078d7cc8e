//! TCP probe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use super::{bounded, CheckContext, CheckError, Checker};
use crate::config::{CheckConfig, ConfigError, TcpCheckConfig};

/// Cap on bytes read when matching a response pattern.
const DEFAULT_MAX_BYTES: usize = 32 * 1024;

#[derive(Debug)]
struct TlsParams {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

/// Dials an endpoint, optionally exchanges payloads, and optionally
/// requires the response to match a pattern. With `tls` enabled the dial
/// includes the handshake, so the probe exercises the full path a real
/// client would take.
#[derive(Debug)]
pub struct TcpChecker {
    name: String,
    host: String,
    port: u16,
    send: Option<String>,
    quit: Option<String>,
    max_bytes: usize,
    expect_pattern: Option<regex::bytes::Regex>,
    tls: Option<TlsParams>,
    timeout: Duration,
}

impl TcpChecker {
    pub fn new(cfg: &CheckConfig, tcp: &TcpCheckConfig) -> Result<Self, ConfigError> {
        let expect_pattern = match &tcp.expect_pattern {
            Some(pattern) => Some(regex::bytes::Regex::new(pattern).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid expect_pattern: {}", e))
            })?),
            None => None,
        };

        let tls = if tcp.tls {
            let server_name = ServerName::try_from(tcp.host.clone()).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid tls host {:?}: {}", tcp.host, e))
            })?;
            Some(TlsParams {
                config: Arc::new(tls_client_config(tcp.no_check_certificate)),
                server_name,
            })
        } else {
            None
        };

        Ok(Self {
            name: cfg.name.clone(),
            host: tcp.host.clone(),
            port: tcp.port,
            send: tcp.send.clone(),
            quit: tcp.quit.clone(),
            max_bytes: tcp.max_bytes.unwrap_or(DEFAULT_MAX_BYTES),
            expect_pattern,
            tls,
            timeout: cfg.timeout(),
        })
    }

    async fn exchange<S>(&self, mut stream: S) -> Result<(), CheckError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(send) = &self.send {
            debug!(name = %self.name, payload = %send, "sending payload");
            stream
                .write_all(send.as_bytes())
                .await
                .map_err(CheckError::Io)?;
        }

        if let Some(pattern) = &self.expect_pattern {
            let mut buf = vec![0u8; self.max_bytes];
            let n = stream.read(&mut buf).await.map_err(CheckError::Io)?;
            debug!(
                name = %self.name,
                response = %String::from_utf8_lossy(&buf[..n]),
                "read response"
            );
            if !pattern.is_match(&buf[..n]) {
                return Err(CheckError::Pattern {
                    pattern: pattern.to_string(),
                });
            }
        }

        if let Some(quit) = &self.quit {
            // Best effort; the endpoint may already have hung up.
            let _ = stream.write_all(quit.as_bytes()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Checker for TcpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        let addr = format!("{}:{}", self.host, self.port);
        debug!(
            name = %self.name,
            phase = %ctx.phase,
            index = ctx.index,
            addr = %addr,
            tls = self.tls.is_some(),
            "dialing"
        );

        bounded(self.timeout, ctx, async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|error| CheckError::Connect {
                    addr: addr.clone(),
                    error,
                })?;

            match &self.tls {
                Some(tls) => {
                    let connector = TlsConnector::from(Arc::clone(&tls.config));
                    let stream = connector
                        .connect(tls.server_name.clone(), stream)
                        .await
                        .map_err(|error| CheckError::Connect {
                            addr: addr.clone(),
                            error,
                        })?;
                    self.exchange(stream).await
                }
                None => self.exchange(stream).await,
            }
        })
        .await
    }
}

fn tls_client_config(no_check_certificate: bool) -> ClientConfig {
    if no_check_certificate {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    }
}

/// Accepts any server certificate. Only installed when the check opts out
/// of verification (`no_check_certificate: true`).
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Phase;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn checker(port: u16, tweak: impl FnOnce(&mut TcpCheckConfig)) -> TcpChecker {
        let mut tcp = TcpCheckConfig {
            host: "127.0.0.1".to_string(),
            port,
            send: None,
            quit: None,
            max_bytes: None,
            expect_pattern: None,
            tls: false,
            no_check_certificate: false,
        };
        tweak(&mut tcp);
        let cfg = CheckConfig {
            name: "tcp-test".to_string(),
            timeout: Some(Duration::from_millis(500)),
            command: None,
            tcp: Some(tcp.clone()),
            http: None,
        };
        TcpChecker::new(&cfg, &tcp).unwrap()
    }

    fn ctx() -> CheckContext {
        CheckContext {
            phase: Phase::Running,
            index: 0,
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let tcp = TcpCheckConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            send: None,
            quit: None,
            max_bytes: None,
            expect_pattern: Some("(".to_string()),
            tls: false,
            no_check_certificate: false,
        };
        let cfg = CheckConfig {
            name: "bad".to_string(),
            timeout: None,
            command: None,
            tcp: Some(tcp.clone()),
            http: None,
        };
        let err = TcpChecker::new(&cfg, &tcp).unwrap_err();
        assert!(err.to_string().contains("expect_pattern"));
    }

    #[tokio::test]
    async fn test_bare_connect_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let checker = checker(port, |_| {});
        checker.run(&ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_fails() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = checker(port, |_| {});
        let err = checker.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, CheckError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_pattern_match_on_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"220 ready\r\n").await.unwrap();
        });

        let checker = checker(port, |tcp| {
            tcp.expect_pattern = Some("^220".to_string());
            tcp.quit = Some("QUIT\r\n".to_string());
        });
        checker.run(&ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_pattern_mismatch_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"500 go away\r\n").await.unwrap();
        });

        let checker = checker(port, |tcp| {
            tcp.expect_pattern = Some("^220".to_string());
        });
        let err = checker.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, CheckError::Pattern { .. }));
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without writing anything.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let checker = checker(port, |tcp| {
            tcp.expect_pattern = Some("^220".to_string());
        });
        let err = checker.run(&ctx()).await.unwrap_err();
        assert!(matches!(err, CheckError::Timeout { .. }));
    }
}
