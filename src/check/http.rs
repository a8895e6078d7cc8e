//! HTTP probe.

use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::{bounded, CheckContext, CheckError, Checker};
use crate::config::{CheckConfig, ConfigError, HttpCheckConfig};

/// Accepted status codes, parsed once from a spec like "200,201,300-399".
///
/// Each comma-separated token is a single code or an inclusive
/// `lower-upper` range; whitespace around tokens and around the hyphen is
/// ignored. Without an explicit spec, anything in [200, 400) is accepted.
#[derive(Debug, Clone)]
pub(crate) struct StatusRanges(Vec<(u16, u16)>);

impl StatusRanges {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut ranges = Vec::new();
        for token in spec.split(',') {
            let token = token.trim();
            let bounds: Vec<&str> = token.split('-').map(str::trim).collect();
            match bounds.as_slice() {
                [single] => {
                    let code: u16 = single
                        .parse()
                        .map_err(|_| format!("invalid code: {}", single))?;
                    ranges.push((code, code));
                }
                [lower, upper] => {
                    let lower: u16 = lower
                        .parse()
                        .map_err(|_| format!("invalid range: {}", token))?;
                    let upper: u16 = upper
                        .parse()
                        .map_err(|_| format!("invalid range: {}", token))?;
                    ranges.push((lower, upper));
                }
                _ => return Err(format!("invalid format: {}", token)),
            }
        }
        Ok(Self(ranges))
    }

    pub fn contains(&self, code: u16) -> bool {
        self.0.iter().any(|(lower, upper)| *lower <= code && code <= *upper)
    }
}

impl Default for StatusRanges {
    /// The conventional "success or redirect" window.
    fn default() -> Self {
        Self(vec![(200, 399)])
    }
}

/// Issues an HTTP request and requires an accepted status, optionally a
/// body pattern. Every probe uses a fresh connection so it exercises the
/// full connect path rather than a pooled socket.
#[derive(Debug)]
pub struct HttpChecker {
    name: String,
    url: reqwest::Url,
    method: reqwest::Method,
    headers: HeaderMap,
    body: Option<String>,
    expect_code: StatusRanges,
    expect_pattern: Option<regex::bytes::Regex>,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChecker {
    pub fn new(cfg: &CheckConfig, http: &HttpCheckConfig) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(&http.url)
            .map_err(|e| ConfigError::check(&cfg.name, format!("invalid url {}: {}", http.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::check(
                &cfg.name,
                format!("invalid url {}: scheme must be http or https", http.url),
            ));
        }

        let method = match &http.method {
            Some(m) => reqwest::Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| ConfigError::check(&cfg.name, format!("invalid method {:?}", m)))?,
            None => reqwest::Method::GET,
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &http.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid header name {:?}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid header value: {}", e))
            })?;
            headers.insert(name, value);
        }
        // Probes must not be kept alive between passes.
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));

        let expect_code = match &http.expect_code {
            Some(spec) => StatusRanges::parse(spec).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid expect_code {:?}: {}", spec, e))
            })?,
            None => StatusRanges::default(),
        };

        let expect_pattern = match &http.expect_pattern {
            Some(pattern) => Some(regex::bytes::Regex::new(pattern).map_err(|e| {
                ConfigError::check(&cfg.name, format!("invalid expect_pattern: {}", e))
            })?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("readygate/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(0)
            .danger_accept_invalid_certs(http.no_check_certificate)
            .build()
            .map_err(|e| {
                ConfigError::check(&cfg.name, format!("failed to build http client: {}", e))
            })?;

        Ok(Self {
            name: cfg.name.clone(),
            url,
            method,
            headers,
            body: http.body.clone(),
            expect_code,
            expect_pattern,
            client,
            timeout: cfg.timeout(),
        })
    }
}

#[async_trait]
impl Checker for HttpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &CheckContext) -> Result<(), CheckError> {
        debug!(
            name = %self.name,
            phase = %ctx.phase,
            index = ctx.index,
            method = %self.method,
            url = %self.url,
            "http request"
        );

        bounded(self.timeout, ctx, async {
            let mut request = self
                .client
                .request(self.method.clone(), self.url.clone())
                .headers(self.headers.clone());
            if let Some(body) = &self.body {
                request = request.body(body.clone());
            }

            let response = request.send().await.map_err(CheckError::Request)?;

            let code = response.status().as_u16();
            if !self.expect_code.contains(code) {
                return Err(CheckError::Status { code });
            }

            // The body is only buffered when there is a pattern to match;
            // otherwise dropping the response discards it.
            if let Some(pattern) = &self.expect_pattern {
                let body = response.bytes().await.map_err(CheckError::Request)?;
                if !pattern.is_match(&body) {
                    return Err(CheckError::Pattern {
                        pattern: pattern.to_string(),
                    });
                }
            }
            Ok(())
        })
        .await
    }
}
