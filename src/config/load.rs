//! Configuration sources.
//!
//! A configuration document is loaded from a local file path (optionally
//! `file://` prefixed) or an `http(s)://` URL, so an orchestrator can point
//! every replica at one shared document.

use tracing::info;

use super::{Config, ConfigError};

/// Load, parse, and default-fill a configuration from `src`.
pub async fn load(src: &str) -> Result<Config, ConfigError> {
    let doc = read_source(src).await?;
    let config = Config::from_yaml(&doc)?;
    info!(source = src, "configuration loaded");
    Ok(config)
}

async fn read_source(src: &str) -> Result<Vec<u8>, ConfigError> {
    if src.starts_with("http://") || src.starts_with("https://") {
        return fetch_http(src).await;
    }
    // Anything else is a file path; scheme-looking sources other than
    // file:// are rejected rather than treated as odd relative paths.
    let path = src.strip_prefix("file://").unwrap_or(src);
    if path.contains("://") {
        return Err(ConfigError::Scheme {
            url: src.to_string(),
        });
    }
    tokio::fs::read(path).await.map_err(|error| ConfigError::Io {
        path: path.to_string(),
        error,
    })
}

async fn fetch_http(url: &str) -> Result<Vec<u8>, ConfigError> {
    let fetch_err = |message: String| ConfigError::Fetch {
        url: url.to_string(),
        message,
    };

    let response = reqwest::get(url).await.map_err(|e| fetch_err(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_err(format!("unexpected status {}", response.status())));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| fetch_err(e.to_string()))?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"responder:\n  addr: \"127.0.0.1:9999\"\n")
            .unwrap();

        let config = load(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(config.responder.addr, "127.0.0.1:9999".parse().unwrap());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load("/nonexistent/readygate.yaml").await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = load("s3://bucket/readygate.yaml").await.unwrap_err();
        assert!(matches!(err, ConfigError::Scheme { .. }));
    }
}
