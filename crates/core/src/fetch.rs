//! Content fetching for referenced config sources
//!
//! Referenced configs are dereferenced through the [`ContentFetcher`] trait so
//! the normalizer stays independent of where documents actually live. The
//! default implementation resolves http(s) URIs over the network and
//! `file://` URIs or plain paths from the local filesystem.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, instrument};

/// Dereferences a URI into its raw bytes.
///
/// Failures are reported loosely (`anyhow`); the normalizer wraps them into
/// the config error taxonomy together with the offending list index.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn dereference(&self, uri: &str) -> anyhow::Result<Vec<u8>>;
}

/// Default fetcher: reqwest for http(s), tokio::fs for everything local
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentFetcher for DefaultFetcher {
    #[instrument(skip(self))]
    async fn dereference(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self.client.get(uri).send().await?;
            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("HTTP {} fetching '{}'", status, uri);
            }
            let bytes = response.bytes().await?;
            debug!(uri, len = bytes.len(), "Fetched remote config");
            return Ok(bytes.to_vec());
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let bytes = tokio::fs::read(Path::new(path)).await?;
        debug!(uri, len = bytes.len(), "Read local config");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_dereference_local_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "kind: source").unwrap();

        let fetcher = DefaultFetcher::new();
        let bytes = fetcher
            .dereference(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"kind: source");
    }

    #[tokio::test]
    async fn test_dereference_file_uri() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "kind: destination").unwrap();

        let uri = format!("file://{}", file.path().display());
        let fetcher = DefaultFetcher::new();
        let bytes = fetcher.dereference(&uri).await.unwrap();
        assert_eq!(bytes, b"kind: destination");
    }

    #[tokio::test]
    async fn test_dereference_missing_path_fails() {
        let fetcher = DefaultFetcher::new();
        let result = fetcher.dereference("not-a-valid-uri").await;
        assert!(result.is_err());
    }
}
