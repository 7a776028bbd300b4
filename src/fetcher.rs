//! Content download for task payloads
//!
//! [`HttpContentFetcher`] resolves a task's [`ContentMetadata`] to bytes,
//! either from the storage URL carried by the task (`direct`) or through the
//! ingestion server's download endpoint (`server-proxy`).

use async_trait::async_trait;

use crate::config::{Config, DownloadMethod};
use crate::error::{Error, FetchError, Result};
use crate::types::{ContentMetadata, Task};

/// Retrieves the raw payload of a task
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Download the bytes the task operates on
    async fn fetch(&self, task: &Task) -> std::result::Result<Vec<u8>, FetchError>;
}

/// HTTP(S) and `file://` fetcher
pub struct HttpContentFetcher {
    client: reqwest::Client,
    method: DownloadMethod,
    scheme: &'static str,
    ingestion_addr: String,
}

impl HttpContentFetcher {
    /// Build a fetcher from config
    ///
    /// When TLS is configured the CA bundle is trusted and the client
    /// certificate is presented to the ingestion server.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.ingestion.download_timeout);

        if let Some(tls) = &config.tls {
            let ca = std::fs::read(&tls.ca_bundle)?;
            let cert = std::fs::read(&tls.cert_file)?;
            let key = std::fs::read(&tls.key_file)?;

            let ca = reqwest::Certificate::from_pem(&ca).map_err(|e| Error::Config {
                message: format!("invalid CA bundle: {}", e),
                key: Some("tls.ca_bundle".to_string()),
            })?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key).map_err(|e| Error::Config {
                message: format!("invalid client certificate: {}", e),
                key: Some("tls.cert_file".to_string()),
            })?;

            builder = builder.add_root_certificate(ca).identity(identity);
        }

        let client = builder.build().map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create HTTP client: {}",
                e
            )))
        })?;

        Ok(Self {
            client,
            method: config.ingestion.download_method,
            scheme: config.http_scheme(),
            ingestion_addr: config.ingestion.addr.clone(),
        })
    }

    /// Ingestion-proxied download URL for a content item
    pub fn proxy_url(&self, metadata: &ContentMetadata) -> String {
        format!(
            "{}://{}/namespaces/{}/content/{}/download",
            self.scheme,
            self.ingestion_addr,
            urlencoding::encode(&metadata.namespace),
            urlencoding::encode(&metadata.id),
        )
    }

    async fn get(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(body.to_vec())
    }

    async fn fetch_direct(&self, task: &Task) -> std::result::Result<Vec<u8>, FetchError> {
        let location = task.content_metadata.storage_url.as_str();
        if location.is_empty() {
            return Err(FetchError::MissingLocation {
                task_id: task.id.clone(),
            });
        }

        let parsed = url::Url::parse(location).map_err(|_| FetchError::UnsupportedLocation {
            location: location.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => self.get(location).await,
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedLocation {
                        location: location.to_string(),
                    })?;
                tokio::fs::read(&path)
                    .await
                    .map_err(|source| FetchError::Io { path, source })
            }
            _ => Err(FetchError::UnsupportedLocation {
                location: location.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, task: &Task) -> std::result::Result<Vec<u8>, FetchError> {
        let bytes = match self.method {
            DownloadMethod::Direct => self.fetch_direct(task).await?,
            DownloadMethod::ServerProxy => self.get(&self.proxy_url(&task.content_metadata)).await?,
        };

        tracing::debug!(
            task_id = %task.id,
            bytes = bytes.len(),
            method = ?self.method,
            "Downloaded task content"
        );
        Ok(bytes)
    }
}
