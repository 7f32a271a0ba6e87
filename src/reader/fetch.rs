//! Fetch an attached lab file through the backend's file proxy.
//!
//! The fetch is one of the two places ingestion suspends. It is bounded by a
//! timeout and can be cancelled; either way no partial bytes are returned.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::FetchError;
use crate::reader::FileFormat;

/// File bytes plus the hint used to decode them.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub name: String,
    pub hint: String,
    pub bytes: Vec<u8>,
}

/// Client for the backend file proxy.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));

        if let Some(ref proxy_url) = config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_seconds),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch `url` through the proxy, giving up on timeout or when `cancel` fires.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Result<FetchedFile, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string();

        info!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "Fetching file");

        let download = self.download(url);
        tokio::pin!(download);
        let mut cancel = cancel;

        tokio::select! {
            result = tokio::time::timeout(self.timeout, &mut download) => match result {
                Ok(Ok((bytes, content_type))) => {
                    let hint = choose_hint(&name, content_type.as_deref());
                    debug!(name = %name, hint = %hint, size = bytes.len(), "File fetched");
                    Ok(FetchedFile { name, hint, bytes })
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    warn!(url = %url, "File fetch timed out");
                    Err(FetchError::Timeout(self.timeout))
                }
            },
            // A dropped sender disables this branch rather than cancelling.
            Ok(()) = &mut cancel => {
                warn!(url = %url, "File fetch cancelled");
                Err(FetchError::Cancelled)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let proxy_url = format!("{}files/proxy", self.endpoint);
        let mut request = self.client.get(&proxy_url).query(&[("url", url)]);

        if let Some(ref token) = self.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await?;
        Ok((bytes.to_vec(), content_type))
    }
}

/// Prefer the file name's extension; fall back to the response content type.
fn choose_hint(name: &str, content_type: Option<&str>) -> String {
    if FileFormat::from_hint(name).is_ok() {
        return name.to_string();
    }
    content_type.unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response and return the endpoint base URL.
    async fn serve_once(response: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            match response {
                Some(body) => {
                    let _ = socket.write_all(body.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                // Hold the connection open without answering.
                None => tokio::time::sleep(Duration::from_secs(30)).await,
            }
        });

        format!("http://{}/", addr)
    }

    fn fetcher(endpoint: String) -> Fetcher {
        let config = BackendConfig {
            endpoint,
            ..BackendConfig::default()
        };
        Fetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes_and_hint() {
        let endpoint = serve_once(Some(
            "HTTP/1.1 200 OK\r\nContent-Type: text/csv\r\nContent-Length: 10\r\nConnection: close\r\n\r\nmA,kV\n1,2\n",
        ))
        .await;

        let (_tx, rx) = oneshot::channel();
        let file = fetcher(endpoint)
            .fetch("https://files.example.com/uploads/report.csv", rx)
            .await
            .unwrap();

        assert_eq!(file.name, "report.csv");
        assert_eq!(file.hint, "report.csv");
        assert_eq!(file.bytes, b"mA,kV\n1,2\n");
    }

    #[tokio::test]
    async fn test_fetch_surfaces_proxy_status() {
        let endpoint = serve_once(Some(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\nConnection: close\r\n\r\nmissing",
        ))
        .await;

        let (_tx, rx) = oneshot::channel();
        let err = fetcher(endpoint)
            .fetch("https://files.example.com/a.xlsx", rx)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let endpoint = serve_once(None).await;

        let (_tx, rx) = oneshot::channel();
        let err = fetcher(endpoint)
            .with_timeout(Duration::from_millis(200))
            .fetch("https://files.example.com/a.csv", rx)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_can_be_cancelled() {
        let endpoint = serve_once(None).await;

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        let err = fetcher(endpoint)
            .fetch("https://files.example.com/a.csv", rx)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let (_tx, rx) = oneshot::channel();
        let err = fetcher("http://127.0.0.1:9/".to_string())
            .fetch("not a url", rx)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }

    #[test]
    fn test_choose_hint_falls_back_to_content_type() {
        assert_eq!(choose_hint("sheet.xlsx", Some("text/csv")), "sheet.xlsx");
        assert_eq!(choose_hint("download", Some("text/csv")), "text/csv");
        assert_eq!(choose_hint("download", None), "download");
    }
}
