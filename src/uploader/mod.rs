//! Backend client for test records, with retry.
//!
//! Records are saved with `PUT {endpoint}services/{serviceId}/tests/{testType}`
//! and loaded back with `GET` on the same URL. Saves go through the outbox:
//! an entry moves to `completed/` once the backend accepts it, or to
//! `failed/` when its attempts run out.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::error::PersistenceError;
use crate::spool::Spool;
use crate::types::{TestRecord, TestType};

/// Delay window before each retry, in milliseconds. Attempts beyond the
/// table reuse its last window.
const RETRY_DELAYS_MS: [(u64, u64); 4] = [
    (500, 1_500),
    (2_000, 4_000),
    (5_000, 10_000),
    (15_000, 30_000),
];

/// Outcome of flushing the outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushSummary {
    pub saved: usize,
    pub failed: usize,
}

/// Client for the record endpoints.
#[derive(Clone)]
pub struct Uploader {
    endpoint: reqwest::Url,
    client: reqwest::Client,
    spool: Spool,
    api_token: Option<String>,
    max_attempts: u32,
    retry_delays: Vec<(Duration, Duration)>,
}

impl Uploader {
    pub fn new(config: &BackendConfig, spool: Spool) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| PersistenceError::InvalidEndpoint(format!("{}: {}", config.endpoint, e)))?;

        let mut client_builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(10));

        if let Some(ref proxy_url) = config.proxy {
            client_builder = client_builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        if config.api_token.is_some() {
            info!("Bearer token authentication configured");
        } else {
            warn!("No API token configured, sending unauthenticated requests");
        }

        Ok(Self {
            endpoint,
            client: client_builder.build()?,
            spool,
            api_token: config.api_token.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delays: RETRY_DELAYS_MS
                .iter()
                .map(|(min, max)| (Duration::from_millis(*min), Duration::from_millis(*max)))
                .collect(),
        })
    }

    /// Replace the retry delay windows.
    pub fn with_retry_delays(mut self, delays: Vec<(Duration, Duration)>) -> Self {
        self.retry_delays = delays;
        self
    }

    pub fn spool(&self) -> &Spool {
        &self.spool
    }

    /// URL of the record for `(service_id, test)`, with the id path-encoded.
    pub fn record_url(
        &self,
        service_id: &str,
        test: TestType,
    ) -> Result<reqwest::Url, PersistenceError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| PersistenceError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend(["services", service_id, "tests", test.slug()]);
        Ok(url)
    }

    /// Send every pending outbox entry, oldest first.
    pub async fn flush(&self) -> Result<FlushSummary> {
        // Entries stranded in uploading/ by an interrupted run go first
        if let Err(e) = self.spool.recover() {
            error!(error = %e, "Failed to recover outbox");
        }

        let pending = self.spool.get_pending()?;
        debug!(count = pending.len(), "Processing pending records");

        let mut summary = FlushSummary::default();
        for path in pending {
            match self.upload_with_retry(&path).await {
                Ok(()) => summary.saved += 1,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Record not saved");
                    summary.failed += 1;
                }
            }
        }

        info!(saved = summary.saved, failed = summary.failed, "Outbox flushed");
        Ok(summary)
    }

    /// Send one outbox entry, retrying transient failures.
    pub async fn upload_with_retry(&self, path: &Path) -> Result<(), PersistenceError> {
        let uploading_path = self
            .spool
            .mark_uploading(path)
            .map_err(|e| PersistenceError::CorruptEntry(e.to_string()))?;

        let entry = match self.spool.read_entry(&uploading_path) {
            Ok(entry) => entry,
            Err(e) => {
                let _ = self.spool.mark_failed(&uploading_path);
                return Err(PersistenceError::CorruptEntry(e.to_string()));
            }
        };

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.retry_delay((attempt - 2) as usize);
                info!(
                    correlation_id = %entry.correlation_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying save after delay"
                );
                tokio::time::sleep(delay).await;
            }

            match self.save(&entry.record, Some(&entry.correlation_id)).await {
                Ok(()) => {
                    self.spool
                        .mark_completed(&uploading_path)
                        .map_err(|e| PersistenceError::CorruptEntry(e.to_string()))?;
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        correlation_id = %entry.correlation_id,
                        attempt,
                        error = %e,
                        "Save attempt failed"
                    );
                }
                Err(e) => {
                    let _ = self.spool.mark_failed(&uploading_path);
                    return Err(e);
                }
            }
        }

        let _ = self.spool.mark_failed(&uploading_path);
        Err(PersistenceError::RetryExhausted(self.max_attempts))
    }

    fn retry_delay(&self, index: usize) -> Duration {
        let Some(&(min, max)) = self
            .retry_delays
            .get(index)
            .or_else(|| self.retry_delays.last())
        else {
            return Duration::ZERO;
        };

        if max > min {
            use rand::Rng;
            let jitter = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
            Duration::from_millis(jitter as u64)
        } else {
            min
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_token {
            Some(ref token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Save a record (single attempt).
    pub async fn save(
        &self,
        record: &TestRecord,
        correlation_id: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let url = self.record_url(&record.service_id, record.test_type)?;

        info!(
            service_id = %record.service_id,
            test = record.test_type.slug(),
            rows = record.rows.len(),
            url = %url,
            "Saving record"
        );

        let mut request = self.authorize(self.client.put(url).json(record));
        if let Some(id) = correlation_id {
            request = request.header("X-Correlation-Id", id);
        }

        let response = request.send().await?;
        check_status(response, &record.service_id).await.map(|_| ())
    }

    /// Load the stored record for `(service_id, test)`.
    pub async fn load(
        &self,
        service_id: &str,
        test: TestType,
    ) -> Result<TestRecord, PersistenceError> {
        let url = self.record_url(service_id, test)?;
        debug!(url = %url, "Loading record");

        let response = self.authorize(self.client.get(url)).send().await?;
        let response = check_status(response, service_id).await?;
        Ok(response.json::<TestRecord>().await?)
    }
}

async fn check_status(
    response: reqwest::Response,
    service_id: &str,
) -> Result<reqwest::Response, PersistenceError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(PersistenceError::Authentication(format!(
            "status {}: {}",
            status.as_u16(),
            body
        ))),
        404 => Err(PersistenceError::NotFound(service_id.to_string())),
        code => Err(PersistenceError::Server {
            status: code,
            message: body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpoolConfig;
    use crate::types::{MeasurementRow, Tolerance};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        )
    }

    /// Read one request head plus its body; return the request line.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Answer connections with `responses` in order, recording request lines.
    async fn serve(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            for reply in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let line = read_request(&mut socket).await;
                log.lock().unwrap().push(line);
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/api/", addr), seen)
    }

    fn record(service_id: &str) -> TestRecord {
        let mut row = MeasurementRow::new(TestType::LinearityOfMaLoading, 1);
        row.values.insert("ma".to_string(), "100".to_string());
        row.values.insert("measured_1".to_string(), "5.0".to_string());
        TestRecord {
            service_id: service_id.to_string(),
            test_type: TestType::LinearityOfMaLoading,
            rows: vec![row],
            tolerance: Tolerance::at_most(0.1),
            source: None,
            saved_at: Utc::now(),
        }
    }

    fn uploader(endpoint: String, dir: &TempDir) -> Uploader {
        let config = BackendConfig {
            endpoint,
            max_attempts: 3,
            ..BackendConfig::default()
        };
        let spool = Spool::at(dir.path(), &SpoolConfig::default()).unwrap();
        Uploader::new(&config, spool)
            .unwrap()
            .with_retry_delays(vec![(Duration::ZERO, Duration::ZERO)])
    }

    #[test]
    fn test_record_url_encodes_service_id() {
        let dir = TempDir::new().unwrap();
        let uploader = uploader("https://qa.example.com/api/".to_string(), &dir);

        let url = uploader
            .record_url("svc-1", TestType::RadiationLeakageLevel)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://qa.example.com/api/services/svc-1/tests/radiation_leakage_level"
        );

        let url = uploader
            .record_url("room 4/b", TestType::LinearityOfMaLoading)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://qa.example.com/api/services/room%204%2Fb/tests/linearity_of_ma_loading"
        );
    }

    #[test]
    fn test_retry_delay_uses_table_then_last_entry() {
        let dir = TempDir::new().unwrap();
        let uploader = uploader("http://127.0.0.1:1/api/".to_string(), &dir).with_retry_delays(vec![
            (Duration::from_millis(10), Duration::from_millis(10)),
            (Duration::from_millis(20), Duration::from_millis(40)),
        ]);

        assert_eq!(uploader.retry_delay(0), Duration::from_millis(10));
        for index in 1..5 {
            let delay = uploader.retry_delay(index);
            assert!(delay >= Duration::from_millis(20) && delay <= Duration::from_millis(40));
        }

        let empty = uploader.with_retry_delays(Vec::new());
        assert_eq!(empty.retry_delay(0), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_flush_saves_with_put() {
        let dir = TempDir::new().unwrap();
        let (endpoint, seen) = serve(vec![response("200 OK", "{}")]).await;
        let uploader = uploader(endpoint, &dir);

        uploader.spool().enqueue(&record("svc-1"), "bench-1").unwrap();
        let summary = uploader.flush().await.unwrap();

        assert_eq!(summary, FlushSummary { saved: 1, failed: 0 });
        assert_eq!(
            seen.lock().unwrap()[0],
            "PUT /api/services/svc-1/tests/linearity_of_ma_loading HTTP/1.1"
        );
        let status = uploader.spool().status().unwrap();
        assert_eq!(status.pending, 0);
        assert_eq!(status.completed, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let (endpoint, seen) = serve(vec![
            response("503 Service Unavailable", "busy"),
            response("200 OK", "{}"),
        ])
        .await;
        let uploader = uploader(endpoint, &dir);

        uploader.spool().enqueue(&record("svc-1"), "bench-1").unwrap();
        let summary = uploader.flush().await.unwrap();

        assert_eq!(summary.saved, 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_move_entry_to_failed() {
        let dir = TempDir::new().unwrap();
        let (endpoint, _) = serve(vec![
            response("500 Internal Server Error", "boom"),
            response("500 Internal Server Error", "boom"),
            response("500 Internal Server Error", "boom"),
        ])
        .await;
        let uploader = uploader(endpoint, &dir);

        let path = uploader.spool().enqueue(&record("svc-1"), "bench-1").unwrap();
        let err = uploader.upload_with_retry(&path).await.unwrap_err();

        assert!(matches!(err, PersistenceError::RetryExhausted(3)));
        assert_eq!(uploader.spool().status().unwrap().failed, 1);

        // The raw record is still there to retry without re-parsing
        let failed = uploader.spool().get_failed().unwrap();
        let entry = uploader.spool().read_entry(&failed[0]).unwrap();
        assert_eq!(entry.record.rows, record("svc-1").rows);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let (endpoint, seen) = serve(vec![response("401 Unauthorized", "no")]).await;
        let uploader = uploader(endpoint, &dir);

        let path = uploader.spool().enqueue(&record("svc-1"), "bench-1").unwrap();
        let err = uploader.upload_with_retry(&path).await.unwrap_err();

        assert!(matches!(err, PersistenceError::Authentication(_)));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(uploader.spool().status().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_load_returns_stored_record() {
        let dir = TempDir::new().unwrap();
        let stored = record("svc-1");
        let body = serde_json::to_string(&stored).unwrap();
        let (endpoint, seen) = serve(vec![response("200 OK", &body)]).await;
        let uploader = uploader(endpoint, &dir);

        let loaded = uploader
            .load("svc-1", TestType::LinearityOfMaLoading)
            .await
            .unwrap();

        assert_eq!(loaded, stored);
        assert!(seen.lock().unwrap()[0].starts_with("GET /api/services/svc-1/tests/"));
    }

    #[tokio::test]
    async fn test_load_missing_record() {
        let dir = TempDir::new().unwrap();
        let (endpoint, _) = serve(vec![response("404 Not Found", "")]).await;
        let uploader = uploader(endpoint, &dir);

        let err = uploader
            .load("svc-9", TestType::LinearityOfMaLoading)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(id) if id == "svc-9"));
    }
}
