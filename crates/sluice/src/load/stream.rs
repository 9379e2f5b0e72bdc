//! Chunked HTTP stream load.
//!
//! Chunks are serialized as row-delimited text with a rare single-byte
//! field separator (SOH, 0x01) so embedded commas and tabs stay safe, and
//! posted with an idempotency label derived from
//! `{tenant_slug}_{table}_{chunk_ordinal}_{date}` so duplicate retries
//! collapse server-side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use polars::prelude::*;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamLoadSettings;
use crate::error::LoadError;

/// Field separator inside chunk payloads.
pub const COLUMN_SEPARATOR: u8 = 0x01;
/// Escaped spelling of the separator for the request header.
pub const COLUMN_SEPARATOR_HEADER: &str = r"\x01";
/// Escaped spelling of the row delimiter for the request header.
pub const ROW_DELIMITER_HEADER: &str = r"\n";

/// Raw response body of the bulk-load endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamLoadResponse {
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "NumberLoadedRows", default)]
    pub loaded_rows: u64,
    #[serde(rename = "NumberFilteredRows", default)]
    pub filtered_rows: u64,
    #[serde(rename = "NumberUnselectedRows", default)]
    pub unselected_rows: u64,
    #[serde(rename = "ErrorURL", default)]
    pub error_url: Option<String>,
    #[serde(rename = "LoadTimeMs", default)]
    pub load_time_ms: u64,
}

/// Per-load outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Success,
    Failure,
    PartialSuccess,
}

/// Parsed per-chunk outcome.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub rows_unselected: u64,
    pub error_url: Option<String>,
    pub message: String,
}

impl From<&StreamLoadResponse> for LoadResult {
    fn from(response: &StreamLoadResponse) -> Self {
        let status = match response.status.as_str() {
            "Success" if response.filtered_rows == 0 => LoadStatus::Success,
            "Success" => LoadStatus::PartialSuccess,
            _ => LoadStatus::Failure,
        };
        Self {
            status,
            rows_loaded: response.loaded_rows,
            rows_filtered: response.filtered_rows,
            rows_unselected: response.unselected_rows,
            error_url: response.error_url.clone(),
            message: response.message.clone(),
        }
    }
}

/// One chunk request, fully described.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub url: String,
    pub label: String,
    /// Explicit column list matching the live order; defends against
    /// positional drift even though the payload is already projected.
    pub columns: String,
    pub timeout_secs: u64,
    pub max_filter_ratio: f64,
}

/// Transport-level failure posting one chunk.
#[derive(Debug)]
pub enum TransportFailure {
    /// Request did not complete within the timeout.
    Timeout,
    /// Connection-level failure.
    Request(reqwest::Error),
    /// Endpoint answered with a non-JSON error status.
    Status { code: u16, body: String },
}

impl TransportFailure {
    fn is_retryable(&self) -> bool {
        match self {
            TransportFailure::Timeout => true,
            TransportFailure::Request(_) => true,
            TransportFailure::Status { code, .. } => *code >= 500,
        }
    }
}

/// Seam between chunk preparation and the HTTP edge, so tests can record
/// serialized payloads without a live cluster.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    async fn put_chunk(
        &self,
        request: &ChunkRequest,
        body: Vec<u8>,
    ) -> Result<StreamLoadResponse, TransportFailure>;
}

/// Production transport: HTTP `PUT` with basic auth.
pub struct HttpChunkTransport {
    client: reqwest::Client,
    user: String,
    password: String,
}

impl HttpChunkTransport {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user: user.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl ChunkTransport for HttpChunkTransport {
    async fn put_chunk(
        &self,
        request: &ChunkRequest,
        body: Vec<u8>,
    ) -> Result<StreamLoadResponse, TransportFailure> {
        let response = self
            .client
            .put(&request.url)
            .basic_auth(&self.user, Some(&self.password))
            .header("label", &request.label)
            .header("format", "csv")
            .header("column_separator", COLUMN_SEPARATOR_HEADER)
            .header("row_delimiter", ROW_DELIMITER_HEADER)
            .header("max_filter_ratio", request.max_filter_ratio.to_string())
            .header("strict_mode", "false")
            .header("timeout", request.timeout_secs.to_string())
            .header("columns", &request.columns)
            .header("Expect", "100-continue")
            .timeout(Duration::from_secs(request.timeout_secs))
            .body(body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportFailure::Timeout
                } else {
                    TransportFailure::Request(err)
                }
            })?;

        let code = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(TransportFailure::Request)?;
        serde_json::from_str(&text)
            .map_err(|_| TransportFailure::Status { code, body: text })
    }
}

/// Totals across all chunks of one frame.
#[derive(Debug, Default, Clone)]
pub struct FrameLoadStats {
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub rows_unselected: u64,
    pub chunks_sent: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// Chunked stream loader over an injected transport.
pub struct StreamLoader {
    transport: Arc<dyn ChunkTransport>,
    settings: StreamLoadSettings,
}

impl StreamLoader {
    pub fn new(transport: Arc<dyn ChunkTransport>, settings: StreamLoadSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Stream one reconciled frame into `table`, chunk by chunk, in order.
    ///
    /// `chunk_base` offsets chunk ordinals so multiple files of the same
    /// table keep distinct labels within one run. An empty frame sends
    /// zero chunks and reports success.
    #[allow(clippy::too_many_arguments)]
    pub async fn load_frame(
        &self,
        frame: &DataFrame,
        column_order: &[String],
        table: &str,
        url: &str,
        tenant_slug: &str,
        chunk_base: usize,
        cancel: &CancellationToken,
    ) -> Result<FrameLoadStats, LoadError> {
        let start = Instant::now();
        let mut stats = FrameLoadStats::default();

        let total_rows = frame.height();
        if total_rows == 0 {
            info!(table, rows_loaded = 0u64, "Nothing to load");
            return Ok(stats);
        }

        let chunk_size = self.settings.chunk_size.max(1);
        let num_chunks = total_rows.div_ceil(chunk_size);
        let date = chrono::Utc::now().format("%Y%m%d");
        let columns_header = column_order.join(",");

        for index in 0..num_chunks {
            if cancel.is_cancelled() {
                debug!(table, "Cancellation observed between chunks");
                stats.cancelled = true;
                break;
            }

            let offset = index * chunk_size;
            let length = chunk_size.min(total_rows - offset);
            let chunk = frame.slice(offset as i64, length);
            let body = serialize_chunk(&chunk, table)?;

            let ordinal = chunk_base + index;
            let request = ChunkRequest {
                url: url.to_string(),
                label: format!("{tenant_slug}_{table}_{ordinal}_{date}"),
                columns: columns_header.clone(),
                timeout_secs: self.settings.timeout_secs,
                max_filter_ratio: self.settings.max_filter_ratio,
            };

            let result = self.send_with_retry(&request, body, table, ordinal).await?;
            stats.rows_loaded += result.rows_loaded;
            stats.rows_filtered += result.rows_filtered;
            stats.rows_unselected += result.rows_unselected;
            stats.chunks_sent += 1;

            // Per-chunk success lines are suppressed; milestone every 10th.
            if (index + 1) % 10 == 0 {
                info!(
                    table,
                    chunk = index + 1,
                    total = num_chunks,
                    rows_loaded = stats.rows_loaded,
                    "Stream load progress"
                );
            }
        }

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            table,
            rows_loaded = stats.rows_loaded,
            rows_filtered = stats.rows_filtered,
            elapsed_ms = stats.elapsed_ms,
            "Stream load complete"
        );
        Ok(stats)
    }

    /// Post one chunk with bounded exponential backoff on retryable
    /// failures (2s, 4s, 8s by default).
    async fn send_with_retry(
        &self,
        request: &ChunkRequest,
        body: Vec<u8>,
        table: &str,
        ordinal: usize,
    ) -> Result<LoadResult, LoadError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.transport.put_chunk(request, body.clone()).await;

            match outcome {
                Ok(response) => match response.status.as_str() {
                    "Success" => return Ok(LoadResult::from(&response)),
                    // The label encodes the same (tenant, table, chunk,
                    // date) tuple being submitted, so an existing label
                    // means this exact chunk already landed.
                    "Label Already Exists" => {
                        info!(table, chunk = ordinal, label = %request.label,
                            "Label already exists, treating as idempotent success");
                        return Ok(LoadResult {
                            status: LoadStatus::Success,
                            rows_loaded: 0,
                            rows_filtered: 0,
                            rows_unselected: 0,
                            error_url: None,
                            message: response.message,
                        });
                    }
                    // Transaction committed but publish lagged; a retry
                    // resolves to Label Already Exists once visible.
                    "Publish Timeout" => {
                        if attempt >= self.settings.max_retries {
                            return Err(LoadError::StreamLoadTimeout {
                                table: table.to_string(),
                                chunk: ordinal,
                            });
                        }
                        self.backoff(attempt, table, ordinal, "publish timeout").await;
                    }
                    _ if is_retryable_message(&response.message)
                        && attempt < self.settings.max_retries =>
                    {
                        self.backoff(attempt, table, ordinal, "retryable failure").await;
                    }
                    _ => {
                        return Err(LoadError::StreamLoadFail {
                            table: table.to_string(),
                            chunk: ordinal,
                            status: response.status,
                            message: response.message,
                            error_url: response.error_url,
                        })
                    }
                },
                Err(failure) if failure.is_retryable() && attempt < self.settings.max_retries => {
                    self.backoff(attempt, table, ordinal, "transport failure").await;
                }
                Err(TransportFailure::Timeout) => {
                    return Err(LoadError::StreamLoadTimeout {
                        table: table.to_string(),
                        chunk: ordinal,
                    })
                }
                Err(TransportFailure::Request(source)) => {
                    return Err(LoadError::Transport {
                        table: table.to_string(),
                        source,
                    })
                }
                Err(TransportFailure::Status { code, body }) => {
                    return Err(LoadError::StreamLoadFail {
                        table: table.to_string(),
                        chunk: ordinal,
                        status: format!("HTTP {code}"),
                        message: body,
                        error_url: None,
                    })
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32, table: &str, ordinal: usize, reason: &str) {
        let wait = Duration::from_secs(
            self.settings.retry_base_delay_secs * 2u64.pow(attempt.saturating_sub(1)),
        );
        warn!(
            table,
            chunk = ordinal,
            attempt,
            wait_secs = wait.as_secs(),
            reason,
            "Stream load retry"
        );
        tokio::time::sleep(wait).await;
    }
}

/// Serialize one chunk: separator-delimited rows, no header line.
pub fn serialize_chunk(chunk: &DataFrame, table: &str) -> Result<Vec<u8>, LoadError> {
    let mut buf = Vec::new();
    let mut frame = chunk.clone();
    CsvWriter::new(&mut buf)
        .include_header(false)
        .with_separator(COLUMN_SEPARATOR)
        .finish(&mut frame)
        .map_err(|source| LoadError::LoadFrame {
            table: table.to_string(),
            source,
        })?;
    Ok(buf)
}

fn is_retryable_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    ["internal error", "service unavailable", "timeout"]
        .iter()
        .any(|needle| lowered.contains(needle))
}
