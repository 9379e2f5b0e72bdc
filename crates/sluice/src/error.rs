//! Error types for the sluice ETL engine.
//!
//! Each pipeline stage owns an error kind; `PipelineError` composes them
//! for the runner. Transient/permanent classification happens at the
//! component that surfaces the error, never in the runner.

use snafu::prelude::*;

// Re-export common errors
pub use sluice_core::error::{ConfigError, StorageError};

/// Errors that can occur while listing source blobs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DiscoveryError {
    /// Listing the prefix failed.
    #[snafu(display("Failed to list '{prefix}': {source}"))]
    ListFailed {
        prefix: String,
        source: StorageError,
    },

    /// Provider rejected the credentials.
    #[snafu(display("Authentication failed while listing '{prefix}': {source}"))]
    AuthFailed {
        prefix: String,
        source: StorageError,
    },

    /// The prefix does not exist on the provider.
    #[snafu(display("Prefix not found: '{prefix}'"))]
    PrefixNotFound { prefix: String },
}

/// Errors that can occur while downloading a single blob.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    /// Transient network failure; retried with backoff before surfacing.
    #[snafu(display("Transient download failure for '{path}': {source}"))]
    Transient {
        path: String,
        source: StorageError,
    },

    /// Permanent failure (403, 404); surfaced immediately.
    #[snafu(display("Permanent download failure for '{path}': {source}"))]
    Permanent {
        path: String,
        source: StorageError,
    },

    /// Bytes written do not match the size the provider reported.
    #[snafu(display("Integrity failure for '{path}': expected {expected} bytes, wrote {actual}"))]
    Integrity {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Stage deadline expired mid-download.
    #[snafu(display("Download of '{path}' timed out"))]
    Timeout { path: String },

    /// Local filesystem failure while staging the download.
    #[snafu(display("Failed to write '{path}': {source}"))]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Errors that can occur while converting a source file to the bronze layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConvertError {
    /// File suffix is not one of the supported input formats.
    #[snafu(display("Unsupported source format: '{path}'"))]
    UnsupportedFormat { path: String },

    /// Source file could not be parsed.
    #[snafu(display("Failed to parse '{path}': {message}"))]
    Parse { path: String, message: String },

    /// Local filesystem failure while writing the bronze file.
    #[snafu(display("Failed to write '{path}': {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Errors that can occur in the silver-layer transformation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TransformError {
    /// No column mapping is declared for the table.
    #[snafu(display("No column mapping declared for table '{table}'"))]
    MissingMapping { table: String },

    /// Computed-column rules form a dependency cycle.
    #[snafu(display("Computed-column cycle in table '{table}' involving [{}]", columns.join(", ")))]
    ComputedRuleCycle { table: String, columns: Vec<String> },

    /// A declared row filter is malformed.
    #[snafu(display("Invalid row filter on '{table}.{column}': {message}"))]
    FilterInvalid {
        table: String,
        column: String,
        message: String,
    },

    /// A cast failed and the per-column policy does not permit recovery.
    #[snafu(display("Fatal type cast on '{table}.{column}': {message}"))]
    TypeCastFatal {
        table: String,
        column: String,
        message: String,
    },

    /// Frame operation failed.
    #[snafu(display("Frame operation failed for table '{table}': {source}"))]
    Frame {
        table: String,
        source: polars::error::PolarsError,
    },
}

/// Errors raised by the database control plane.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ControlError {
    /// Query against the control interface failed.
    #[snafu(display("Control query failed: {source}"))]
    Query { source: mysql_async::Error },

    /// Could not obtain a pooled connection.
    #[snafu(display("Failed to get control connection: {source}"))]
    Connect { source: mysql_async::Error },

    /// The control interface returned an unexpected shape.
    #[snafu(display("Unexpected control response: {message}"))]
    Unexpected { message: String },

    /// Document-store failure behind the constants interface.
    #[snafu(display("Document store failure: {message}"))]
    Document { message: String },
}

/// Errors that can occur during validation and bulk loading.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    /// Frame is missing a non-nullable database column.
    #[snafu(display("Frame for '{table}' is missing non-nullable column '{column}'"))]
    MissingColumn { table: String, column: String },

    /// String data exceeds the declared width and widening cannot fix it.
    #[snafu(display(
        "Column '{table}.{column}' needs {needed} bytes but widening is capped at {cap}"
    ))]
    Overflow {
        table: String,
        column: String,
        needed: u32,
        cap: u32,
    },

    /// Numeric data exceeds the declared type range.
    #[snafu(display("Numeric overflow in '{table}.{column}': {message}"))]
    NumericOverflow {
        table: String,
        column: String,
        message: String,
    },

    /// Live schema changed underneath the load.
    #[snafu(display("Schema drift on '{table}': {message}"))]
    SchemaDrift { table: String, message: String },

    /// Stream load rejected the chunk with a terminal status.
    #[snafu(display(
        "Stream load failed for '{table}' chunk {chunk}: {status}: {message}{}",
        error_url.as_deref().map(|u| format!(" (see {u})")).unwrap_or_default()
    ))]
    StreamLoadFail {
        table: String,
        chunk: usize,
        status: String,
        message: String,
        error_url: Option<String>,
    },

    /// Stream load did not complete within the configured timeout.
    #[snafu(display("Stream load timed out for '{table}' chunk {chunk}"))]
    StreamLoadTimeout { table: String, chunk: usize },

    /// Truncate before a full refresh failed; the load is aborted.
    #[snafu(display("Truncate failed for '{table}': {source}"))]
    TruncateFailed { table: String, source: ControlError },

    /// Control-plane failure during validation or load.
    #[snafu(display("Control plane failure for '{table}': {source}"))]
    Control { table: String, source: ControlError },

    /// HTTP transport failure posting a chunk.
    #[snafu(display("Stream load transport failure for '{table}': {source}"))]
    Transport {
        table: String,
        source: reqwest::Error,
    },

    /// Frame operation failed while preparing chunks.
    #[snafu(display("Frame operation failed while loading '{table}': {source}"))]
    LoadFrame {
        table: String,
        source: polars::error::PolarsError,
    },
}

/// Top-level pipeline errors, one variant per stage plus process-level kinds.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Blob discovery error.
    #[snafu(display("Discovery error: {source}"))]
    Discovery { source: DiscoveryError },

    /// Blob download error.
    #[snafu(display("Download error: {source}"))]
    Download { source: DownloadError },

    /// Bronze conversion error.
    #[snafu(display("Convert error: {source}"))]
    Convert { source: ConvertError },

    /// Silver transformation error.
    #[snafu(display("Transform error: {source}"))]
    Transform { source: TransformError },

    /// Validation or bulk-load error.
    #[snafu(display("Load error: {source}"))]
    Load { source: LoadError },

    /// Stage deadline expired; retryable at job level, terminal in-run.
    #[snafu(display("Stage '{stage}' timed out"))]
    TimedOut { stage: &'static str },

    /// Cooperative cancellation observed between units of work.
    #[snafu(display("Pipeline cancelled"))]
    Cancelled,

    /// Unexpected failure; always fatal.
    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<DiscoveryError> for PipelineError {
    fn from(source: DiscoveryError) -> Self {
        PipelineError::Discovery { source }
    }
}

impl From<DownloadError> for PipelineError {
    fn from(source: DownloadError) -> Self {
        PipelineError::Download { source }
    }
}

impl From<ConvertError> for PipelineError {
    fn from(source: ConvertError) -> Self {
        PipelineError::Convert { source }
    }
}

impl From<TransformError> for PipelineError {
    fn from(source: TransformError) -> Self {
        PipelineError::Transform { source }
    }
}

impl From<LoadError> for PipelineError {
    fn from(source: LoadError) -> Self {
        PipelineError::Load { source }
    }
}

impl PipelineError {
    /// The stage a failure should be attributed to in job outcomes.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config { .. } => "config",
            PipelineError::Discovery { .. } => "discovery",
            PipelineError::Download { .. } => "download",
            PipelineError::Convert { .. } => "convert",
            PipelineError::Transform { .. } => "transform",
            PipelineError::Load { .. } => "load",
            PipelineError::TimedOut { stage } => stage,
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal { .. } => "internal",
        }
    }
}
