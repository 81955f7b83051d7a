// Error types for paddock

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum PaddockError {
    // Errors while reading telemetry data
    #[snafu(display("Unable to open telemetry file"))]
    TelemetryFileError { source: io::Error },
    #[snafu(display("Telemetry point producer error: {description}"))]
    TelemetryProducerError { description: String },
    #[snafu(display("Telemetry source exhausted"))]
    TelemetryExhausted,

    // Module lifecycle errors
    #[snafu(display("Could not spawn thread for module {module}"))]
    ModuleSpawnError { module: String, source: io::Error },
    #[snafu(display("Module {module} did not stop within {timeout_ms}ms"))]
    ModuleStopTimeout { module: String, timeout_ms: u64 },

    // Config management errors
    #[snafu(display("Could not find application data directory"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // History storage errors
    #[snafu(display("History storage error: {reason}"))]
    HistoryStorageError { reason: String },
    #[snafu(display("File operation failed: {operation} - {reason}"))]
    FileOperationError { operation: String, reason: String },
    #[snafu(display("Write verification failed for {path}"))]
    WriteVerificationError { path: String },
    #[snafu(display("Error writing snapshot file"))]
    WriterError { source: io::Error },

    // REST api errors
    #[snafu(display("No REST api available for {game}"))]
    RestApiUnsupported { game: String },
    #[snafu(display("REST request to {url} failed"))]
    RestRequestError { url: String, source: reqwest::Error },
    #[snafu(display("REST request to {url} timed out"))]
    RestTimeout { url: String },
    #[snafu(display("REST request to {url} returned status {status}"))]
    RestStatusError { url: String, status: u16 },
    #[snafu(display("Could not start async runtime"))]
    RuntimeError { source: io::Error },
}
