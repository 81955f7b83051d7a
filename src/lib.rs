// Library interface for paddock
// This allows integration tests and benchmarks to access internal modules

pub mod calc;
pub mod config;
pub mod errors;
pub mod info;
pub mod modules;
pub mod pipeline;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod trace;
pub mod writer;

// Re-export commonly used types
pub use config::PaddockConfig;
pub use errors::PaddockError;
pub use info::{InfoSnapshot, ModuleInfo};
pub use pipeline::Pipeline;
pub use telemetry::{SessionInfo, TelemetryData, TelemetryOutput};
