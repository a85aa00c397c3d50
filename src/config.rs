use std::time::Duration;

/// Default address the server binds to.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port the server listens on.
pub const DEFAULT_PORT: u16 = 5000;
/// Default upper bound for a single upload, in bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
/// Default number of requests that may wait for the inference thread.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
/// Default time a request may spend queued plus running inference.
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP side of the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// The host to run the server on.
    pub host: String,
    /// The port to run the server on.
    pub port: u16,
    /// Maximum accepted request body size, in bytes.
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Returns the `host:port` string the listener binds to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Scheduling limits of the [`CaptionEngine`](crate::CaptionEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Requests allowed to wait behind the one being processed. Zero only
    /// accepts requests while the inference thread is idle and waiting.
    pub queue_capacity: usize,
    /// Upper bound on queueing plus inference for a single request.
    pub inference_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            inference_timeout: DEFAULT_INFERENCE_TIMEOUT,
        }
    }
}
