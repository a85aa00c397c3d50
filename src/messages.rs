use serde::{Deserialize, Serialize};

/// Body of a successful `POST /caption`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CaptionResponse {
    pub caption: String,
}

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub engine: String,
    pub queued: usize,
    pub completed: u64,
}
