//! API request and response types

use crate::spans::SpanId;
use serde::{Deserialize, Serialize};

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
}

/// Satisfaction score for a finished response
#[derive(Debug, Deserialize)]
pub struct SatisfactionRequest {
    pub score: f64,
    /// Span named by the `x-span-id` header of the scored stream.
    /// May be omitted when exactly one response awaits a score.
    #[serde(default)]
    pub span_id: Option<SpanId>,
}

/// Response for actions that only report success
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}
