//! Completion provider abstraction
//!
//! The relay only needs "send a conversation, receive a stream of text
//! increments". Providers implement that over their own wire protocol.

mod error;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIProvider;
#[cfg(test)]
pub(crate) use openai::ChunkDecoder;
pub use types::*;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Instant;

/// Lazily produced increments of one completion call
pub type IncrementStream = BoxStream<'static, Result<Increment, LlmError>>;

/// Common interface for completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Open a streaming completion call. Errors here mean nothing was streamed.
    async fn stream(&self, request: &CompletionRequest) -> Result<IncrementStream, LlmError>;

    /// Short provider name for logs
    fn name(&self) -> &'static str;
}

/// Logging wrapper for completion providers
pub struct LoggingProvider {
    inner: Arc<dyn CompletionProvider>,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CompletionProvider for LoggingProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<IncrementStream, LlmError> {
        let start = Instant::now();
        let result = self.inner.stream(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    provider = self.inner.name(),
                    model = %request.model,
                    messages = request.messages.len(),
                    time_to_headers_ms = %duration.as_millis(),
                    "Completion stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = self.inner.name(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.as_str(),
                    "Completion request failed"
                );
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
