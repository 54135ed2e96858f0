//! Mock implementations for testing
//!
//! These mocks stand in for the completion provider and the tracing
//! backend so turns can be driven end to end without network I/O.

use crate::llm::{CompletionProvider, CompletionRequest, Increment, IncrementStream, LlmError};
use crate::spans::{FinishedSpan, SpanExporter};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;

// ============================================================================
// Mock Provider
// ============================================================================

enum MockTurn {
    Results(Vec<Result<Increment, LlmError>>),
    /// Yield these, then never finish
    Hanging(Vec<Increment>),
    Error(LlmError),
}

/// Provider that replays queued turns, one per `stream` call
pub struct MockProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<CompletionRequest>>,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a turn that streams these increments and ends
    pub fn queue_increments(&self, increments: Vec<Increment>) {
        self.queue_results(increments.into_iter().map(Ok).collect());
    }

    /// Queue a turn that may fail part way through
    pub fn queue_results(&self, results: Vec<Result<Increment, LlmError>>) {
        self.turns
            .lock()
            .unwrap()
            .push_back(MockTurn::Results(results));
    }

    /// Queue a turn that streams these increments and then stalls
    pub fn queue_hanging(&self, increments: Vec<Increment>) {
        self.turns
            .lock()
            .unwrap()
            .push_back(MockTurn::Hanging(increments));
    }

    /// Queue a turn whose call fails before streaming
    pub fn queue_error(&self, error: LlmError) {
        self.turns.lock().unwrap().push_back(MockTurn::Error(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<IncrementStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let turn = self.turns.lock().unwrap().pop_front();
        match turn {
            Some(MockTurn::Results(results)) => Ok(futures::stream::iter(results).boxed()),
            Some(MockTurn::Hanging(increments)) => Ok(futures::stream::iter(
                increments.into_iter().map(Ok),
            )
            .chain(futures::stream::pending())
            .boxed()),
            Some(MockTurn::Error(error)) => Err(error),
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ============================================================================
// Memory Exporter
// ============================================================================

/// Exporter that keeps finished spans for inspection
#[derive(Default)]
pub struct MemoryExporter {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl MemoryExporter {
    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.spans.lock().unwrap().clone()
    }
}

impl SpanExporter for MemoryExporter {
    fn export(&self, span: FinishedSpan) {
        self.spans.lock().unwrap().push(span);
    }
}
