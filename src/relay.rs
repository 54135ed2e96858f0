//! Completion relay
//!
//! Runs one streaming completion call as a producer task. Each increment
//! is pushed into a bounded channel that the HTTP response drains, and is
//! accumulated for the conversation history and the call's span. The task
//! stops early when the client goes away or the server shuts down.

use crate::conversation::Message;
use crate::llm::{CompletionProvider, CompletionRequest, Increment, LlmError, LlmErrorKind};
use crate::session::Session;
use crate::spans::{ActiveSpan, SpanId, SpanRecorder, SpanStatus, TraceContext};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const SPAN_NAME: &str = "call_gpt_model";

/// How a relayed turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Provider finished; the text was appended to the conversation
    Completed { text: String },
    /// Provider call failed; nothing was appended
    Failed { kind: LlmErrorKind, message: String },
    /// Client disconnected or the server is shutting down; nothing was appended
    Cancelled,
}

/// A turn in flight
pub struct TurnStream {
    pub span_id: SpanId,
    /// Text increments in arrival order. Closed when the turn ends.
    pub frames: mpsc::Receiver<String>,
    pub task: JoinHandle<TurnOutcome>,
}

/// Starts relay tasks
pub struct Relay {
    provider: Arc<dyn CompletionProvider>,
    recorder: Arc<SpanRecorder>,
    buffer: usize,
    shutdown: CancellationToken,
}

impl Relay {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        recorder: Arc<SpanRecorder>,
        buffer: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            recorder,
            buffer: buffer.max(1),
            shutdown,
        }
    }

    /// Snapshot the session, open the call's span and spawn the producer.
    /// `parent` joins the span to a caller-supplied trace.
    pub async fn start(&self, session: Arc<Session>, parent: Option<TraceContext>) -> TurnStream {
        let (messages, message_count, model, prompt) = {
            let state = session.lock().await;
            (
                state.conversation.snapshot(),
                state.conversation.message_count(),
                state.model.clone(),
                state
                    .conversation
                    .last_user_content()
                    .unwrap_or_default()
                    .to_string(),
            )
        };

        let mut span = self.recorder.begin(SPAN_NAME, parent.as_ref());
        span.set_attribute("model", model.model_name.as_str());
        span.set_attribute("temperature", model.temperature);
        span.set_attribute("top_p", model.top_p);
        span.set_attribute("prompt", prompt);
        span.set_attribute("message_count", message_count);
        span.set_attribute("session_id", session.id().to_string());

        let span_id = span.id();
        let instrument = span.tracing_span().clone();
        let (tx, frames) = mpsc::channel(self.buffer);

        let task = RelayTask {
            provider: Arc::clone(&self.provider),
            recorder: Arc::clone(&self.recorder),
            session,
            span,
            request: CompletionRequest::new(&model, messages),
            tx,
            cancel: self.shutdown.child_token(),
        };
        let task = tokio::spawn(task.run().instrument(instrument));

        TurnStream {
            span_id,
            frames,
            task,
        }
    }
}

/// Running totals for one call
#[derive(Debug, Default)]
struct Accumulator {
    text: String,
    /// Whitespace-delimited words, a rough proxy for tokens
    tokens_used: usize,
    /// Number of increments forwarded
    completion_tokens: usize,
}

impl Accumulator {
    fn push(&mut self, text: &str) {
        self.text.push_str(text);
        self.tokens_used += text.split_whitespace().count();
        self.completion_tokens += 1;
    }
}

enum PumpEnd {
    Completed,
    Failed(LlmError),
    Cancelled(&'static str),
}

struct RelayTask {
    provider: Arc<dyn CompletionProvider>,
    recorder: Arc<SpanRecorder>,
    session: Arc<Session>,
    span: ActiveSpan,
    request: CompletionRequest,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl RelayTask {
    async fn run(mut self) -> TurnOutcome {
        let start = Instant::now();
        let mut acc = Accumulator::default();
        let end = self.pump(&mut acc).await;
        self.span
            .set_attribute("latency", start.elapsed().as_secs_f64());

        // The sender drops when this returns, so the client only sees the
        // stream close after the history and span are settled.
        match end {
            PumpEnd::Completed => {
                self.span.set_attribute("response", acc.text.as_str());
                self.span.set_attribute("tokens_used", acc.tokens_used);
                self.span
                    .set_attribute("completion_tokens", acc.completion_tokens);
                self.span.set_status(SpanStatus::Ok);

                self.session
                    .lock()
                    .await
                    .conversation
                    .append(Message::assistant(acc.text.clone()));
                let span_id = self.recorder.park(self.session.id(), self.span);

                tracing::info!(
                    span_id = %span_id,
                    increments = acc.completion_tokens,
                    tokens_used = acc.tokens_used,
                    "Turn completed"
                );
                TurnOutcome::Completed { text: acc.text }
            }
            PumpEnd::Failed(e) => {
                self.span.set_attribute("error", e.message.as_str());
                self.span.set_attribute("error.kind", e.kind.as_str());
                self.span.set_attribute("completion_tokens", acc.completion_tokens);
                self.span.set_status(SpanStatus::Error(e.message.clone()));
                self.recorder.end(self.span);

                tracing::warn!(
                    error = %e.message,
                    kind = e.kind.as_str(),
                    discarded_increments = acc.completion_tokens,
                    "Turn failed"
                );
                TurnOutcome::Failed {
                    kind: e.kind,
                    message: e.message,
                }
            }
            PumpEnd::Cancelled(reason) => {
                self.span.set_attribute("cancelled", true);
                self.span.set_attribute("cancel_reason", reason);
                self.span.set_attribute("completion_tokens", acc.completion_tokens);
                self.recorder.end(self.span);

                tracing::info!(reason, "Turn cancelled");
                TurnOutcome::Cancelled
            }
        }
    }

    async fn pump(&mut self, acc: &mut Accumulator) -> PumpEnd {
        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return PumpEnd::Cancelled("shutdown"),
            () = self.tx.closed() => return PumpEnd::Cancelled("client_disconnected"),
            opened = self.provider.stream(&self.request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return PumpEnd::Failed(e),
        };

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PumpEnd::Cancelled("shutdown"),
                () = self.tx.closed() => return PumpEnd::Cancelled("client_disconnected"),
                next = stream.next() => next,
            };
            let increment = match next {
                None => return PumpEnd::Completed,
                Some(Err(e)) => return PumpEnd::Failed(e),
                Some(Ok(increment)) => increment,
            };

            if let Some(end) = self.forward(&increment, acc).await {
                return end;
            }
            // Anything the provider buffered after a stop is never read
            if increment.is_stop() {
                return PumpEnd::Completed;
            }
        }
    }

    async fn forward(&mut self, increment: &Increment, acc: &mut Accumulator) -> Option<PumpEnd> {
        if let Some(id) = &increment.id {
            self.span.set_attribute("id", id.as_str());
        }
        if let Some(model) = &increment.model {
            self.span.set_attribute("model", model.as_str());
        }
        let text = increment.content()?;

        acc.push(text);
        self.span.set_attribute("response_partial", text);
        self.span.set_attribute("tokens_used_partial", acc.tokens_used);
        self.span
            .set_attribute("completion_tokens_partial", acc.completion_tokens);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(PumpEnd::Cancelled("shutdown")),
            sent = self.tx.send(text.to_string()) => match sent {
                Ok(()) => None,
                Err(_) => Some(PumpEnd::Cancelled("client_disconnected")),
            },
        }
    }
}
