//! Distributed-tracing spans for completion calls
//!
//! One span per completion call. A finished turn's span stays open in a
//! pending table until the user scores the response (or it expires), and
//! its `traceparent` carrier lets that later request join the same trace.

mod context;
mod export;
mod recorder;

pub use context::{Carrier, CarrierError, SpanId, TraceContext};
pub use export::{LogExporter, OtlpExporter, SpanExporter};
pub use recorder::{ActiveSpan, PendingSpanError, SpanRecorder, SpanStatus};

#[cfg(test)]
pub use recorder::{AttributeValue, FinishedSpan};
