//! Span lifecycle and the table of spans awaiting a satisfaction score

use super::context::{Carrier, CarrierError, SpanId, TraceContext, TraceId};
use super::export::SpanExporter;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Value attached to a span attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

/// A span that has been started and not yet ended
#[derive(Debug)]
pub struct ActiveSpan {
    name: String,
    context: TraceContext,
    parent_span_id: Option<SpanId>,
    start: DateTime<Utc>,
    attributes: BTreeMap<String, AttributeValue>,
    status: SpanStatus,
    tracing_span: tracing::Span,
}

impl ActiveSpan {
    pub fn id(&self) -> SpanId {
        self.context.span_id
    }

    pub fn context(&self) -> TraceContext {
        self.context
    }

    /// Attach an attribute, replacing any earlier value for the key
    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    #[allow(dead_code)] // Used by tests
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    /// Log span carrying this span's ids, for instrumenting work done on its behalf
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.tracing_span
    }
}

/// A span handed to the exporter
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub context: TraceContext,
    pub parent_span_id: Option<SpanId>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SpanStatus,
}

impl FinishedSpan {
    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// A finished turn's span kept open until the user scores it
#[derive(Debug)]
pub struct PendingSpan {
    pub span: ActiveSpan,
    pub carrier: Carrier,
    pub session: SessionId,
    parked_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PendingSpanError {
    #[error("Span not found")]
    NotFound,
    #[error("{0} responses are awaiting a score; span_id is required")]
    Ambiguous(usize),
}

/// Creates spans, exports finished ones, and tracks spans awaiting a score
pub struct SpanRecorder {
    exporter: Arc<dyn SpanExporter>,
    pending: Mutex<HashMap<SpanId, PendingSpan>>,
}

impl SpanRecorder {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            exporter,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start a span. With a parent it joins the parent's trace, otherwise
    /// it starts a new trace.
    pub fn begin(&self, name: &str, parent: Option<&TraceContext>) -> ActiveSpan {
        let context = TraceContext {
            trace_id: parent.map_or_else(TraceId::random, |p| p.trace_id),
            span_id: SpanId::random(),
            sampled: parent.map_or(true, |p| p.sampled),
        };
        let tracing_span = tracing::info_span!(
            "span",
            span.name = %name,
            trace_id = %context.trace_id,
            span_id = %context.span_id,
        );

        ActiveSpan {
            name: name.to_string(),
            context,
            parent_span_id: parent.map(|p| p.span_id),
            start: Utc::now(),
            attributes: BTreeMap::new(),
            status: SpanStatus::Unset,
            tracing_span,
        }
    }

    pub fn export_context(&self, span: &ActiveSpan) -> Carrier {
        span.context().to_carrier()
    }

    pub fn resume(&self, carrier: &Carrier) -> Result<TraceContext, CarrierError> {
        TraceContext::from_carrier(carrier)
    }

    /// Stamp the end time and hand the span to the exporter
    pub fn end(&self, span: ActiveSpan) {
        let ActiveSpan {
            name,
            context,
            parent_span_id,
            start,
            attributes,
            status,
            tracing_span: _,
        } = span;

        self.exporter.export(FinishedSpan {
            name,
            context,
            parent_span_id,
            start,
            end: Utc::now(),
            attributes,
            status,
        });
    }

    /// Keep a span open until `take_pending` or expiry
    pub fn park(&self, session: SessionId, span: ActiveSpan) -> SpanId {
        let id = span.id();
        let carrier = self.export_context(&span);
        self.pending_table().insert(
            id,
            PendingSpan {
                span,
                carrier,
                session,
                parked_at: Instant::now(),
            },
        );
        id
    }

    /// Remove a pending span owned by `session`.
    ///
    /// With an explicit id only that span matches. Without one, the session
    /// must have exactly one pending span; several is `Ambiguous` rather
    /// than a guess.
    pub fn take_pending(
        &self,
        session: SessionId,
        id: Option<SpanId>,
    ) -> Result<PendingSpan, PendingSpanError> {
        let mut pending = self.pending_table();

        let id = match id {
            Some(id) => id,
            None => {
                let owned: Vec<SpanId> = pending
                    .iter()
                    .filter(|(_, p)| p.session == session)
                    .map(|(id, _)| *id)
                    .collect();
                match owned.as_slice() {
                    [] => return Err(PendingSpanError::NotFound),
                    [only] => *only,
                    many => return Err(PendingSpanError::Ambiguous(many.len())),
                }
            }
        };

        match pending.get(&id) {
            Some(p) if p.session == session => {}
            _ => return Err(PendingSpanError::NotFound),
        }
        pending.remove(&id).ok_or(PendingSpanError::NotFound)
    }

    /// End every pending span parked longer than `ttl` as of `now`
    pub fn expire_pending(&self, ttl: Duration, now: Instant) -> usize {
        let expired: Vec<PendingSpan> = {
            let mut pending = self.pending_table();
            let ids: Vec<SpanId> = pending
                .iter()
                .filter(|(_, p)| now.saturating_duration_since(p.parked_at) > ttl)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = expired.len();
        for PendingSpan { mut span, .. } in expired {
            span.set_attribute("satisfaction_expired", true);
            self.end(span);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending_table().len()
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, HashMap<SpanId, PendingSpan>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
