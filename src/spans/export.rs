//! Span exporters
//!
//! `LogExporter` writes finished spans to the process log. `OtlpExporter`
//! batches them on a background task and ships OTLP/HTTP JSON to a
//! collector. Export is best effort: failures are logged and the batch
//! is dropped.

use super::recorder::{AttributeValue, FinishedSpan, SpanStatus};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MAX_BATCH: usize = 512;
const QUEUE_CAPACITY: usize = 2048;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Destination for finished spans
pub trait SpanExporter: Send + Sync {
    fn export(&self, span: FinishedSpan);
}

/// Writes each finished span as one structured log event
pub struct LogExporter;

impl SpanExporter for LogExporter {
    fn export(&self, span: FinishedSpan) {
        let attributes =
            serde_json::to_string(&span.attributes).unwrap_or_else(|_| "{}".to_string());
        let (status, error) = match &span.status {
            SpanStatus::Unset => ("unset", None),
            SpanStatus::Ok => ("ok", None),
            SpanStatus::Error(message) => ("error", Some(message.as_str())),
        };

        tracing::info!(
            target: "shelli_chat::spans",
            name = %span.name,
            trace_id = %span.context.trace_id,
            span_id = %span.context.span_id,
            parent_span_id = ?span.parent_span_id.map(|id| id.to_string()),
            duration_ms = span.duration_ms(),
            status,
            error,
            attributes = %attributes,
            "Span finished"
        );
    }
}

/// Batching OTLP/HTTP JSON exporter
pub struct OtlpExporter {
    tx: mpsc::Sender<FinishedSpan>,
}

impl OtlpExporter {
    /// Start the background batch task. It flushes what it holds and exits
    /// once `shutdown` is cancelled.
    pub fn spawn(
        endpoint: &str,
        service_name: &str,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = BatchWorker {
            client: Client::new(),
            url: format!("{}/v1/traces", endpoint.trim_end_matches('/')),
            service_name: service_name.to_string(),
        };
        let handle = tokio::spawn(worker.run(rx, shutdown));
        (Self { tx }, handle)
    }
}

impl SpanExporter for OtlpExporter {
    fn export(&self, span: FinishedSpan) {
        if let Err(e) = self.tx.try_send(span) {
            tracing::warn!(error = %e, "Dropping span, export queue unavailable");
        }
    }
}

struct BatchWorker {
    client: Client,
    url: String,
    service_name: String,
}

impl BatchWorker {
    async fn run(self, mut rx: mpsc::Receiver<FinishedSpan>, shutdown: CancellationToken) {
        let mut batch = Vec::with_capacity(MAX_BATCH);
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                maybe_span = rx.recv() => match maybe_span {
                    Some(span) => {
                        batch.push(span);
                        if batch.len() >= MAX_BATCH {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(&mut batch).await,
                () = shutdown.cancelled() => {
                    while let Ok(span) = rx.try_recv() {
                        batch.push(span);
                    }
                    break;
                }
            }
        }

        self.flush(&mut batch).await;
        tracing::info!("Span exporter stopped");
    }

    async fn flush(&self, batch: &mut Vec<FinishedSpan>) {
        if batch.is_empty() {
            return;
        }
        let spans = std::mem::take(batch);
        let body = otlp_payload(&self.service_name, &spans);

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(count = spans.len(), "Exported spans");
            }
            Ok(response) => {
                tracing::warn!(
                    status = %response.status(),
                    count = spans.len(),
                    "Collector rejected spans"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, count = spans.len(), "Failed to export spans");
            }
        }
    }
}

/// Build an OTLP `ExportTraceServiceRequest` in its JSON encoding
pub fn otlp_payload(service_name: &str, spans: &[FinishedSpan]) -> Value {
    let spans: Vec<Value> = spans.iter().map(otlp_span).collect();
    json!({
        "resourceSpans": [{
            "resource": {
                "attributes": [otlp_attribute("service.name", &AttributeValue::from(service_name))]
            },
            "scopeSpans": [{
                "scope": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
                "spans": spans
            }]
        }]
    })
}

fn otlp_span(span: &FinishedSpan) -> Value {
    let status = match &span.status {
        SpanStatus::Unset => json!({ "code": 0 }),
        SpanStatus::Ok => json!({ "code": 1 }),
        SpanStatus::Error(message) => json!({ "code": 2, "message": message }),
    };
    let attributes: Vec<Value> = span
        .attributes
        .iter()
        .map(|(key, value)| otlp_attribute(key, value))
        .collect();

    let mut value = json!({
        "traceId": span.context.trace_id.to_string(),
        "spanId": span.context.span_id.to_string(),
        "name": span.name,
        // SPAN_KIND_INTERNAL
        "kind": 1,
        "startTimeUnixNano": unix_nanos(span.start),
        "endTimeUnixNano": unix_nanos(span.end),
        "attributes": attributes,
        "status": status,
    });
    if let Some(parent) = span.parent_span_id {
        value["parentSpanId"] = Value::String(parent.to_string());
    }
    value
}

fn otlp_attribute(key: &str, value: &AttributeValue) -> Value {
    let value = match value {
        AttributeValue::String(s) => json!({ "stringValue": s }),
        // int64 travels as a decimal string in proto3 JSON
        AttributeValue::Int(i) => json!({ "intValue": i.to_string() }),
        AttributeValue::Float(f) => json!({ "doubleValue": f }),
        AttributeValue::Bool(b) => json!({ "boolValue": b }),
    };
    json!({ "key": key, "value": value })
}

fn unix_nanos(at: chrono::DateTime<chrono::Utc>) -> String {
    at.timestamp_nanos_opt().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::context::{Carrier, TraceContext};
    use std::collections::BTreeMap;

    fn finished(status: SpanStatus, parent: bool) -> FinishedSpan {
        let ctx = TraceContext::from_carrier(&Carrier::from(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        ))
        .unwrap();
        let mut attributes = BTreeMap::new();
        attributes.insert("model".to_string(), AttributeValue::from("gpt-test"));
        attributes.insert("tokens_used".to_string(), AttributeValue::Int(3));
        attributes.insert("latency".to_string(), AttributeValue::Float(0.25));
        attributes.insert("cancelled".to_string(), AttributeValue::Bool(false));
        let start = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        FinishedSpan {
            name: "call_gpt_model".to_string(),
            context: ctx,
            parent_span_id: parent.then(|| "1111111111111111".parse().unwrap()),
            start,
            end: start + chrono::Duration::milliseconds(250),
            attributes,
            status,
        }
    }

    #[test]
    fn test_otlp_payload_shape() {
        let payload = otlp_payload("splunk-shelli", &[finished(SpanStatus::Ok, false)]);
        let resource = &payload["resourceSpans"][0];
        assert_eq!(
            resource["resource"]["attributes"][0],
            json!({ "key": "service.name", "value": { "stringValue": "splunk-shelli" } })
        );

        let span = &resource["scopeSpans"][0]["spans"][0];
        assert_eq!(span["traceId"], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span["spanId"], "00f067aa0ba902b7");
        assert_eq!(span["startTimeUnixNano"], "1700000000000000000");
        assert_eq!(span["endTimeUnixNano"], "1700000000250000000");
        assert_eq!(span["status"]["code"], 1);
        assert!(span.get("parentSpanId").is_none());

        let attributes = span["attributes"].as_array().unwrap();
        assert!(attributes.contains(&json!({ "key": "tokens_used", "value": { "intValue": "3" } })));
        assert!(attributes.contains(&json!({ "key": "latency", "value": { "doubleValue": 0.25 } })));
        assert!(attributes.contains(&json!({ "key": "cancelled", "value": { "boolValue": false } })));
    }

    #[test]
    fn test_otlp_error_status_and_parent() {
        let payload = otlp_payload(
            "svc",
            &[finished(SpanStatus::Error("boom".to_string()), true)],
        );
        let span = &payload["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
        assert_eq!(span["status"], json!({ "code": 2, "message": "boom" }));
        assert_eq!(span["parentSpanId"], "1111111111111111");
    }

    #[test]
    fn test_finished_duration() {
        assert_eq!(finished(SpanStatus::Unset, false).duration_ms(), 250);
    }
}
