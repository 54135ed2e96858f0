//! Shelli chat relay
//!
//! Relays browser chat messages to a hosted completion API, streams the
//! reply back over server-sent events, and records one tracing span per
//! turn that the user can later score.

mod api;
mod config;
mod conversation;
mod llm;
mod relay;
mod session;
mod spans;

#[cfg(test)]
mod testing;

use api::{create_router, AppState};
use config::Config;
use llm::{CompletionProvider, LoggingProvider, OpenAIProvider};
use spans::{LogExporter, OtlpExporter, SpanExporter, SpanRecorder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelli_chat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env()?;
    let shutdown = CancellationToken::new();

    // Span export
    let (exporter, exporter_task) = match &config.otlp_endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Exporting spans over OTLP/HTTP");
            let (exporter, task) =
                OtlpExporter::spawn(endpoint, &config.service_name, shutdown.clone());
            let exporter: Arc<dyn SpanExporter> = Arc::new(exporter);
            (exporter, Some(task))
        }
        None => {
            tracing::info!("SHELLI_OTLP_ENDPOINT not set; spans go to the log");
            let exporter: Arc<dyn SpanExporter> = Arc::new(LogExporter);
            (exporter, None)
        }
    };
    let recorder = Arc::new(SpanRecorder::new(exporter));

    // Completion provider
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; requests go out unauthenticated");
    }
    let provider: Arc<dyn CompletionProvider> = Arc::new(LoggingProvider::new(Arc::new(
        OpenAIProvider::new(config.openai_api_key.clone(), &config.openai_base_url),
    )));
    tracing::info!(
        base_url = %config.openai_base_url,
        default_model = %config.default_model,
        "Completion provider configured"
    );

    let port = config.port;
    let state = AppState::new(config, provider, recorder, shutdown.clone());
    spawn_sweeper(state.clone(), shutdown.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // text/event-stream is not compressed by the default predicate, so
    // increments are not held back by the encoder
    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Shelli chat listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = exporter_task {
        let _ = task.await;
    }

    Ok(())
}

/// Periodically end stale pending spans and drop idle sessions
fn spawn_sweeper(state: AppState, shutdown: CancellationToken) {
    let interval = state.config.sweep_interval;
    let span_ttl = state.config.pending_span_ttl;
    let session_ttl = state.config.session_idle_ttl;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let expired = state.recorder.expire_pending(span_ttl, now);
            let evicted = state.sessions.evict_idle(session_ttl, now).await;
            if expired > 0 || evicted > 0 {
                let live = state.sessions.len().await;
                tracing::info!(
                    expired_spans = expired,
                    evicted_sessions = evicted,
                    live_sessions = live,
                    pending_spans = state.recorder.pending_count(),
                    "Sweep finished"
                );
            }
        }
    });
}
