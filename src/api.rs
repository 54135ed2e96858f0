//! HTTP API for the chat relay

mod assets;
mod cookie;
mod handlers;
mod page;
mod sse;
mod types;

pub use handlers::create_router;

use crate::config::Config;
use crate::llm::CompletionProvider;
use crate::relay::Relay;
use crate::session::SessionStore;
use crate::spans::SpanRecorder;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub recorder: Arc<SpanRecorder>,
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(
        config: Config,
        provider: Arc<dyn CompletionProvider>,
        recorder: Arc<SpanRecorder>,
        shutdown: CancellationToken,
    ) -> Self {
        let sessions = SessionStore::new(
            config.system_prompt.clone(),
            crate::conversation::ModelConfig {
                model_name: config.default_model.clone(),
                temperature: config.temperature,
                top_p: config.top_p,
            },
        );
        let relay = Relay::new(provider, Arc::clone(&recorder), config.stream_buffer, shutdown);

        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            recorder,
            relay: Arc::new(relay),
        }
    }
}
