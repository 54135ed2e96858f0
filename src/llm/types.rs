//! Provider-neutral request and stream types

use crate::conversation::{Message, ModelConfig};

/// One streaming completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub top_p: f64,
}

impl CompletionRequest {
    pub fn new(config: &ModelConfig, messages: Vec<Message>) -> Self {
        Self {
            model: config.model_name.clone(),
            messages,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

/// One partial chunk of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Increment {
    /// Provider's call id
    pub id: Option<String>,
    /// Model that actually served the call
    pub model: Option<String>,
    pub text: Option<String>,
    pub finish_reason: Option<String>,
}

impl Increment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_finish(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Text worth forwarding, if any
    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_stop(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop")
    }
}
