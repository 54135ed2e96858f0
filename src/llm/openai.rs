//! `OpenAI`-compatible streaming chat completions

use super::types::{CompletionRequest, Increment};
use super::{CompletionProvider, IncrementStream, LlmError};
use crate::conversation::Message;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Provider speaking the `/chat/completions` streaming protocol
pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    url: String,
}

impl OpenAIProvider {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`
    pub fn new(api_key: Option<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<IncrementStream, LlmError> {
        let body = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            stream: true,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                LlmError::network(format!("Connection failed: {e}"))
            } else {
                LlmError::unknown(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
                .map_or(body, |resp| resp.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        // A trailing `None` marks end of body so the decoder can flush
        let mut decoder = ChunkDecoder::default();
        let increments = response
            .bytes_stream()
            .map(Some)
            .chain(futures::stream::once(async { None }))
            .map(move |chunk| match chunk {
                Some(Ok(bytes)) => decoder.feed(&bytes),
                Some(Err(e)) => vec![Err(LlmError::stream(format!("Stream interrupted: {e}")))],
                None => decoder.finish(),
            })
            .flat_map(futures::stream::iter);

        Ok(increments.boxed())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Incremental decoder for the provider's `data: {json}` event lines.
/// Buffers partial lines across network chunks.
#[derive(Default)]
pub(crate) struct ChunkDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl ChunkDecoder {
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Increment, LlmError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            out.extend(self.decode_line(&line));
        }

        out
    }

    /// Decode whatever is left once the body has ended without a final newline
    pub(crate) fn finish(&mut self) -> Vec<Result<Increment, LlmError>> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest).into_iter().collect()
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Result<Increment, LlmError>> {
        if self.done {
            return None;
        }
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\r', '\n']);

        // Comments, event names and blank separators carry no text
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        // Error frames are checked first: every chunk field is optional, so
        // an error object would otherwise decode as an empty chunk
        if let Ok(err) = serde_json::from_str::<OpenAIErrorResponse>(data) {
            return Some(Err(LlmError::stream(err.error.message)));
        }
        Some(match serde_json::from_str::<OpenAIChunk>(data) {
            Ok(chunk) => Ok(chunk.into_increment()),
            Err(e) => Err(LlmError::stream(format!("Malformed stream chunk: {e}"))),
        })
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f64,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAIChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIChunkChoice>,
}

impl OpenAIChunk {
    fn into_increment(self) -> Increment {
        let choice = self.choices.into_iter().next();
        let (text, finish_reason) = match choice {
            Some(choice) => (choice.delta.and_then(|d| d.content), choice.finish_reason),
            None => (None, None),
        };
        Increment {
            id: self.id,
            model: self.model,
            text,
            finish_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIChunkChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
