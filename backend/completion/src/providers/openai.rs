use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{future, stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chatloom_core::{
    ChatError, CompletionChunk, CompletionProvider, CompletionRequest, CompletionStream,
    PromptMessage, Role,
};

const PROVIDER_NAME: &str = "openai";
const DONE_MARKER: &str = "[DONE]";

/// Streaming chat-completions client for OpenAI and compatible APIs.
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    top_p: f32,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    max_tokens: u32,
    presence_penalty: f32,
    frequency_penalty: f32,
    stream: bool,
}

impl<'a> From<&'a CompletionRequest> for ChatRequest<'a> {
    fn from(req: &'a CompletionRequest) -> Self {
        Self {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            top_p: req.top_p,
            n: req.n,
            stop: (!req.stop.is_empty()).then_some(req.stop.as_slice()),
            max_tokens: req.max_tokens,
            presence_penalty: req.presence_penalty,
            frequency_penalty: req.frequency_penalty,
            stream: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    role: Option<Role>,
    content: Option<String>,
}

enum Frame {
    Chunk(CompletionChunk),
    Skip,
    Done,
}

/// Parse one SSE `data:` payload.
fn parse_frame(data: &str) -> Result<Frame, ChatError> {
    let data = data.trim();
    if data == DONE_MARKER {
        return Ok(Frame::Done);
    }
    if data.is_empty() {
        return Ok(Frame::Skip);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| ChatError::provider(PROVIDER_NAME, format!("malformed stream chunk: {e}")))?;

    // Only choice 0 is streamed, even when `n > 1` interleaves others.
    let Some(choice) = chunk.choices.into_iter().find(|c| c.index == 0) else {
        return Ok(Frame::Skip);
    };
    match choice.delta.content {
        Some(content) if !content.is_empty() => Ok(Frame::Chunk(CompletionChunk {
            role: choice.delta.role.or(Some(Role::Assistant)),
            delta: content,
        })),
        _ => Ok(Frame::Skip),
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ChatError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            base_url = %self.base_url,
            "Sending streaming request"
        );

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&ChatRequest::from(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::provider(PROVIDER_NAME, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::provider(
                PROVIDER_NAME,
                format!("returned {status}: {body}"),
            ));
        }

        // A body that closes before `[DONE]` is truncated, not finished.
        let truncated = stream::once(future::ready(Err::<Frame, _>(ChatError::provider(
            PROVIDER_NAME,
            "stream ended without [DONE]",
        ))));

        let stream = response
            .bytes_stream()
            .eventsource()
            .map(|event| match event {
                Ok(event) => parse_frame(&event.data),
                Err(e) => Err(ChatError::provider(PROVIDER_NAME, format!("stream error: {e}"))),
            })
            .chain(truncated)
            .take_while(|frame| future::ready(!matches!(frame, Ok(Frame::Done))))
            .filter_map(|frame| async move {
                match frame {
                    Ok(Frame::Chunk(chunk)) => Some(Ok(chunk)),
                    Ok(Frame::Skip) | Ok(Frame::Done) => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Box::pin(stream))
    }
}
