use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use chatloom_core::{
    estimate_tokens, ChatError, CompletionChunk, CompletionProvider, CompletionRequest,
    CompletionStream, Model,
};

type TokenCounter = Arc<dyn Fn(&str) -> u32 + Send + Sync>;

/// A provider that replays canned deltas.
///
/// Used by tests and by `serve --mock`. It can fail before streaming, fail
/// after a number of deltas, and pause between deltas.
pub struct ScriptedProvider {
    name: String,
    deltas: Vec<String>,
    fail_on_start: bool,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    token_counter: Option<TokenCounter>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            deltas: deltas.into_iter().map(Into::into).collect(),
            fail_on_start: false,
            fail_after: None,
            delay: None,
            token_counter: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reject the request before any delta is produced.
    pub fn failing_on_start(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    /// Emit `count` deltas, then a stream error.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Sleep before every delta.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the default token estimate.
    pub fn with_token_counter(mut self, counter: impl Fn(&str) -> u32 + Send + Sync + 'static) -> Self {
        self.token_counter = Some(Arc::new(counter));
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn count_tokens(&self, _model: &Model, text: &str) -> u32 {
        match &self.token_counter {
            Some(counter) => counter(text),
            None => estimate_tokens(text),
        }
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ChatError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.clone()),
            Err(poisoned) => poisoned.into_inner().push(request.clone()),
        }

        if self.fail_on_start {
            return Err(ChatError::provider(&self.name, "scripted failure on start"));
        }

        let take = self.fail_after.unwrap_or(self.deltas.len());
        let mut items: Vec<Result<CompletionChunk, ChatError>> = self
            .deltas
            .iter()
            .take(take)
            .map(|d| Ok(CompletionChunk::delta(d.as_str())))
            .collect();
        if self.fail_after.is_some() {
            items.push(Err(ChatError::provider(&self.name, "scripted failure mid-stream")));
        }

        let delay = self.delay;
        let stream = futures::stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_core::{ConversationConfig, Message, PromptMessage};

    fn request() -> CompletionRequest {
        let config = ConversationConfig::new(Model::new("m", 100));
        CompletionRequest::streaming(&config, vec![PromptMessage::from(&Message::user("hi", 1))])
    }

    async fn drain(stream: CompletionStream) -> Vec<Result<CompletionChunk, ChatError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn replays_deltas_in_order() {
        let provider = ScriptedProvider::new(["Hel", "lo"]);
        let items = drain(provider.stream_completion(&request()).await.unwrap()).await;
        let deltas: Vec<_> = items.into_iter().map(|i| i.unwrap().delta).collect();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn fails_after_configured_deltas() {
        let provider = ScriptedProvider::new(["a", "b", "c"]).failing_after(1);
        let items = drain(provider.stream_completion(&request()).await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn fails_on_start() {
        let provider = ScriptedProvider::new(["a"]).failing_on_start();
        assert!(provider.stream_completion(&request()).await.is_err());
    }

    #[test]
    fn custom_token_counter_is_used() {
        let provider = ScriptedProvider::new(Vec::<String>::new()).with_token_counter(|t| t.len() as u32);
        assert_eq!(provider.count_tokens(&Model::new("m", 1), "abcdef"), 6);
    }
}
