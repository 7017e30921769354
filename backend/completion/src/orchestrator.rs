use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use chatloom_core::{
    ChatError, CompletionProvider, CompletionRequest, Conversation, ConversationStore, Message,
    ResultExt, Role,
};
use chatloom_logging::{ConversationEvent, ConversationEventLogger};

use crate::dto::{CompletionInput, CompletionOutput};
use crate::sink::OutputSink;

/// Runs one user turn against a conversation: load or create it, append the
/// user message, stream the provider's answer to the sink, then persist.
///
/// Callers must not run two executions for the same conversation id at
/// once; see [`crate::ConversationLocks`].
pub struct CompletionOrchestrator {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn CompletionProvider>,
    timeout: Option<Duration>,
}

impl CompletionOrchestrator {
    pub fn new(store: Arc<dyn ConversationStore>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            store,
            provider,
            timeout: None,
        }
    }

    /// Abort any execution still streaming after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Execute one turn. The sink is consumed and dropped on return, which
    /// ends the consumer's stream.
    ///
    /// On any error after the user message was appended (provider failure,
    /// cancellation, timeout, closed sink) nothing is persisted.
    #[instrument(
        skip(self, input, sink, cancel),
        fields(conversation_id = %input.conversation_id, user_id = %input.user_id)
    )]
    pub async fn execute(
        &self,
        input: CompletionInput,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Result<CompletionOutput, ChatError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);

        let mut conversation = self.resolve_conversation(&input).await?;
        let model = conversation.config().model.clone();

        let tokens = self.provider.count_tokens(&model, &input.user_message);
        let user_message = Message::new(
            Role::User,
            input.user_message.as_str(),
            tokens,
            Some(model.clone()),
        );
        // An ended conversation surfaces as-is.
        let evicted = conversation.append_message(user_message)?;
        ConversationEventLogger::log_event(
            conversation.id(),
            ConversationEvent::MessageAppended {
                role: Role::User.to_string(),
                content: input.user_message.clone(),
                tokens,
                evicted,
                token_usage: conversation.token_usage(),
            },
        );

        let request = CompletionRequest::streaming(conversation.config(), conversation.prompt());
        let streamed = self
            .stream_response(&conversation, &input.user_id, &request, &sink, &cancel, deadline)
            .await;
        let (content, deltas) = match streamed {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "Completion aborted, conversation left unsaved");
                ConversationEventLogger::log_event(
                    conversation.id(),
                    ConversationEvent::CompletionFailed {
                        error_msg: e.to_string(),
                    },
                );
                return Err(e);
            }
        };
        drop(sink);

        let tokens = self.provider.count_tokens(&model, &content);
        let assistant = Message::new(Role::Assistant, content.as_str(), tokens, Some(model));
        let evicted = conversation.append_message(assistant)?;
        ConversationEventLogger::log_event(
            conversation.id(),
            ConversationEvent::CompletionFinished {
                deltas,
                content: content.clone(),
                tokens,
                evicted,
                token_usage: conversation.token_usage(),
            },
        );

        self.store
            .save(&conversation)
            .await
            .context("saving conversation")?;

        info!(
            deltas,
            token_usage = conversation.token_usage(),
            live = conversation.messages().len(),
            erased = conversation.erased_messages().len(),
            "Completion persisted"
        );

        Ok(CompletionOutput {
            conversation_id: conversation.id().to_string(),
            user_id: input.user_id,
            content,
        })
    }

    /// Load the conversation, creating and persisting it on a store miss.
    async fn resolve_conversation(
        &self,
        input: &CompletionInput,
    ) -> Result<Conversation, ChatError> {
        if !input.conversation_id.is_empty() {
            match self.store.find_by_id(&input.conversation_id).await {
                Ok(conversation) => {
                    debug!(
                        live = conversation.messages().len(),
                        token_usage = conversation.token_usage(),
                        "Loaded existing conversation"
                    );
                    return Ok(conversation);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.context("fetching existing conversation")),
            }
        }

        let conversation = self
            .new_conversation(input)
            .context("creating conversation")?;
        self.store
            .create(&conversation)
            .await
            .context("persisting new conversation")?;

        info!(id = %conversation.id(), "Created conversation");
        ConversationEventLogger::log_event(
            conversation.id(),
            ConversationEvent::Created {
                user_id: conversation.user_id().to_string(),
                model: conversation.config().model.name.clone(),
            },
        );
        Ok(conversation)
    }

    fn new_conversation(&self, input: &CompletionInput) -> Result<Conversation, ChatError> {
        let id = if input.conversation_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            input.conversation_id.clone()
        };
        let model = input.config.model();
        let system_text = input.config.initial_system_message.as_str();
        let tokens = self.provider.count_tokens(&model, system_text);
        let system = Message::new(Role::System, system_text, tokens, Some(model));

        Conversation::new(
            id,
            input.user_id.as_str(),
            system,
            input.config.conversation_config(),
        )
    }

    /// Drive the provider stream to completion, publishing the cumulative
    /// text after every delta. Returns the final text and the delta count.
    async fn stream_response(
        &self,
        conversation: &Conversation,
        user_id: &str,
        request: &CompletionRequest,
        sink: &OutputSink,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(String, usize), ChatError> {
        debug!(
            provider = %self.provider.name(),
            model = %request.model,
            window = request.messages.len(),
            "Starting streaming completion"
        );

        let mut stream = self
            .guard(self.provider.stream_completion(request), cancel, deadline)
            .await
            .and_then(|started| started)
            .context("creating chat completion")?;

        let mut content = String::new();
        let mut deltas = 0usize;
        loop {
            let next = self
                .guard(stream.next(), cancel, deadline)
                .await
                .context("streaming response")?;
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(e.context("streaming response")),
            };

            content.push_str(&chunk.delta);
            deltas += 1;

            let record = CompletionOutput {
                conversation_id: conversation.id().to_string(),
                user_id: user_id.to_string(),
                content: content.clone(),
            };
            self.guard(sink.publish(record), cancel, deadline)
                .await
                .and_then(|published| published)
                .context("publishing partial output")?;
        }

        debug!(deltas, chars = content.len(), "Stream finished");
        Ok((content, deltas))
    }

    /// Race `fut` against cancellation and the execution deadline.
    async fn guard<F: Future>(
        &self,
        fut: F,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<F::Output, ChatError> {
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            _ = expired => Err(ChatError::TimedOut(self.timeout.unwrap_or_default())),
            out = fut => Ok(out),
        }
    }

    /// End a conversation. Ending an already-ended conversation is a no-op.
    #[instrument(skip(self))]
    pub async fn end_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let mut conversation = self
            .store
            .find_by_id(conversation_id)
            .await
            .context("fetching conversation")?;
        if conversation.is_ended() {
            debug!("Conversation already ended");
            return Ok(conversation);
        }

        conversation.end();
        self.store
            .save(&conversation)
            .await
            .context("saving ended conversation")?;

        info!("Conversation ended");
        ConversationEventLogger::log_event(conversation.id(), ConversationEvent::Ended);
        Ok(conversation)
    }
}
