use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use chatloom_completion::{
    output_channel, CompletionConfig, CompletionInput, CompletionOrchestrator, CompletionOutput,
    ConversationLocks,
};
use chatloom_core::ChatError;

use crate::auth::RequireAuth;
use crate::error::{error_body, ApiError};

/// Shared application state for API handlers.
pub struct AppState {
    pub orchestrator: CompletionOrchestrator,
    pub locks: ConversationLocks,
    /// Generation settings applied to every request.
    pub completion: CompletionConfig,
    pub auth_token: Option<String>,
    pub stream_buffer: usize,
}

impl AppState {
    /// An empty id gets a fresh one here, so the handler can lock on it.
    fn input(&self, req: ChatRequest) -> CompletionInput {
        let conversation_id = if req.conversation_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            req.conversation_id
        };
        CompletionInput {
            conversation_id,
            user_id: req.user_id,
            user_message: req.user_message,
            config: self.completion.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: String,
    pub user_id: String,
    pub user_message: String,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    conversation_id: String,
    status: String,
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/chat/{id}/end", post(end_conversation))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "chatloom",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run one turn and answer with the final output.
#[instrument(skip_all, fields(user_id = %req.user_id))]
async fn chat(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Json(req): Json<ChatRequest>,
) -> Result<Json<CompletionOutput>, ApiError> {
    let input = state.input(req);
    let _lock = state.locks.acquire(&input.conversation_id).await;

    let (sink, records) = output_channel(state.stream_buffer);
    let drain = tokio::spawn(records.collect());
    let result = state
        .orchestrator
        .execute(input, sink, CancellationToken::new())
        .await;
    if let Err(join) = drain.await {
        warn!(error = %join, "Output drain task failed");
    }

    let output = result?;
    info!(conversation_id = %output.conversation_id, "Chat completed");
    Ok(Json(output))
}

/// Run one turn, streaming every cumulative record as an SSE `message`
/// event followed by a single `done` or `error` event.
///
/// Dropping the response stream (client gone) cancels the execution.
#[instrument(skip_all, fields(user_id = %req.user_id))]
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Json(req): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let input = state.input(req);
    let (sink, records) = output_channel(state.stream_buffer);
    let cancel = CancellationToken::new();
    let on_disconnect = cancel.clone().drop_guard();

    let task = tokio::spawn(async move {
        let _lock = state.locks.acquire(&input.conversation_id).await;
        state.orchestrator.execute(input, sink, cancel).await
    });

    let messages = records
        .into_stream()
        .map(|record| Ok::<_, Infallible>(json_event("message", &record)));

    let finale = stream::once(async move {
        let event = match task.await {
            Ok(Ok(output)) => json_event("done", &output),
            Ok(Err(err)) => error_event(&err),
            Err(join) => error_event(&ChatError::storage(format!("completion task failed: {join}"))),
        };
        // The stream finished normally; cancelling now is a no-op.
        drop(on_disconnect);
        Ok::<_, Infallible>(event)
    });

    Sse::new(messages.chain(finale)).keep_alive(KeepAlive::default())
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn error_event(err: &ChatError) -> Event {
    json_event("error", &error_body(err))
}

#[instrument(skip(state, _auth))]
async fn end_conversation(
    State(state): State<Arc<AppState>>,
    _auth: RequireAuth,
    Path(id): Path<String>,
) -> Result<Json<EndResponse>, ApiError> {
    let _lock = state.locks.acquire(&id).await;
    let conversation = state.orchestrator.end_conversation(&id).await?;
    Ok(Json(EndResponse {
        conversation_id: conversation.id().to_string(),
        status: conversation.status().to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chatloom_completion::ScriptedProvider;
    use chatloom_core::ConversationStore;
    use chatloom_store::InMemoryConversationStore;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn app_with(
        provider: ScriptedProvider,
    ) -> (Router, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let state = Arc::new(AppState {
            orchestrator: CompletionOrchestrator::new(store.clone(), Arc::new(provider)),
            locks: ConversationLocks::new(),
            completion: CompletionConfig::default(),
            auth_token: Some(TOKEN.to_string()),
            stream_buffer: 4,
        });
        (build_router(state), store)
    }

    fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn chat_body(conversation_id: &str) -> Value {
        json!({
            "conversation_id": conversation_id,
            "user_id": "u1",
            "user_message": "Hi"
        })
    }

    #[tokio::test]
    async fn health_is_open() {
        let (app, _) = app_with(ScriptedProvider::new(["x"]));
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_requires_token() {
        let (app, _) = app_with(ScriptedProvider::new(["x"]));
        let missing = app
            .clone()
            .oneshot(post_json("/chat", chat_body("c1"), None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(post_json("/chat", chat_body("c1"), Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_returns_final_output_and_persists() {
        let (app, store) = app_with(ScriptedProvider::new(["Hel", "lo"]));
        let response = app
            .oneshot(post_json("/chat", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["conversation_id"], "c1");
        assert_eq!(body["content"], "Hello");

        let stored = store.find_by_id("c1").await.unwrap();
        assert_eq!(stored.messages().len(), 3);
    }

    #[tokio::test]
    async fn bearer_prefix_is_accepted_and_empty_id_is_generated() {
        let (app, store) = app_with(ScriptedProvider::new(["ok"]));
        let response = app
            .oneshot(post_json(
                "/chat",
                json!({"user_id": "u1", "user_message": "Hi"}),
                Some(&format!("Bearer {TOKEN}")),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        let id = body["conversation_id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert!(store.find_by_id(id).await.is_ok());
    }

    #[tokio::test]
    async fn provider_failure_maps_to_bad_gateway() {
        let (app, _) = app_with(ScriptedProvider::new(["x"]).failing_on_start());
        let response = app
            .oneshot(post_json("/chat", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["kind"], "provider");
    }

    #[tokio::test]
    async fn stream_emits_messages_then_done() {
        let (app, _) = app_with(ScriptedProvider::new(["Hel", "lo"]));
        let response = app
            .oneshot(post_json("/chat/stream", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_string(response).await;
        assert_eq!(text.matches("event: message").count(), 2);
        assert!(text.contains(r#""content":"Hel""#));
        assert!(text.contains(r#""content":"Hello""#));
        let done_at = text.find("event: done").unwrap();
        assert!(text.rfind("event: message").unwrap() < done_at);
    }

    #[tokio::test]
    async fn stream_reports_failure_as_error_event() {
        let (app, _) = app_with(ScriptedProvider::new(["a", "b"]).failing_after(1));
        let response = app
            .oneshot(post_json("/chat/stream", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        let text = body_string(response).await;
        assert!(text.contains("event: error"));
        assert!(!text.contains("event: done"));
    }

    #[tokio::test]
    async fn end_then_chat_conflicts() {
        let (app, _) = app_with(ScriptedProvider::new(["ok"]));
        let first = app
            .clone()
            .oneshot(post_json("/chat", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let ended = app
            .clone()
            .oneshot(post_json("/chat/c1/end", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(ended.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(ended).await).unwrap();
        assert_eq!(body["status"], "ended");

        let again = app
            .oneshot(post_json("/chat", chat_body("c1"), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn ending_unknown_conversation_is_not_found() {
        let (app, _) = app_with(ScriptedProvider::new(["ok"]));
        let response = app
            .oneshot(post_json("/chat/missing/end", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
