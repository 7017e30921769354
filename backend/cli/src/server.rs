//! Wires config into store, provider and orchestrator, then serves HTTP.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chatloom_completion::{
    CompletionConfig, CompletionOrchestrator, ConversationLocks, OpenAiCompatibleProvider,
    ScriptedProvider, DEFAULT_BUFFER_SIZE,
};
use chatloom_config::{ChatloomConfig, CompletionSettings, StorageBackend};
use chatloom_core::{CompletionProvider, ConversationStore};
use chatloom_store::{InMemoryConversationStore, SqliteConversationStore};

use crate::api::{self, AppState};

const MOCK_DELTAS: &[&str] = &["Hello", " from", " chatloom", "."];

pub async fn run_server(config: ChatloomConfig, mock: bool) -> Result<()> {
    let server = config.server.clone().unwrap_or_default();
    let bind = server.bind.clone().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = server.port.unwrap_or(8080);

    info!(bind = %bind, port, mock, "Starting chatloom server");

    let store = build_store(&config)?;
    let provider = build_provider(&config, mock);
    let mut orchestrator = CompletionOrchestrator::new(store, provider);
    if let Some(secs) = server.request_timeout_secs {
        orchestrator = orchestrator.with_timeout(Duration::from_secs(secs));
    }

    if server.auth_token.as_deref().map(str::is_empty).unwrap_or(true) {
        warn!("No auth token configured; chat endpoints will reject every request");
    }

    let state = Arc::new(AppState {
        orchestrator,
        locks: ConversationLocks::new(),
        completion: completion_config(config.completion.as_ref()),
        auth_token: server.auth_token.clone(),
        stream_buffer: server.stream_buffer.unwrap_or(DEFAULT_BUFFER_SIZE),
    });

    let app = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_store(config: &ChatloomConfig) -> Result<Arc<dyn ConversationStore>> {
    let storage = config.storage.clone().unwrap_or_default();
    match storage.backend.unwrap_or(StorageBackend::Sqlite) {
        StorageBackend::Memory => {
            info!("Using in-memory conversation store");
            Ok(Arc::new(InMemoryConversationStore::new()))
        }
        StorageBackend::Sqlite => {
            let path = storage
                .path
                .context("storage.path is required for the sqlite backend")?;
            if let Some(parent) = Path::new(&path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory: {}", parent.display())
                    })?;
                }
            }
            Ok(Arc::new(SqliteConversationStore::open(&path)?))
        }
    }
}

fn build_provider(config: &ChatloomConfig, mock: bool) -> Arc<dyn CompletionProvider> {
    let provider = config.provider.clone().unwrap_or_default();
    if mock {
        let deltas = provider
            .mock_deltas
            .unwrap_or_else(|| MOCK_DELTAS.iter().map(|d| d.to_string()).collect());
        info!(deltas = deltas.len(), "Using scripted provider");
        return Arc::new(ScriptedProvider::new(deltas));
    }

    let mut openai = OpenAiCompatibleProvider::new(provider.api_key);
    if let Some(url) = provider.base_url {
        openai = openai.with_base_url(url);
    }
    info!(base_url = %openai.base_url(), "Using OpenAI-compatible provider");
    Arc::new(openai)
}

/// Server-wide generation settings; unset fields keep the library defaults.
pub fn completion_config(settings: Option<&CompletionSettings>) -> CompletionConfig {
    let mut config = CompletionConfig::default();
    let Some(s) = settings else { return config };
    if let Some(model) = &s.model {
        config.model = model.clone();
    }
    if let Some(v) = s.model_max_tokens {
        config.model_max_tokens = v;
    }
    if let Some(v) = s.temperature {
        config.temperature = v;
    }
    if let Some(v) = s.top_p {
        config.top_p = v;
    }
    if let Some(v) = s.n {
        config.n = v;
    }
    if !s.stop.is_empty() {
        config.stop = s.stop.clone();
    }
    if let Some(v) = s.max_tokens {
        config.max_tokens = v;
    }
    if let Some(v) = s.presence_penalty {
        config.presence_penalty = v;
    }
    if let Some(v) = s.frequency_penalty {
        config.frequency_penalty = v;
    }
    if let Some(msg) = &s.initial_system_message {
        config.initial_system_message = msg.clone();
    }
    config
}
