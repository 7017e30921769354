//! Config defaults: fills every unset field after loading.

use crate::schema::{
    ChatloomConfig, CompletionSettings, LoggingConfig, ProviderConfig, ServerConfig,
    StorageBackend, StorageConfig,
};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STREAM_BUFFER: usize = 32;
pub const DEFAULT_DB_FILE: &str = "chatloom.db";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MODEL_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 1.0;
pub const DEFAULT_N: u32 = 1;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: ChatloomConfig) -> ChatloomConfig {
    let config = apply_server_defaults(config);
    let config = apply_storage_defaults(config);
    let config = apply_provider_defaults(config);
    let config = apply_logging_defaults(config);
    apply_completion_defaults(config)
}

fn apply_server_defaults(mut config: ChatloomConfig) -> ChatloomConfig {
    let server = config.server.get_or_insert_with(ServerConfig::default);
    server.bind.get_or_insert_with(|| DEFAULT_BIND.to_string());
    server.port.get_or_insert(DEFAULT_PORT);
    server
        .request_timeout_secs
        .get_or_insert(DEFAULT_REQUEST_TIMEOUT_SECS);
    server.stream_buffer.get_or_insert(DEFAULT_STREAM_BUFFER);
    config
}

/// SQLite under the config directory unless told otherwise.
fn apply_storage_defaults(mut config: ChatloomConfig) -> ChatloomConfig {
    let storage = config.storage.get_or_insert_with(StorageConfig::default);
    storage.backend.get_or_insert(StorageBackend::Sqlite);
    if storage.path.is_none() {
        let path = crate::io::config_dir().join(DEFAULT_DB_FILE);
        storage.path = Some(path.to_string_lossy().into_owned());
    }
    config
}

fn apply_provider_defaults(mut config: ChatloomConfig) -> ChatloomConfig {
    let provider = config.provider.get_or_insert_with(ProviderConfig::default);
    provider
        .base_url
        .get_or_insert_with(|| DEFAULT_BASE_URL.to_string());
    config
}

fn apply_logging_defaults(mut config: ChatloomConfig) -> ChatloomConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging
        .level
        .get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.json.get_or_insert(false);
    config
}

fn apply_completion_defaults(mut config: ChatloomConfig) -> ChatloomConfig {
    let c = config
        .completion
        .get_or_insert_with(CompletionSettings::default);
    c.model.get_or_insert_with(|| DEFAULT_MODEL.to_string());
    c.model_max_tokens.get_or_insert(DEFAULT_MODEL_MAX_TOKENS);
    c.temperature.get_or_insert(DEFAULT_TEMPERATURE);
    c.top_p.get_or_insert(DEFAULT_TOP_P);
    c.n.get_or_insert(DEFAULT_N);
    c.max_tokens.get_or_insert(DEFAULT_MAX_TOKENS);
    c.presence_penalty.get_or_insert(0.0);
    c.frequency_penalty.get_or_insert(0.0);
    c.initial_system_message
        .get_or_insert_with(|| DEFAULT_SYSTEM_MESSAGE.to_string());
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_section() {
        let cfg = apply_all_defaults(ChatloomConfig::default());
        let server = cfg.server.unwrap();
        assert_eq!(server.port, Some(DEFAULT_PORT));
        assert_eq!(server.stream_buffer, Some(DEFAULT_STREAM_BUFFER));
        assert!(server.auth_token.is_none());

        let storage = cfg.storage.unwrap();
        assert_eq!(storage.backend, Some(StorageBackend::Sqlite));
        assert!(storage.path.unwrap().ends_with(DEFAULT_DB_FILE));

        let completion = cfg.completion.unwrap();
        assert_eq!(completion.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(completion.max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn does_not_override_user_values() {
        let cfg = ChatloomConfig {
            server: Some(ServerConfig {
                port: Some(9999),
                ..Default::default()
            }),
            completion: Some(CompletionSettings {
                temperature: Some(0.1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = apply_all_defaults(cfg);
        assert_eq!(cfg.server.unwrap().port, Some(9999));
        assert_eq!(cfg.completion.unwrap().temperature, Some(0.1));
    }
}
