//! Config validation: field-level checks with user-friendly messages.

use thiserror::Error;

use crate::schema::{ChatloomConfig, StorageBackend};

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// All errors and warnings found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
///
/// `mock` relaxes the provider checks: the scripted provider needs no key.
pub fn validate(config: &ChatloomConfig, mock: bool) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_storage(config, &mut report);
    if !mock {
        validate_provider(config, &mut report);
    }
    validate_completion(config, &mut report);
    report
}

fn validate_server(config: &ChatloomConfig, report: &mut ValidationReport) {
    let Some(server) = &config.server else { return };
    if server.port == Some(0) {
        report.error("server.port", "port must be > 0");
    }
    if server.request_timeout_secs == Some(0) {
        report.error("server.requestTimeoutSecs", "request timeout must be > 0");
    }
    if server.stream_buffer == Some(0) {
        report.error("server.streamBuffer", "stream buffer must be >= 1");
    }
    if server.auth_token.as_deref().map(str::is_empty).unwrap_or(true) {
        report.warn(
            "server.authToken",
            "No auth token configured; every request will be rejected",
        );
    }
}

fn validate_storage(config: &ChatloomConfig, report: &mut ValidationReport) {
    let Some(storage) = &config.storage else { return };
    if storage.backend == Some(StorageBackend::Sqlite)
        && storage.path.as_deref().map(str::is_empty).unwrap_or(true)
    {
        report.error("storage.path", "SQLite storage requires a database path");
    }
}

fn validate_provider(config: &ChatloomConfig, report: &mut ValidationReport) {
    let Some(provider) = &config.provider else {
        report.error("provider", "No provider configured");
        return;
    };
    match provider.base_url.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
        Some(url) => report.error(
            "provider.baseUrl",
            format!("'{url}' is not an http(s) URL"),
        ),
        None => report.error("provider.baseUrl", "Provider base URL is required"),
    }
    if provider.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
        report.warn(
            "provider.apiKey",
            "No API key configured; requests are sent unauthenticated",
        );
    }
}

fn validate_completion(config: &ChatloomConfig, report: &mut ValidationReport) {
    let Some(c) = &config.completion else { return };
    if c.model.as_deref().map(str::trim).map(str::is_empty).unwrap_or(false) {
        report.error("completion.model", "model name cannot be empty");
    }
    if c.model_max_tokens == Some(0) {
        report.error("completion.modelMaxTokens", "context budget must be > 0");
    }
    if c.max_tokens == Some(0) {
        report.error("completion.maxTokens", "maxTokens must be > 0");
    }
    if c.n == Some(0) {
        report.error("completion.n", "n must be > 0");
    }
    if let Some(t) = c.temperature {
        if !(0.0..=2.0).contains(&t) {
            report.error("completion.temperature", "temperature must be within [0, 2]");
        }
    }
    if let Some(p) = c.top_p {
        if !(0.0..=1.0).contains(&p) {
            report.error("completion.topP", "topP must be within [0, 1]");
        }
    }
    for (path, value) in [
        ("completion.presencePenalty", c.presence_penalty),
        ("completion.frequencyPenalty", c.frequency_penalty),
    ] {
        if let Some(v) = value {
            if !(-2.0..=2.0).contains(&v) {
                report.error(path, "penalty must be within [-2, 2]");
            }
        }
    }
    if let (Some(budget), Some(cap)) = (c.model_max_tokens, c.max_tokens) {
        if cap >= budget {
            report.warn(
                "completion.maxTokens",
                "output cap is not smaller than the context budget",
            );
        }
    }
}
