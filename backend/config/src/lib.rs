//! `chatloom-config`: runtime configuration for the chatloom server.
//!
//! Provides:
//! - Typed config schema (server, storage, provider, logging, completion)
//! - YAML read/write
//! - `${ENV_VAR}` substitution and `CHATLOOM_*` overrides
//! - Default value application
//! - Validation and redaction for display

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{
    apply_env_overrides, apply_env_overrides_with, collect_referenced_vars, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use redact::redact;
pub use schema::{
    ChatloomConfig, CompletionSettings, LoggingConfig, ProviderConfig, ServerConfig,
    StorageBackend, StorageConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

/// Load a config file, substitute env vars, apply overrides and defaults.
///
/// This is the main entry point for loading a config at runtime. Validation
/// is left to the caller, which knows whether mock mode is on.
pub async fn load_and_prepare(path: &Path) -> Result<ChatloomConfig> {
    let raw = load_config(path).await?;
    prepare(raw, &std::env::vars().collect())
}

/// The pure half of [`load_and_prepare`].
pub fn prepare(raw: ChatloomConfig, env: &HashMap<String, String>) -> Result<ChatloomConfig> {
    let value = serde_json::to_value(&raw).context("Failed to serialize config for processing")?;
    let value = resolve_env_vars_with(&value, env).context("Failed to resolve env vars in config")?;
    let config: ChatloomConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    let config = apply_env_overrides_with(config, env)?;
    Ok(apply_all_defaults(config))
}
