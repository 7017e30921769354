//! Environment handling for config values.
//!
//! Two passes: `${VAR_NAME}` substitution inside string values (uppercase
//! names only, `$${VAR}` escapes to a literal `${VAR}`), then fixed
//! `CHATLOOM_*` / `OPENAI_*` overrides applied to the typed config.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::schema::{ChatloomConfig, LoggingConfig, ProviderConfig, ServerConfig, StorageConfig};

/// Uppercase env var reference, with an optional leading `$` escape.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references using the process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute `${VAR}` references using the given map.
///
/// Fails on the first reference to an unset or empty variable.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Collect all env var names referenced in a config value tree.
pub fn collect_referenced_vars(value: &Value) -> Vec<String> {
    let mut vars = Vec::new();
    collect_vars_recursive(value, &mut vars);
    vars.sort();
    vars.dedup();
    vars
}

fn collect_vars_recursive(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in ENV_VAR_PATTERN.captures_iter(s) {
                if caps[1].is_empty() {
                    out.push(caps[2].to_string());
                }
            }
        }
        Value::Array(arr) => arr.iter().for_each(|v| collect_vars_recursive(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_vars_recursive(v, out)),
        _ => {}
    }
}

/// Apply `CHATLOOM_*`, `OPENAI_*` and `RUST_LOG` overrides from the process
/// environment.
pub fn apply_env_overrides(config: ChatloomConfig) -> Result<ChatloomConfig> {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

pub fn apply_env_overrides_with(
    mut config: ChatloomConfig,
    env: &HashMap<String, String>,
) -> Result<ChatloomConfig> {
    let get = |key: &str| env.get(key).filter(|v| !v.is_empty()).cloned();

    if let Some(bind) = get("CHATLOOM_BIND") {
        config.server.get_or_insert_with(ServerConfig::default).bind = Some(bind);
    }
    if let Some(port) = get("CHATLOOM_PORT") {
        let port = port
            .parse::<u16>()
            .with_context(|| format!("CHATLOOM_PORT is not a valid port: {port}"))?;
        config.server.get_or_insert_with(ServerConfig::default).port = Some(port);
    }
    if let Some(token) = get("CHATLOOM_AUTH_TOKEN") {
        config.server.get_or_insert_with(ServerConfig::default).auth_token = Some(token);
    }
    if let Some(path) = get("CHATLOOM_DB") {
        config.storage.get_or_insert_with(StorageConfig::default).path = Some(path);
    }
    if let Some(key) = get("OPENAI_API_KEY") {
        config.provider.get_or_insert_with(ProviderConfig::default).api_key = Some(key);
    }
    if let Some(url) = get("OPENAI_BASE_URL") {
        config.provider.get_or_insert_with(ProviderConfig::default).base_url = Some(url);
    }
    if let Some(level) = get("RUST_LOG") {
        config.logging.get_or_insert_with(LoggingConfig::default).level = Some(level);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_nested_and_array_values() {
        let v = json!({"provider": {"apiKey": "${OPENAI_API_KEY}"}, "stop": ["${STOP}"]});
        let env = env(&[("OPENAI_API_KEY", "sk-abc123"), ("STOP", "###")]);
        let result = resolve_env_vars_with(&v, &env).unwrap();
        assert_eq!(result["provider"]["apiKey"], "sk-abc123");
        assert_eq!(result["stop"][0], "###");
    }

    #[test]
    fn missing_var_names_path() {
        let v = json!({"server": {"authToken": "${MISSING_VAR}"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("MISSING_VAR"));
        assert!(msg.contains("server.authToken"));
    }

    #[test]
    fn escaped_reference_is_literal() {
        let v = json!({"k": "pre $${HOME_DIR} post"});
        let result = resolve_env_vars_with(&v, &HashMap::new()).unwrap();
        assert_eq!(result["k"], "pre ${HOME_DIR} post");
    }

    #[test]
    fn collects_only_unescaped_vars() {
        let v = json!({"a": "${FOO}", "b": {"c": "${BAR} $${SKIP}"}});
        assert_eq!(collect_referenced_vars(&v), vec!["BAR", "FOO"]);
    }

    #[test]
    fn overrides_apply_to_typed_config() {
        let env = env(&[
            ("CHATLOOM_PORT", "9090"),
            ("CHATLOOM_DB", "/tmp/x.db"),
            ("OPENAI_API_KEY", "sk-1"),
            ("CHATLOOM_BIND", ""),
        ]);
        let cfg = apply_env_overrides_with(ChatloomConfig::default(), &env).unwrap();
        let server = cfg.server.unwrap();
        assert_eq!(server.port, Some(9090));
        assert!(server.bind.is_none());
        assert_eq!(cfg.storage.unwrap().path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(cfg.provider.unwrap().api_key.as_deref(), Some("sk-1"));
    }

    #[test]
    fn bad_port_override_fails() {
        let env = env(&[("CHATLOOM_PORT", "not-a-port")]);
        assert!(apply_env_overrides_with(ChatloomConfig::default(), &env).is_err());
    }
}
