//! `chatloom config` subcommands.

use std::path::Path;

use anyhow::{bail, Context, Result};

use chatloom_config::{redact, validate, write_config, ChatloomConfig};

/// Validate a prepared config, print the report and the redacted config.
pub fn check(config: &ChatloomConfig, mock: bool) -> Result<()> {
    let report = validate(config, mock);
    for warning in &report.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &report.errors {
        println!("error:   {}: {}", error.path, error.message);
    }
    show(config)?;
    if !report.is_valid() {
        bail!("config has {} error(s)", report.errors.len());
    }
    println!("config OK");
    Ok(())
}

/// Print the config as YAML with secrets masked.
pub fn show(config: &ChatloomConfig) -> Result<()> {
    let value = serde_json::to_value(config).context("Failed to serialize config")?;
    let yaml = serde_yaml::to_string(&redact(&value)).context("Failed to render config")?;
    println!("{yaml}");
    Ok(())
}

/// Write a starter config file. Refuses to overwrite unless `force`.
pub async fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let starter = chatloom_config::apply_all_defaults(ChatloomConfig::default());
    write_config(&starter, path).await?;
    println!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatloom_config::{apply_all_defaults, load_config};

    #[tokio::test]
    async fn init_writes_loadable_file_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        init(&path, false).await.unwrap();
        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded.server.unwrap().port, Some(8080));
        assert!(init(&path, false).await.is_err());
        assert!(init(&path, true).await.is_ok());
    }

    #[test]
    fn check_fails_on_invalid_config() {
        let mut cfg = apply_all_defaults(ChatloomConfig::default());
        if let Some(server) = cfg.server.as_mut() {
            server.stream_buffer = Some(0);
        }
        assert!(check(&cfg, true).is_err());
    }
}
