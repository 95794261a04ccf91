//! YAML configuration loader for the radiosonde ingester.
//!
//! Supports environment variable substitution using `${VAR}` and
//! `${VAR:-default}` syntax before parsing.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::config::IngesterConfig;

/// Load, expand and validate an ingester YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IngesterConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read ingester config from {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid ingester config {:?}", path))
}

/// Parse configuration text.
pub fn parse_config(content: &str) -> Result<IngesterConfig> {
    let expanded = expand_env_vars(content)?;
    let config: IngesterConfig =
        serde_yaml::from_str(&expanded).context("Failed to parse ingester config YAML")?;
    config.validate()?;
    Ok(config)
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("Unclosed variable substitution: ${{{after}"))?;
        result.push_str(&resolve_var_expr(&after[..end])?);
        rest = &after[end + 1..];
    }
    result.push_str(rest);

    Ok(result)
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sounding_ingest::ReportFormat;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("RADIOSONDE_TEST_SPOOL", "/spool");
        let result = expand_env_vars("dir: ${RADIOSONDE_TEST_SPOOL}/gisc").unwrap();
        assert_eq!(result, "dir: /spool/gisc");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("RADIOSONDE_TEST_UNSET");
        let result = expand_env_vars("value_${RADIOSONDE_TEST_UNSET:-14}_end").unwrap();
        assert_eq!(result, "value_14_end");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        std::env::remove_var("RADIOSONDE_TEST_REQUIRED");
        assert!(expand_env_vars("${RADIOSONDE_TEST_REQUIRED}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
destdir: /data/radiosonde
stations: /etc/radiosonde/stations.json
lock_dir: /run/lock
lock_timeout_secs: 600
poll_interval_secs: 10
channels:
  - name: gisc
    spool_dir: /spool/gisc
  - name: madis
    spool_dir: /spool/madis
    format: fm35
processing:
  hstep: 50.0
  retention_days: ${RADIOSONDE_TEST_RETENTION:-7}
  workers: 2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.lock_timeout_secs, 600.0);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[1].format, Some(ReportFormat::Fm35));
        assert_eq!(config.processing.hstep, 50.0);
        assert_eq!(config.processing.retention_days, 7);
        assert!(config.processing.compress);
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        assert!(parse_config("poll_interval_secs: -1").is_err());
        assert!(parse_config("processing:\n  retention_days: 0").is_err());
        assert!(parse_config("channels: [{name: x}]").is_err());
    }
}
