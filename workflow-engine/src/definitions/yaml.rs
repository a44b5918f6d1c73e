//! YAML utilities for definition documents

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Clean YAML by removing a leading document separator and surrounding whitespace
pub fn clean_yaml(yaml: &str) -> String {
    yaml.trim().trim_start_matches("---").trim().to_string()
}

/// Parse YAML string into a typed structure with better error messages
///
/// Duplicate keys and syntax errors are logged with a preview of the
/// offending document before the error is returned.
pub fn parse_yaml<T: DeserializeOwned>(yaml: &str) -> Result<T> {
    serde_yaml::from_str(yaml).map_err(|e| {
        let message = e.to_string();
        if message.contains("duplicate") || message.contains("expected") {
            tracing::debug!(
                error = %message,
                preview = %yaml.chars().take(500).collect::<String>(),
                "YAML parsing error"
            );
        }
        anyhow!(e).context("Failed to parse YAML")
    })
}

/// Parse a document whose fields sit beneath a required top-level key
///
/// `workflow:`, `persona:` and `subagent:` documents all share this shape.
pub fn parse_wrapped<T: DeserializeOwned>(yaml: &str, key: &str) -> Result<T> {
    let document: serde_yaml::Value = parse_yaml(&clean_yaml(yaml))?;

    let inner = document
        .as_mapping()
        .and_then(|m| m.get(key))
        .cloned()
        .ok_or_else(|| anyhow!("missing required top-level `{}:` key", key))?;

    serde_yaml::from_value(inner).with_context(|| format!("Invalid `{}` document", key))
}

/// Read and parse a wrapped document from disk
pub fn read_wrapped<T: DeserializeOwned>(path: &Path, key: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_wrapped(&content, key).with_context(|| format!("Failed to load {}", path.display()))
}

/// Render an error chain on one line, outermost context first
pub fn describe_error(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
