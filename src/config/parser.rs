use std::path::Path;
use crate::errors::ScanlineError;
use super::types::{NotifierKind, ScanlineConfig};
use super::schema::CONFIG_SCHEMA;
use super::credentials::resolve_webhook_url;
use tracing::warn;

pub async fn parse_config(path: &Path) -> Result<ScanlineConfig, ScanlineError> {
    if !path.exists() {
        return Err(ScanlineError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > 1_048_576 {
        return Err(ScanlineError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

/// Parse the config file when given, defaults otherwise.
pub async fn load_config(path: Option<&Path>) -> Result<ScanlineConfig, ScanlineError> {
    match path {
        Some(path) => parse_config(path).await,
        None => Ok(ScanlineConfig::default()),
    }
}

pub fn parse_config_str(content: &str) -> Result<ScanlineConfig, ScanlineError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;

    // An empty file is a valid all-defaults config
    if yaml.is_null() {
        return Ok(ScanlineConfig::default());
    }

    // JSON Schema validation
    validate_schema(&yaml)?;

    // Parse into typed config
    let config: ScanlineConfig = serde_yaml::from_value(yaml)?;

    // Semantic conflict detection
    validate_conflicts(&config)?;

    Ok(config)
}

/// Validate config against the JSON schema for structural correctness.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), ScanlineError> {
    // Convert YAML value to JSON for schema validation
    let json_str = serde_json::to_string(yaml)
        .map_err(|e| ScanlineError::Config(format!("Config conversion error: {}", e)))?;
    let json_value: serde_json::Value = serde_json::from_str(&json_str)
        .map_err(|e| ScanlineError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| ScanlineError::Config(format!("Schema compilation error: {}", e)))?;

    let result = compiled.validate(&json_value);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        // Warn but don't fail; typed parsing below rejects real type errors
        for msg in &messages {
            warn!(validation_error = %msg, "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts in the parsed configuration.
pub fn validate_conflicts(config: &ScanlineConfig) -> Result<(), ScanlineError> {
    for (name, queue) in [("scan", &config.queues.scan), ("inspect", &config.queues.inspect)] {
        if queue.max_receive_count < 1 {
            return Err(ScanlineError::Config(format!(
                "queues.{}.max_receive_count must be at least 1", name
            )));
        }
        if queue.visibility_timeout_secs == 0 {
            return Err(ScanlineError::Config(format!(
                "queues.{}.visibility_timeout_secs must be positive", name
            )));
        }
    }

    // A scan that outlives its visibility window gets redelivered while still running
    if config.scanner.timeout_secs >= config.queues.scan.visibility_timeout_secs {
        return Err(ScanlineError::Config(format!(
            "scanner.timeout_secs ({}) must be below queues.scan.visibility_timeout_secs ({})",
            config.scanner.timeout_secs, config.queues.scan.visibility_timeout_secs
        )));
    }

    if config.schedule.reconcile_interval_secs > config.schedule.rescan_interval_secs {
        return Err(ScanlineError::Config(format!(
            "schedule.reconcile_interval_secs ({}) must not exceed schedule.rescan_interval_secs ({})",
            config.schedule.reconcile_interval_secs, config.schedule.rescan_interval_secs
        )));
    }

    if config.notifier.kind == NotifierKind::Webhook
        && resolve_webhook_url(config.notifier.webhook_url.as_deref()).is_none()
    {
        warn!("Webhook notifier configured but no URL set; set notifier.webhook_url or SCANLINE_WEBHOOK_URL");
    }

    Ok(())
}
