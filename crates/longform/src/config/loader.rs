use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "maxConcurrentJobs must be at least 1".to_string(),
        });
    }

    if config.retry.max_backoff_ms < config.retry.initial_backoff_ms {
        return Err(ConfigError::Validation {
            message: "retry.maxBackoffMs must not be below retry.initialBackoffMs".to_string(),
        });
    }

    let pipeline = &config.pipeline;
    if !(0.0..1.0).contains(&pipeline.word_tolerance) {
        return Err(ConfigError::Validation {
            message: format!(
                "pipeline.wordTolerance must be in [0, 1), got {}",
                pipeline.word_tolerance
            ),
        });
    }
    if pipeline.section_ceiling_ratio < 1.0 {
        return Err(ConfigError::Validation {
            message: "pipeline.sectionCeilingRatio must be at least 1.0".to_string(),
        });
    }
    if pipeline.field_ceiling_chars < 1_000 {
        return Err(ConfigError::Validation {
            message: "pipeline.fieldCeilingChars must be at least 1000".to_string(),
        });
    }

    Ok(())
}
