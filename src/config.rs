use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{counter::StaticEndpoints, live::Location};

const SCHEMA_FILE: &str = "livegov.schema.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub engine: EngineConfig,
    /// JSON5 policy document installed at startup.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// Endpoint lists the counter cleaner reconciles against.
    #[serde(default)]
    pub endpoints: Vec<StaticEndpoints>,
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

fn default_cleanup_interval_ms() -> u64 {
    60_000
}

fn default_drain_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Wait applied to rate limits that do not set `max_wait_ms`.
    #[serde(default)]
    pub rate_limit_timeout_ms: u64,
    /// Wait applied to concurrency limits that do not set `max_wait_ms`.
    #[serde(default)]
    pub concurrency_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval_ms(),
            rate_limit_timeout_ms: 0,
            concurrency_timeout_ms: 0,
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Config {
    /// Reads a JSON5 config, checks it against its schema and resolves
    /// relative paths against the config file's directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let value: Value = json5::from_str(&text)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema = load_schema(&schema_path(base, &value)?)?;
        validate(&schema, &value)?;

        let mut config: Config =
            serde_json::from_value(value).context("failed to deserialize config")?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if let Some(policy_path) = self.policy_path.as_mut()
            && policy_path.is_relative()
        {
            *policy_path = base.join(&*policy_path);
        }
        if self.logging.dir.is_relative() {
            self.logging.dir = base.join(&self.logging.dir);
        }
    }
}

/// `$schema` from the document when present, else `livegov.schema.json` beside it.
fn schema_path(base: &Path, value: &Value) -> Result<PathBuf> {
    match value.get("$schema").and_then(Value::as_str) {
        Some(declared) => Ok(base.join(declared)),
        None => {
            let beside = base.join(SCHEMA_FILE);
            if beside.exists() {
                Ok(beside)
            } else {
                Err(anyhow!(
                    "no schema for config: set $schema or place {SCHEMA_FILE} next to it"
                ))
            }
        }
    }
}

fn load_schema(path: &Path) -> Result<JSONSchema> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema {}", path.display()))?;
    let schema: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse schema {}", path.display()))?;
    JSONSchema::compile(&schema).map_err(|err| anyhow!("invalid schema {}: {err}", path.display()))
}

fn validate(schema: &JSONSchema, value: &Value) -> Result<()> {
    schema.validate(value).map_err(|errors| {
        let messages: Vec<String> = errors
            .map(|error| format!("{}: {error}", error.instance_path))
            .collect();
        anyhow!("config validation failed: {}", messages.join("; "))
    })
}
