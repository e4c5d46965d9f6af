//! Configuration tree for a pipeline, deserialized from a `stream:`-rooted
//! YAML document, plus the builder the CLI uses to load and override it.
//!
//! Field names follow the document's camelCase spelling. Every leaf is
//! defaulted so partial documents (and the `generate` scaffold) stay valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{StreamError, Value};

/// Free-form per-variant settings (`configurations:` maps in the document).
pub type Configurations = serde_json::Map<String, Value>;

/// Root of the configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFile {
    #[serde(default)]
    pub stream: StreamSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSpec {
    /// HTTP port for the embedded endpoints and the http-intake source.
    #[serde(default)]
    pub port: String,
    #[serde(default, rename = "healthCheck")]
    pub health_check: EndpointSpec,
    #[serde(default)]
    pub metrics: EndpointSpec,
    #[serde(default)]
    pub instance: InstanceSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSpec {
    #[serde(default)]
    pub endpoint: String,
}

/// One pipeline: exactly one source, one target, optionally a dead-letter
/// target the source can route rejected records to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceSpec {
    #[serde(default)]
    pub source: SourceSpec,
    #[serde(default)]
    pub target: TargetSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq: Option<TargetSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub specs: SourceSpecs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSpecs {
    /// Broker sources: comma-separated topic list.
    #[serde(default)]
    pub topic: String,
    /// Broker sources: poll timeout in milliseconds.
    #[serde(default, rename = "timeoutMs")]
    pub timeout_ms: u64,
    /// File sources: file or directory to scan.
    #[serde(default)]
    pub path: String,
    /// HTTP source: intake path.
    #[serde(default)]
    pub endpoint: String,
    /// HTTP source: comma-separated method list (default `GET,POST`).
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub configurations: Configurations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub specs: TargetSpecs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetSpecs {
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub table: String,
    #[serde(default, rename = "keyColumnName")]
    pub key_column_name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub queue: String,
    #[serde(default, rename = "queueUrl")]
    pub queue_url: String,
    #[serde(default, rename = "topicArn")]
    pub topic_arn: String,
    #[serde(default)]
    pub bucket: String,
    /// Object-storage key prefix; may contain `%{YEAR}`-style tokens.
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub codec: String,
    /// Flush when the buffered record count reaches this (0 = unset).
    #[serde(default, rename = "batchSize")]
    pub batch_size: usize,
    /// Flush when the buffered byte count reaches this (0 = unset).
    /// Takes precedence over `batchSize` where both are set.
    #[serde(default, rename = "bufferSize")]
    pub buffer_size: u64,
    /// Separator between records in an uploaded object (default `\n`).
    #[serde(default, rename = "lineBreak")]
    pub line_break: String,
    /// Accepted but without runtime behavior; see DESIGN.md.
    #[serde(default, rename = "flushInMilliseconds")]
    pub flush_in_milliseconds: u64,
    /// Queue sinks: per-entry delivery delay.
    #[serde(default, rename = "delaySeconds")]
    pub delay_seconds: i32,
    #[serde(default)]
    pub configurations: Configurations,
}

impl TargetSpecs {
    /// `lineBreak` with its default applied.
    pub fn line_break_or_default(&self) -> &str {
        if self.line_break.is_empty() {
            "\n"
        } else {
            &self.line_break
        }
    }

    /// `keyColumnName` with its default applied.
    pub fn key_column_or_default(&self) -> &str {
        if self.key_column_name.is_empty() {
            "id"
        } else {
            &self.key_column_name
        }
    }
}

/// Look up a string-valued entry in a `configurations` map.
pub fn config_str<'a>(configurations: &'a Configurations, key: &str) -> Option<&'a str> {
    configurations.get(key).and_then(Value::as_str)
}

/// Look up an integer-valued entry in a `configurations` map.
pub fn config_u64(configurations: &Configurations, key: &str) -> Option<u64> {
    configurations.get(key).and_then(Value::as_u64)
}

/// Render a configuration value the way broker client properties expect:
/// scalars as their plain text, everything else as JSON.
pub fn config_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Loads the YAML configuration file and applies CLI overrides.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    file_path: String,
    http_port: String,
    liveness: bool,
    metrics: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_file(&mut self, path: impl Into<String>) -> &mut Self {
        self.file_path = path.into();
        self
    }

    pub fn set_port(&mut self, port: impl Into<String>) -> &mut Self {
        self.http_port = port.into();
        self
    }

    pub fn enable_liveness(&mut self) -> &mut Self {
        self.liveness = true;
        self
    }

    pub fn enable_metrics(&mut self) -> &mut Self {
        self.metrics = true;
        self
    }

    pub fn liveness_enabled(&self) -> bool {
        self.liveness
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics
    }

    /// Validate the extension, read the file, deserialize the document and
    /// apply the port override.
    pub fn build(&self) -> Result<StreamSpec, StreamError> {
        self.validate_extension()?;

        let content = std::fs::read_to_string(&self.file_path)
            .map_err(|_| StreamError::UnreadableFile(self.file_path.clone()))?;

        let file: StreamFile = serde_yaml::from_str(&content)
            .map_err(|e| StreamError::MalformedConfig(self.file_path.clone(), e))?;

        let mut stream = file.stream;
        if !self.http_port.is_empty() {
            stream.port = self.http_port.clone();
        }

        Ok(stream)
    }

    fn validate_extension(&self) -> Result<(), StreamError> {
        match Path::new(&self.file_path).extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Ok(()),
            _ => Err(StreamError::InvalidExtension(self.file_path.clone())),
        }
    }
}
