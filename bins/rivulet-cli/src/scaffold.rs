//! `generate` subcommand: assemble a skeleton configuration document from
//! flags that mirror the configuration tree and write it out as YAML.

use anyhow::{Context, Result};
use clap::Args;
use rivulet_core::spec::{
    Configurations, EndpointSpec, InstanceSpec, SourceSpec, SourceSpecs, StreamFile, StreamSpec,
    TargetSpec, TargetSpecs,
};
use rivulet_core::Value;
use tracing::warn;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Where the generated document is written
    #[arg(long = "export-path", default_value = "pipeline.yaml")]
    pub export_path: String,

    /// HTTP server port
    #[arg(long = "port", default_value = "8080")]
    pub port: String,

    #[arg(long = "instance.source.type", default_value = "", help = "instance source type")]
    pub source_type: String,

    #[arg(long = "instance.source.codec", default_value = "", help = "decode events with this codec (json, yaml, xml)")]
    pub source_codec: String,

    #[arg(long = "instance.source.specs.topic", default_value = "", help = "instance source topic name")]
    pub source_topic: String,

    #[arg(long = "instance.source.specs.timeoutMs", default_value_t = 1000, help = "instance source poll timeout")]
    pub source_timeout_ms: u64,

    #[arg(long = "instance.source.specs.path", default_value = "", help = "file or directory to scan")]
    pub source_path: String,

    #[arg(long = "instance.source.specs.endpoint", default_value = "", help = "http intake path")]
    pub source_endpoint: String,

    #[arg(long = "instance.source.specs.method", default_value = "", help = "comma-separated http methods")]
    pub source_method: String,

    #[arg(long = "instance.source.specs.configurations", help = "instance source configurations (key=value, repeatable)")]
    pub source_configurations: Vec<String>,

    #[arg(long = "instance.target.type", default_value = "", help = "target type")]
    pub target_type: String,

    #[arg(long = "instance.target.specs.database", default_value = "", help = "database name")]
    pub target_database: String,

    #[arg(long = "instance.target.specs.table", default_value = "", help = "table name")]
    pub target_table: String,

    #[arg(long = "instance.target.specs.keyColumnName", default_value = "", help = "key column name")]
    pub target_key_column: String,

    #[arg(long = "instance.target.specs.topic", default_value = "", help = "topic name")]
    pub target_topic: String,

    #[arg(long = "instance.target.specs.topicArn", default_value = "", help = "topic arn")]
    pub target_topic_arn: String,

    #[arg(long = "instance.target.specs.queue", default_value = "", help = "queue name")]
    pub target_queue: String,

    #[arg(long = "instance.target.specs.queueUrl", default_value = "", help = "queue url")]
    pub target_queue_url: String,

    #[arg(long = "instance.target.specs.bucket", default_value = "", help = "bucket name")]
    pub target_bucket: String,

    #[arg(long = "instance.target.specs.prefix", default_value = "", help = "object key prefix, calendar tokens allowed")]
    pub target_prefix: String,

    #[arg(long = "instance.target.specs.codec", default_value = "", help = "serialize events with this codec before sending (json, yaml, xml)")]
    pub target_codec: String,

    #[arg(long = "instance.target.specs.lineBreak", default_value = "", help = "record separator for uploaded objects")]
    pub target_line_break: String,

    #[arg(long = "instance.target.specs.batchSize", default_value_t = 100, help = "batch size")]
    pub target_batch_size: usize,

    #[arg(long = "instance.target.specs.bufferSize", default_value_t = 1048576, help = "buffer size")]
    pub target_buffer_size: u64,

    #[arg(long = "instance.target.specs.delaySeconds", default_value_t = 1, help = "queue delivery delay")]
    pub target_delay_seconds: i32,

    #[arg(long = "instance.target.specs.flushInMilliseconds", default_value_t = 10000, help = "milliseconds to flush events")]
    pub target_flush_in_milliseconds: u64,

    #[arg(long = "instance.target.specs.configurations", help = "instance target configurations (key=value, repeatable)")]
    pub target_configurations: Vec<String>,
}

pub fn run(args: &GenerateArgs) -> Result<()> {
    let file = assemble(args);

    let scaffold = serde_yaml::to_string(&file).context("failed to serialize yaml")?;
    std::fs::write(&args.export_path, &scaffold)
        .with_context(|| format!("failed to create file {}", args.export_path))?;

    println!(
        "generated scaffold\npath: {}\n-------\n{scaffold}-------",
        args.export_path
    );

    Ok(())
}

fn assemble(args: &GenerateArgs) -> StreamFile {
    StreamFile {
        stream: StreamSpec {
            port: args.port.clone(),
            health_check: EndpointSpec {
                endpoint: "/health".to_string(),
            },
            metrics: EndpointSpec {
                endpoint: "/metrics".to_string(),
            },
            instance: InstanceSpec {
                source: SourceSpec {
                    kind: args.source_type.clone(),
                    codec: args.source_codec.clone(),
                    specs: SourceSpecs {
                        topic: args.source_topic.clone(),
                        timeout_ms: args.source_timeout_ms,
                        path: args.source_path.clone(),
                        endpoint: args.source_endpoint.clone(),
                        method: args.source_method.clone(),
                        configurations: parse_configurations(&args.source_configurations),
                    },
                },
                target: TargetSpec {
                    kind: args.target_type.clone(),
                    specs: TargetSpecs {
                        database: args.target_database.clone(),
                        table: args.target_table.clone(),
                        key_column_name: args.target_key_column.clone(),
                        topic: args.target_topic.clone(),
                        queue: args.target_queue.clone(),
                        queue_url: args.target_queue_url.clone(),
                        topic_arn: args.target_topic_arn.clone(),
                        bucket: args.target_bucket.clone(),
                        prefix: args.target_prefix.clone(),
                        codec: args.target_codec.clone(),
                        batch_size: args.target_batch_size,
                        buffer_size: args.target_buffer_size,
                        line_break: args.target_line_break.clone(),
                        flush_in_milliseconds: args.target_flush_in_milliseconds,
                        delay_seconds: args.target_delay_seconds,
                        configurations: parse_configurations(&args.target_configurations),
                    },
                },
                dlq: None,
            },
        },
    }
}

fn parse_configurations(pairs: &[String]) -> Configurations {
    let mut configurations = Configurations::new();

    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                configurations.insert(key.to_string(), Value::String(value.to_string()));
            }
            _ => warn!("failed to set configuration: {pair}"),
        }
    }

    configurations
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: GenerateArgs,
    }

    #[test]
    fn scaffold_round_trips_through_yaml() {
        let harness = Harness::parse_from([
            "generate",
            "--instance.source.type",
            "kafka",
            "--instance.source.specs.topic",
            "topic.source",
            "--instance.source.specs.configurations",
            "group.id=rivulet",
            "--instance.source.specs.configurations",
            "bootstrap.servers=localhost:9093",
            "--instance.target.type",
            "s3",
            "--instance.target.specs.bucket",
            "events",
            "--instance.target.specs.batchSize",
            "250",
        ]);

        let file = assemble(&harness.args);
        let yaml = serde_yaml::to_string(&file).unwrap();
        let parsed: StreamFile = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.stream.port, "8080");
        assert_eq!(parsed.stream.instance.source.kind, "kafka");
        assert_eq!(parsed.stream.instance.source.specs.topic, "topic.source");
        assert_eq!(
            parsed.stream.instance.source.specs.configurations["group.id"],
            Value::String("rivulet".to_string())
        );
        assert_eq!(parsed.stream.instance.target.kind, "s3");
        assert_eq!(parsed.stream.instance.target.specs.bucket, "events");
        assert_eq!(parsed.stream.instance.target.specs.batch_size, 250);
        assert!(parsed.stream.instance.dlq.is_none());
    }

    #[test]
    fn malformed_pairs_are_skipped() {
        let configurations =
            parse_configurations(&["a=1".to_string(), "nonsense".to_string(), "=x".to_string()]);
        assert_eq!(configurations.len(), 1);
        assert_eq!(configurations["a"], Value::String("1".to_string()));
    }

    #[test]
    fn generate_writes_the_export_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");

        let harness = Harness::parse_from([
            "generate",
            "--export-path",
            path.to_str().unwrap(),
            "--instance.source.type",
            "jsonl",
            "--instance.source.specs.path",
            "./events",
            "--instance.target.type",
            "sqs",
            "--instance.target.specs.queueUrl",
            "https://sqs.us-east-1.amazonaws.com/1/queue",
        ]);

        run(&harness.args).unwrap();

        let written: StreamFile =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.stream.instance.source.kind, "jsonl");
        assert_eq!(
            written.stream.instance.target.specs.queue_url,
            "https://sqs.us-east-1.amazonaws.com/1/queue"
        );
    }
}
