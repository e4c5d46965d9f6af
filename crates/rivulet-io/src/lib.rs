//! # Rivulet I/O
//!
//! Concrete sources and sinks for rivulet pipelines, plus the runner that
//! wires them together from a configuration document.
//!
//! Sources: streaming broker (`kafka`), HTTP intake (`http`), files
//! (`csv`, `jsonl`). Sinks: streaming broker (`kafka`), object storage
//! (`s3`), relational (`pgsql`, `mysql`), hosted queue (`sqs`), hosted
//! topic fan-out (`sns`). Variants are selected by the `type` strings in
//! the configuration; unknown names are configuration errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use rivulet_core::{Codec, Payload, Sink, Source, StreamError, StreamSpec, TargetSpec};
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub mod aws;
pub mod pipeline;
pub mod prefix;
pub mod schema;

mod hash;
mod sink_kafka;
mod sink_mysql;
mod sink_pgsql;
mod sink_s3;
mod sink_sns;
mod sink_sqs;
mod source_csv;
mod source_http;
mod source_jsonl;
mod source_kafka;

pub use sink_kafka::KafkaSink;
pub use sink_mysql::MysqlSink;
pub use sink_pgsql::PgsqlSink;
pub use sink_s3::S3Sink;
pub use sink_sns::SnsSink;
pub use sink_sqs::SqsSink;
pub use source_csv::CsvSource;
pub use source_http::HttpSource;
pub use source_jsonl::JsonlSource;
pub use source_kafka::KafkaSource;

pub const KAFKA_SOURCE: &str = "kafka";
pub const HTTP_SOURCE: &str = "http";
pub const CSV_SOURCE: &str = "csv";
pub const JSONL_SOURCE: &str = "jsonl";

pub const KAFKA_TARGET: &str = "kafka";
pub const S3_TARGET: &str = "s3";
pub const PGSQL_TARGET: &str = "pgsql";
pub const MYSQL_TARGET: &str = "mysql";
pub const SQS_TARGET: &str = "sqs";
pub const SNS_TARGET: &str = "sns";

/// Build a sink from its target specification.
pub fn build_sink(spec: &TargetSpec) -> Result<Arc<dyn Sink>, StreamError> {
    match spec.kind.as_str() {
        KAFKA_TARGET => Ok(Arc::new(KafkaSink::new(spec))),
        S3_TARGET => Ok(Arc::new(S3Sink::new(spec))),
        PGSQL_TARGET => Ok(Arc::new(PgsqlSink::new(spec))),
        MYSQL_TARGET => Ok(Arc::new(MysqlSink::new(spec))),
        SQS_TARGET => Ok(Arc::new(SqsSink::new(spec))),
        SNS_TARGET => Ok(Arc::new(SnsSink::new(spec))),
        other => Err(StreamError::UnknownTarget(other.to_string())),
    }
}

/// Build the source, handing it the already-built sinks. The HTTP source
/// additionally takes the shared router so the intake route serves next to
/// the health and metrics endpoints.
pub fn build_source(
    stream: &StreamSpec,
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    router: Option<Router>,
    cancel: CancellationToken,
) -> Result<Box<dyn Source>, StreamError> {
    let spec = &stream.instance.source;
    let codec = Codec::from_name(&spec.codec);

    match spec.kind.as_str() {
        KAFKA_SOURCE => Ok(Box::new(KafkaSource::new(
            spec.clone(),
            target,
            dlq,
            codec,
            cancel,
        ))),
        HTTP_SOURCE => Ok(Box::new(HttpSource::new(
            spec.clone(),
            target,
            dlq,
            codec,
            router.unwrap_or_default(),
            stream.port.clone(),
            cancel,
        ))),
        CSV_SOURCE => Ok(Box::new(CsvSource::new(spec.clone(), target, dlq, cancel))),
        JSONL_SOURCE => Ok(Box::new(JsonlSource::new(spec.clone(), target, dlq, cancel))),
        other => Err(StreamError::UnknownSource(other.to_string())),
    }
}

/// Initialize the target (fatal) and the DLQ (non-fatal: a DLQ that fails
/// its handshake is disabled for the run).
pub(crate) async fn initialize_sinks(
    target: &Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
) -> Result<Option<Arc<dyn Sink>>> {
    target.initialize().await?;

    match dlq {
        Some(sink) => match sink.initialize().await {
            Ok(()) => Ok(Some(sink)),
            Err(e) => {
                warn!("dlq disabled for this run: {e}");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Hand a rejected record to the DLQ sink, attach plus immediate flush.
/// DLQ trouble is logged, never propagated; the primary error already
/// governs the source's behavior.
pub(crate) async fn route_to_dlq(dlq: Option<&Arc<dyn Sink>>, key: &str, payload: &Payload) {
    let Some(sink) = dlq else {
        return;
    };

    if let Err(e) = sink.attach(key, payload).await {
        warn!("failed to attach event to dlq: {e}");
        return;
    }

    if let Err(e) = sink.flush().await {
        warn!("failed to flush dlq: {e}");
        return;
    }

    metrics::increment_counter!("rivulet_records_dead_lettered_total");
}

/// Files directly under `path` carrying `extension`; other entries are
/// warned about and skipped. One level only, no recursion.
pub(crate) fn list_files(path: &str, extension: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(path).with_context(|| format!("failed to read {path}"))? {
        let entry = entry.with_context(|| format!("failed to read {path}"))?;
        let entry_path = entry.path();

        if !entry_path.is_file() {
            continue;
        }

        match entry_path.extension().and_then(|e| e.to_str()) {
            Some(found) if found == extension => {
                files.push(entry_path.to_string_lossy().into_owned());
            }
            _ => warn!("invalid file {}", entry_path.display()),
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct Recorded {
        pub current: Vec<(String, Payload)>,
        pub batches: Vec<Vec<(String, Payload)>>,
        pub initialized: bool,
    }

    /// In-memory sink that records attach/flush traffic for source tests.
    pub(crate) struct RecordingSink {
        batch_size: usize,
        fail_attach: bool,
        pub inner: Mutex<Recorded>,
    }

    impl RecordingSink {
        pub(crate) fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                fail_attach: false,
                inner: Mutex::new(Recorded::default()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                batch_size: 0,
                fail_attach: true,
                inner: Mutex::new(Recorded::default()),
            }
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn kind(&self) -> &'static str {
            "recording"
        }

        async fn initialize(&self) -> Result<()> {
            self.inner.lock().unwrap().initialized = true;
            Ok(())
        }

        async fn attach(&self, key: &str, payload: &Payload) -> Result<()> {
            if self.fail_attach {
                bail!("attach rejected");
            }
            self.inner
                .lock()
                .unwrap()
                .current
                .push((key.to_string(), payload.clone()));
            Ok(())
        }

        async fn can_flush(&self) -> bool {
            let inner = self.inner.lock().unwrap();
            self.batch_size > 0 && inner.current.len() >= self.batch_size
        }

        async fn flush(&self) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.current.is_empty() {
                return Ok(());
            }
            let batch = std::mem::take(&mut inner.current);
            inner.batches.push(batch);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::spec::InstanceSpec;

    fn target(kind: &str) -> TargetSpec {
        TargetSpec {
            kind: kind.to_string(),
            specs: Default::default(),
        }
    }

    #[test]
    fn sink_factory_dispatches_on_type() {
        for kind in ["kafka", "s3", "pgsql", "mysql", "sqs", "sns"] {
            let sink = build_sink(&target(kind)).unwrap();
            assert_eq!(sink.kind(), kind);
        }
    }

    #[test]
    fn unknown_sink_type_is_an_error() {
        assert!(matches!(
            build_sink(&target("carrier-pigeon")),
            Err(StreamError::UnknownTarget(_))
        ));
    }

    #[test]
    fn unknown_source_type_is_an_error() {
        let stream = StreamSpec {
            instance: InstanceSpec {
                source: rivulet_core::SourceSpec {
                    kind: "carrier-pigeon".to_string(),
                    ..Default::default()
                },
                target: target("s3"),
                dlq: None,
            },
            ..Default::default()
        };

        let sink = build_sink(&stream.instance.target).unwrap();
        assert!(matches!(
            build_source(&stream, sink, None, None, CancellationToken::new()),
            Err(StreamError::UnknownSource(_))
        ));
    }

    #[test]
    fn source_factory_covers_every_variant() {
        for kind in [KAFKA_SOURCE, HTTP_SOURCE, CSV_SOURCE, JSONL_SOURCE] {
            let stream = StreamSpec {
                port: "9000".to_string(),
                instance: InstanceSpec {
                    source: rivulet_core::SourceSpec {
                        kind: kind.to_string(),
                        ..Default::default()
                    },
                    target: target("s3"),
                    dlq: None,
                },
                ..Default::default()
            };

            let sink = build_sink(&stream.instance.target).unwrap();
            assert!(build_source(&stream, sink, None, None, CancellationToken::new()).is_ok());
        }
    }
}
