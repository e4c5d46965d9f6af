//! Line-delimited JSON file source: one line, one record, keyed by the MD5
//! of the line bytes. Malformed lines are logged and skipped so one bad
//! record does not strand the rest of the file.

use std::io::{BufRead, BufReader};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rivulet_core::{Payload, Sink, Source, SourceSpec};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::hash::md5_hex;
use crate::{list_files, route_to_dlq};

pub struct JsonlSource {
    spec: SourceSpec,
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    cancel: CancellationToken,
}

impl JsonlSource {
    pub fn new(
        spec: SourceSpec,
        target: Arc<dyn Sink>,
        dlq: Option<Arc<dyn Sink>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            target,
            dlq,
            cancel,
        }
    }

    async fn process_file(&self, filename: &str) -> Result<()> {
        let file = std::fs::File::open(filename)
            .with_context(|| format!("failed to load jsonl file {filename}"))?;

        for line in BufReader::new(file).lines() {
            if self.cancel.is_cancelled() {
                break;
            }

            let line = line.with_context(|| format!("failed to read jsonl file {filename}"))?;
            if line.is_empty() {
                continue;
            }

            let payload: Payload = match serde_json::from_str(&line) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("failed to deserialize line: {e}");
                    continue;
                }
            };

            let key = md5_hex(line.as_bytes());
            metrics::increment_counter!("rivulet_records_received_total", "source" => "jsonl");

            if let Err(e) = self.target.attach(&key, &payload).await {
                error!("failed to attach content: {e}");
                if self.dlq.is_some() {
                    route_to_dlq(self.dlq.as_ref(), &key, &payload).await;
                    continue;
                }
                return Err(e);
            }

            if !self.target.can_flush().await {
                continue;
            }

            self.target
                .flush()
                .await
                .map_err(|e| anyhow!("failed to flush event: {e}"))?;
        }

        self.target
            .flush()
            .await
            .map_err(|e| anyhow!("failed to flush event: {e}"))
    }
}

#[async_trait]
impl Source for JsonlSource {
    async fn worker(&mut self) -> Result<()> {
        self.dlq = crate::initialize_sinks(&self.target, self.dlq.take()).await?;

        let path = &self.spec.specs.path;
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("jsonl file/directory {path} not found"))?;

        if meta.is_dir() {
            for file in list_files(path, "jsonl")? {
                self.process_file(&file).await?;
            }
            return Ok(());
        }

        self.process_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use rivulet_core::{SourceSpecs, Value};
    use std::io::Write;

    fn spec_for(path: &str) -> SourceSpec {
        SourceSpec {
            kind: "jsonl".to_string(),
            codec: String::new(),
            specs: SourceSpecs {
                path: path.to_string(),
                ..SourceSpecs::default()
            },
        }
    }

    #[tokio::test]
    async fn batches_split_at_the_threshold() {
        let mut file = tempfile::NamedTempFile::with_suffix(".jsonl").unwrap();
        writeln!(file, "{{\"id\":\"a\"}}").unwrap();
        writeln!(file, "{{\"id\":\"b\"}}").unwrap();
        writeln!(file, "{{\"id\":\"c\"}}").unwrap();

        let sink = Arc::new(RecordingSink::new(2));
        let mut source = JsonlSource::new(
            spec_for(file.path().to_str().unwrap()),
            sink.clone(),
            None,
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = sink.inner.lock().unwrap();
        assert_eq!(recorded.batches.len(), 2);
        assert_eq!(recorded.batches[0].len(), 2);
        assert_eq!(recorded.batches[1].len(), 1);

        assert_eq!(
            recorded.batches[0][0].1.get("id"),
            Some(&Value::String("a".to_string()))
        );
        assert_eq!(recorded.batches[0][0].0, md5_hex(b"{\"id\":\"a\"}"));
        assert_eq!(
            recorded.batches[1][0].1.get("id"),
            Some(&Value::String("c".to_string()))
        );
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let mut file = tempfile::NamedTempFile::with_suffix(".jsonl").unwrap();
        writeln!(file, "{{\"id\":\"a\"}}").unwrap();
        writeln!(file, "not json at all").unwrap();
        writeln!(file, "{{\"id\":\"b\"}}").unwrap();

        let sink = Arc::new(RecordingSink::new(0));
        let mut source = JsonlSource::new(
            spec_for(file.path().to_str().unwrap()),
            sink.clone(),
            None,
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = sink.inner.lock().unwrap();
        assert_eq!(recorded.batches.len(), 1);
        assert_eq!(recorded.batches[0].len(), 2);
    }

    #[tokio::test]
    async fn rejected_records_land_in_the_dlq() {
        let mut file = tempfile::NamedTempFile::with_suffix(".jsonl").unwrap();
        writeln!(file, "{{\"id\":\"a\"}}").unwrap();
        writeln!(file, "{{\"id\":\"b\"}}").unwrap();

        let target = Arc::new(RecordingSink::failing());
        let dlq = Arc::new(RecordingSink::new(0));
        let mut source = JsonlSource::new(
            spec_for(file.path().to_str().unwrap()),
            target,
            Some(dlq.clone()),
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = dlq.inner.lock().unwrap();
        // One flush per routed record.
        assert_eq!(recorded.batches.len(), 2);
        assert_eq!(recorded.batches[0].len(), 1);
        assert_eq!(
            recorded.batches[0][0].1.get("id"),
            Some(&Value::String("a".to_string()))
        );
    }

    #[tokio::test]
    async fn rejected_records_without_a_dlq_abort() {
        let mut file = tempfile::NamedTempFile::with_suffix(".jsonl").unwrap();
        writeln!(file, "{{\"id\":\"a\"}}").unwrap();

        let target = Arc::new(RecordingSink::failing());
        let mut source = JsonlSource::new(
            spec_for(file.path().to_str().unwrap()),
            target,
            None,
            CancellationToken::new(),
        );
        assert!(source.worker().await.is_err());
    }
}
