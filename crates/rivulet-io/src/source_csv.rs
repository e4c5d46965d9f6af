//! CSV file source. The first row names the columns (lower-cased, spaces
//! become underscores); every following row is one record keyed by the MD5
//! of its joined fields.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rivulet_core::{Payload, Sink, Source, SourceSpec, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::hash::md5_hex;
use crate::{list_files, route_to_dlq};

pub struct CsvSource {
    spec: SourceSpec,
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    cancel: CancellationToken,
}

impl CsvSource {
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
            .with_context(|| format!("failed to load csv file {filename}"))?;
        let mut reader = csv::Reader::from_reader(file);

        let columns: Vec<String> = reader
            .headers()
            .with_context(|| format!("failed to read columns csv file {filename}"))?
            .iter()
            .map(|header| header.to_lowercase().replace(' ', "_"))
            .collect();
        debug!("columns {columns:?}");

        for row in reader.records() {
            if self.cancel.is_cancelled() {
                break;
            }

            let record =
                row.with_context(|| format!("failed to read csv file {filename}"))?;

            let mut payload = Payload::new();
            for (column, field) in columns.iter().zip(record.iter()) {
                payload.insert(column.clone(), Value::String(field.to_string()));
            }

            let key = md5_hex(record.iter().collect::<String>().as_bytes());
            metrics::increment_counter!("rivulet_records_received_total", "source" => "csv");

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
impl Source for CsvSource {
    async fn worker(&mut self) -> Result<()> {
        self.dlq = crate::initialize_sinks(&self.target, self.dlq.take()).await?;

        let path = &self.spec.specs.path;
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("csv file/directory {path} not found"))?;

        if meta.is_dir() {
            for file in list_files(path, "csv")? {
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
    use rivulet_core::SourceSpecs;
    use std::io::Write;

    fn spec_for(path: &str) -> SourceSpec {
        SourceSpec {
            kind: "csv".to_string(),
            codec: String::new(),
            specs: SourceSpecs {
                path: path.to_string(),
                ..SourceSpecs::default()
            },
        }
    }

    #[tokio::test]
    async fn normalizes_headers_and_hashes_rows() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Name,Favorite Color").unwrap();
        writeln!(file, "Ada,blue").unwrap();
        writeln!(file, "Bob,green").unwrap();

        let sink = Arc::new(RecordingSink::new(0));
        let mut source = CsvSource::new(
            spec_for(file.path().to_str().unwrap()),
            sink.clone(),
            None,
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = sink.inner.lock().unwrap();
        assert_eq!(recorded.batches.len(), 1);

        let batch = &recorded.batches[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].0, md5_hex(b"Adablue"));
        assert_eq!(
            batch[0].1.get("favorite_color"),
            Some(&Value::String("blue".to_string()))
        );
        assert_eq!(batch[1].1.get("name"), Some(&Value::String("Bob".to_string())));
    }

    #[tokio::test]
    async fn flushes_at_the_count_threshold() {
        let mut file = tempfile::NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "id").unwrap();
        for i in 0..3 {
            writeln!(file, "row-{i}").unwrap();
        }

        let sink = Arc::new(RecordingSink::new(2));
        let mut source = CsvSource::new(
            spec_for(file.path().to_str().unwrap()),
            sink.clone(),
            None,
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = sink.inner.lock().unwrap();
        let sizes: Vec<usize> = recorded.batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test]
    async fn walks_directories_one_level() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "not csv").unwrap();

        let sink = Arc::new(RecordingSink::new(0));
        let mut source = CsvSource::new(
            spec_for(dir.path().to_str().unwrap()),
            sink.clone(),
            None,
            CancellationToken::new(),
        );
        source.worker().await.unwrap();

        let recorded = sink.inner.lock().unwrap();
        assert_eq!(recorded.batches.len(), 1);
        assert_eq!(recorded.batches[0].len(), 1);
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let sink = Arc::new(RecordingSink::new(0));
        let mut source = CsvSource::new(
            spec_for("/definitely/not/here.csv"),
            sink,
            None,
            CancellationToken::new(),
        );
        assert!(source.worker().await.is_err());
    }
}
