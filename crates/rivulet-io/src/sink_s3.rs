//! Object-storage sink: buffered records are concatenated with the
//! configured line break and uploaded as one line-delimited JSON object
//! per flush. Object keys are the expanded prefix plus a time-derived
//! hash, ending in `.jsonl`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{SecondsFormat, Utc};
use rivulet_core::codec::compact_json;
use rivulet_core::{BatchBuffer, Codec, Payload, Sink, TargetSpec, TargetSpecs};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::hash::md5_hex;
use crate::prefix;

pub struct S3Sink {
    specs: TargetSpecs,
    codec: Codec,
    state: Mutex<S3State>,
}

struct S3State {
    client: Option<aws_sdk_s3::Client>,
    buffer: BatchBuffer<Vec<u8>>,
}

impl S3Sink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            codec: Codec::from_name(&spec.specs.codec),
            specs: spec.specs.clone(),
            state: Mutex::new(S3State {
                client: None,
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for S3Sink {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.client.is_some() {
            return Ok(());
        }

        if self.specs.bucket.is_empty() {
            bail!("bucket not defined");
        }

        let config = crate::aws::sdk_config(&self.specs.configurations).await;
        let client = aws_sdk_s3::Client::new(&config);

        client
            .list_buckets()
            .send()
            .await
            .context("failed to access s3")?;

        client
            .get_bucket_location()
            .bucket(&self.specs.bucket)
            .send()
            .await
            .with_context(|| format!("bucket {} not found", self.specs.bucket))?;

        state.client = Some(client);
        Ok(())
    }

    async fn attach(&self, _key: &str, payload: &Payload) -> Result<()> {
        let mut state = self.state.lock().await;

        let content = self
            .codec
            .serialize(payload)
            .map_err(|e| anyhow!("failed to serialize payload: {e}"))?;
        let content = compact_json(content);

        let cost = content.len() as u64 + self.specs.line_break_or_default().len() as u64;
        state.buffer.push(content, cost);

        debug!("buffer length: {} bytes", state.buffer.bytes());
        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "s3");
        Ok(())
    }

    async fn can_flush(&self) -> bool {
        let state = self.state.lock().await;
        state
            .buffer
            .should_flush(self.specs.buffer_size, self.specs.batch_size, true)
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.buffer.is_empty() {
            return Ok(());
        }

        let client = state
            .client
            .clone()
            .ok_or_else(|| anyhow!("s3 client not initialized"))?;

        let line_break = self.specs.line_break_or_default();
        let records = state.buffer.drain();
        let flushed = records.len();

        let mut body = Vec::new();
        for content in &records {
            body.extend_from_slice(content);
            body.extend_from_slice(line_break.as_bytes());
        }

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let object_key = format!(
            "{}{}.jsonl",
            prefix::expand(&self.specs.prefix),
            md5_hex(now.as_bytes())
        );

        debug!("upload object: {object_key}, bytes length: {}", body.len());

        let start = std::time::Instant::now();
        client
            .put_object()
            .bucket(&self.specs.bucket)
            .key(&object_key)
            .content_encoding("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload object {object_key}"))?;

        info!("uploaded object {object_key}, elapsed time: {:?}", start.elapsed());
        metrics::counter!("rivulet_records_flushed_total", flushed as u64, "sink" => "s3");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.client = None;
        Ok(())
    }
}
