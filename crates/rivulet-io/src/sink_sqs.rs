//! Hosted-queue sink: buffered records are shipped with batch-send calls,
//! chunked to the service's 10-entry request limit. A queue name is
//! resolved to its URL at initialize when no URL is configured.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::SendMessageBatchRequestEntry;
use rivulet_core::codec::compact_json;
use rivulet_core::{BatchBuffer, Codec, Payload, Sink, TargetSpec, TargetSpecs};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// SendMessageBatch accepts at most this many entries per call.
const BATCH_ENTRY_LIMIT: usize = 10;

pub struct SqsSink {
    specs: TargetSpecs,
    codec: Codec,
    state: Mutex<SqsState>,
}

struct SqsState {
    client: Option<aws_sdk_sqs::Client>,
    queue_url: String,
    buffer: BatchBuffer<Vec<u8>>,
}

impl SqsSink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            codec: Codec::from_name(&spec.specs.codec),
            specs: spec.specs.clone(),
            state: Mutex::new(SqsState {
                client: None,
                queue_url: String::new(),
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for SqsSink {
    fn kind(&self) -> &'static str {
        "sqs"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.client.is_some() {
            return Ok(());
        }

        if self.specs.queue_url.is_empty() && self.specs.queue.is_empty() {
            bail!("queueUrl not defined");
        }

        let config = crate::aws::sdk_config(&self.specs.configurations).await;
        let client = aws_sdk_sqs::Client::new(&config);

        client
            .list_queues()
            .max_results(1)
            .send()
            .await
            .context("failed to access sqs")?;

        if !self.specs.queue_url.is_empty() {
            client
                .get_queue_attributes()
                .queue_url(&self.specs.queue_url)
                .send()
                .await
                .with_context(|| format!("queue {} not found", self.specs.queue_url))?;
            state.queue_url = self.specs.queue_url.clone();
        } else {
            let resolved = client
                .get_queue_url()
                .queue_name(&self.specs.queue)
                .send()
                .await
                .with_context(|| format!("queue {} not found", self.specs.queue))?;
            state.queue_url = resolved
                .queue_url()
                .ok_or_else(|| anyhow!("queue {} resolved without a url", self.specs.queue))?
                .to_string();
        }

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
        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "sqs");
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
            .ok_or_else(|| anyhow!("sqs client not initialized"))?;

        let records = state.buffer.drain();
        let flushed = records.len();
        let start = std::time::Instant::now();

        for chunk in records.chunks(BATCH_ENTRY_LIMIT) {
            let mut entries = Vec::with_capacity(chunk.len());
            for (i, content) in chunk.iter().enumerate() {
                let entry = SendMessageBatchRequestEntry::builder()
                    .id(i.to_string())
                    .message_body(String::from_utf8_lossy(content).into_owned())
                    .delay_seconds(self.specs.delay_seconds)
                    .build()
                    .context("failed to build sqs batch entry")?;
                entries.push(entry);
            }

            client
                .send_message_batch()
                .queue_url(&state.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| anyhow!("failed to send events: {e}"))?;
        }

        info!("events sent successfully, elapsed time: {:?}", start.elapsed());
        metrics::counter!("rivulet_records_flushed_total", flushed as u64, "sink" => "sqs");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.client = None;
        Ok(())
    }
}
