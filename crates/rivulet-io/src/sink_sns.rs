//! Hosted-topic sink: every buffered record is published to the configured
//! topic ARN as its own message. The service offers no batch publish, so
//! flush walks the buffer serially.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rivulet_core::codec::compact_json;
use rivulet_core::{BatchBuffer, Codec, Payload, Sink, TargetSpec, TargetSpecs};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SnsSink {
    specs: TargetSpecs,
    codec: Codec,
    state: Mutex<SnsState>,
}

struct SnsState {
    client: Option<aws_sdk_sns::Client>,
    buffer: BatchBuffer<Vec<u8>>,
}

impl SnsSink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            codec: Codec::from_name(&spec.specs.codec),
            specs: spec.specs.clone(),
            state: Mutex::new(SnsState {
                client: None,
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for SnsSink {
    fn kind(&self) -> &'static str {
        "sns"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.client.is_some() {
            return Ok(());
        }

        if self.specs.topic_arn.is_empty() {
            bail!("topicArn not defined");
        }

        let config = crate::aws::sdk_config(&self.specs.configurations).await;
        let client = aws_sdk_sns::Client::new(&config);

        client
            .list_topics()
            .send()
            .await
            .context("failed to access sns")?;

        client
            .get_topic_attributes()
            .topic_arn(&self.specs.topic_arn)
            .send()
            .await
            .with_context(|| format!("topic {} not found", self.specs.topic_arn))?;

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
        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "sns");
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
            .ok_or_else(|| anyhow!("sns client not initialized"))?;

        let records = state.buffer.drain();
        let flushed = records.len();
        let start = std::time::Instant::now();

        for content in &records {
            client
                .publish()
                .topic_arn(&self.specs.topic_arn)
                .message(String::from_utf8_lossy(content).into_owned())
                .send()
                .await
                .map_err(|e| anyhow!("failed to send event: {e}"))?;
        }

        info!("events sent successfully, elapsed time: {:?}", start.elapsed());
        metrics::counter!("rivulet_records_flushed_total", flushed as u64, "sink" => "sns");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.client = None;
        Ok(())
    }
}
