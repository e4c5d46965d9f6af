//! Streaming-broker sink: produces each buffered record as an individual
//! message to the configured topic, with per-message delivery
//! acknowledgement. Idempotent-producer mode is on by default and an
//! unbounded producer drain closes every flush.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use rivulet_core::spec::config_value_string;
use rivulet_core::{BatchBuffer, Codec, Payload, Sink, TargetSpec, TargetSpecs};
use tokio::sync::Mutex;
use tracing::debug;

pub struct KafkaSink {
    specs: TargetSpecs,
    codec: Codec,
    state: Mutex<KafkaSinkState>,
}

struct KafkaSinkState {
    producer: Option<FutureProducer>,
    buffer: BatchBuffer<(String, Vec<u8>)>,
}

impl KafkaSink {
    pub fn new(spec: &TargetSpec) -> Self {
        Self {
            codec: Codec::from_name(&spec.specs.codec),
            specs: spec.specs.clone(),
            state: Mutex::new(KafkaSinkState {
                producer: None,
                buffer: BatchBuffer::new(),
            }),
        }
    }
}

#[async_trait]
impl Sink for KafkaSink {
    fn kind(&self) -> &'static str {
        "kafka"
    }

    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.producer.is_some() {
            return Ok(());
        }

        let mut config = ClientConfig::new();
        config
            .set("message.send.max.retries", "10000000")
            .set("enable.idempotence", "true");

        for (key, value) in &self.specs.configurations {
            debug!("target set configuration [key: {key}, value: {value}]");
            config.set(key, config_value_string(value));
        }

        state.producer = Some(config.create().context("failed to create kafka producer")?);
        Ok(())
    }

    async fn attach(&self, key: &str, payload: &Payload) -> Result<()> {
        let mut state = self.state.lock().await;

        let content = self.codec.serialize(payload)?;
        let cost = content.len() as u64;
        state.buffer.push((key.to_string(), content), cost);

        metrics::increment_counter!("rivulet_records_attached_total", "sink" => "kafka");
        Ok(())
    }

    async fn can_flush(&self) -> bool {
        let state = self.state.lock().await;
        state.buffer.should_flush(0, self.specs.batch_size, true)
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.buffer.is_empty() {
            return Ok(());
        }

        let producer = state
            .producer
            .clone()
            .ok_or_else(|| anyhow!("kafka producer not initialized"))?;

        let records = state.buffer.drain();
        debug!("flush {} events", records.len());

        let flushed = records.len();
        for (key, content) in &records {
            let mut record = FutureRecord::<String, Vec<u8>>::to(&self.specs.topic).payload(content);
            if !key.is_empty() {
                record = record.key(key);
            }

            producer
                .send(record, Timeout::Never)
                .await
                .map_err(|(e, _)| anyhow!("failed to produce event: {e}"))?;
        }

        producer
            .flush(Timeout::Never)
            .context("failed to drain kafka producer")?;

        metrics::counter!("rivulet_records_flushed_total", flushed as u64, "sink" => "kafka");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.producer = None;
        Ok(())
    }
}
