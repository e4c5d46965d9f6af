//! Streaming-broker source.
//!
//! Consumes the configured topic list with auto-commit disabled and drives
//! the at-least-once protocol: flush the sink first, commit consumer
//! offsets second. A partition EOF is treated as a flush-and-commit point
//! so small topics drain promptly. Commit failures are logged and the loop
//! continues; duplicates are acceptable under the delivery contract.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, ClientContext, TopicPartitionList};
use rivulet_core::spec::config_value_string;
use rivulet_core::{Codec, Sink, Source, SourceSpec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::route_to_dlq;

/// Consumer context that surfaces partition assignment changes and commit
/// outcomes in the log; the client itself performs the assign/unassign.
struct SourceContext;

impl ClientContext for SourceContext {}

impl ConsumerContext for SourceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => debug!("assigned partitions [{partitions:?}]"),
            Rebalance::Revoke(partitions) => debug!("revoked partitions [{partitions:?}]"),
            Rebalance::Error(e) => warn!("rebalance error: {e}"),
        }
    }

    fn post_rebalance(&self, _rebalance: &Rebalance<'_>) {}

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!("offset commit failed: {e}");
        }
    }
}

pub struct KafkaSource {
    spec: SourceSpec,
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    codec: Codec,
    cancel: CancellationToken,
}

impl KafkaSource {
    pub fn new(
        spec: SourceSpec,
        target: Arc<dyn Sink>,
        dlq: Option<Arc<dyn Sink>>,
        codec: Codec,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            target,
            dlq,
            codec,
            cancel,
        }
    }

    async fn handle_message(&self, message: &BorrowedMessage<'_>) {
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();

        let Some(content) = message.payload() else {
            debug!("event without payload [key: {key}], skipping");
            return;
        };

        info!("processing event [key: {key}]");
        metrics::increment_counter!("rivulet_records_received_total", "source" => "kafka");

        let payload = match self.codec.deserialize(content) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("failed to deserialize event [key: {key}]: {e}");
                return;
            }
        };

        if let Err(e) = self.target.attach(&key, &payload).await {
            warn!("failed to attach content: {e}");
            route_to_dlq(self.dlq.as_ref(), &key, &payload).await;
        }
    }

    async fn commit(&self, consumer: &StreamConsumer<SourceContext>) {
        match consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => info!("events successfully committed"),
            Err(e) => warn!("failed to commit offsets: {e}"),
        }
    }
}

#[async_trait]
impl Source for KafkaSource {
    async fn worker(&mut self) -> Result<()> {
        self.dlq = crate::initialize_sinks(&self.target, self.dlq.take()).await?;

        let mut config = ClientConfig::new();
        config
            .set("enable.partition.eof", "true")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "6000");

        for (key, value) in &self.spec.specs.configurations {
            debug!("source set configuration [key: {key}, value: {value}]");
            config.set(key, config_value_string(value));
        }

        let consumer: StreamConsumer<SourceContext> = config
            .create_with_context(SourceContext)
            .context("failed to create kafka consumer")?;

        let topics: Vec<&str> = self
            .spec
            .specs
            .topic
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        consumer
            .subscribe(&topics)
            .with_context(|| format!("failed to subscribe topics {topics:?}"))?;

        info!("topic successfully subscribed {topics:?}, waiting messages");

        let poll_timeout = match self.spec.specs.timeout_ms {
            0 => Duration::from_millis(100),
            ms => Duration::from_millis(ms),
        };

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("caught termination signal: terminating");
                    self.target
                        .flush()
                        .await
                        .map_err(|e| anyhow!("failed to flush messages [error: {e}]"))?;
                    self.commit(&consumer).await;
                    return Ok(());
                }
                polled = tokio::time::timeout(poll_timeout, consumer.recv()) => {
                    match polled {
                        // Poll window elapsed without traffic.
                        Err(_) => continue,
                        Ok(Ok(message)) => {
                            self.handle_message(&message).await;

                            if !self.target.can_flush().await {
                                continue;
                            }

                            self.target
                                .flush()
                                .await
                                .map_err(|e| anyhow!("failed to flush messages [error: {e}]"))?;
                            self.commit(&consumer).await;
                        }
                        Ok(Err(KafkaError::PartitionEOF(partition))) => {
                            debug!("reached end of partition {partition}");
                            self.target
                                .flush()
                                .await
                                .map_err(|e| anyhow!("failed to flush messages [error: {e}]"))?;
                            self.commit(&consumer).await;
                        }
                        Ok(Err(e)) => {
                            debug!("{e}");
                        }
                    }
                }
            }
        }
    }
}
