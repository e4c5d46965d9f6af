//! # Rivulet Core
//!
//! Foundational types for rivulet event pipelines: the uniform source/sink
//! contract, the dynamically-shaped record payload, the byte↔payload codecs,
//! the in-memory batch buffer, and the YAML configuration tree.
//!
//! A pipeline is a three-stage line: a [`Source`] produces records, hands
//! them to a [`Sink`] which buffers and publishes them in batches, and an
//! optional second sink receives records the primary one rejects.
//!
//! ## Delivery contract
//!
//! Sinks buffer records attached by the source and publish them as one
//! logical batch on [`Sink::flush`]. Sources drive the cadence: after each
//! record they consult [`Sink::can_flush`] and flush when it says so. For
//! offset-committing sources this sequencing is what makes delivery
//! at-least-once — offsets advance only after a flush reports success.

use anyhow::Result;
use async_trait::async_trait;

pub mod buffer;
pub mod codec;
pub mod spec;

pub use buffer::BatchBuffer;
pub use codec::Codec;
pub use spec::{
    ConfigBuilder, Configurations, EndpointSpec, InstanceSpec, SourceSpec, SourceSpecs,
    StreamFile, StreamSpec, TargetSpec, TargetSpecs,
};

/// A single payload value: null, boolean, number, string, map, or sequence.
pub type Value = serde_json::Value;

/// One record's attribute map. Keys are unique; iteration order is the
/// order keys were first inserted, which SQL sinks rely on for a stable
/// column layout.
pub type Payload = serde_json::Map<String, Value>;

/// Errors raised while loading and validating the pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("{0} is invalid, only files with extension yml or yaml are accepted")]
    InvalidExtension(String),
    #[error("failed to load {0}, make sure the path was passed correctly")]
    UnreadableFile(String),
    #[error("failed to deserialize {0}: {1}")]
    MalformedConfig(String, #[source] serde_yaml::Error),
    #[error("source {0} is invalid")]
    UnknownSource(String),
    #[error("target {0} is invalid")]
    UnknownTarget(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A component that buffers records and publishes them to a backend.
///
/// Implementations own their buffer exclusively and serialize every
/// operation behind one internal mutex, so a sink may be shared across
/// concurrent callers (the HTTP intake handlers do exactly that).
#[async_trait]
pub trait Sink: Send + Sync {
    /// The configuration `type` tag this sink was built from.
    fn kind(&self) -> &'static str;

    /// Validate required configuration and probe the backend. Called once
    /// before the source starts producing; must be idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Encode `payload` with the configured codec and enqueue it. The key
    /// is a hint some backends use for message metadata or deduplication.
    async fn attach(&self, key: &str, payload: &Payload) -> Result<()>;

    /// Whether the buffer has reached the sink's flush thresholds.
    async fn can_flush(&self) -> bool;

    /// Publish everything buffered as one logical batch. A no-op on an
    /// empty buffer. The buffer is drained whether or not the backend call
    /// succeeds; on failure the error propagates to the caller.
    async fn flush(&self) -> Result<()>;

    /// Release backend handles.
    async fn close(&self) -> Result<()>;
}

/// A component that produces records and drives a sink.
///
/// `worker` runs until the input is exhausted or the process-wide
/// cancellation token fires, performing a final flush on the way out.
#[async_trait]
pub trait Source: Send {
    async fn worker(&mut self) -> Result<()>;
}
