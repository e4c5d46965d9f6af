//! HTTP intake source.
//!
//! Serves a single configurable route on the shared router (next to the
//! health and metrics endpoints) and turns each request body into one
//! record. Responses tell the caller what happened to the record: `201`
//! flushed, `202` buffered, `400` rejected. Handlers run concurrently on
//! the server's workers; the sink's own mutex serializes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter};
use axum::{BoxError, Router};
use chrono::Utc;
use rivulet_core::spec::config_u64;
use rivulet_core::{Codec, Payload, Sink, Source, SourceSpec, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::hash::md5_hex;
use crate::route_to_dlq;

const METHODS_ALLOWED_DEFAULT: &str = "GET,POST";

pub struct HttpSource {
    spec: SourceSpec,
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    codec: Codec,
    router: Option<Router>,
    port: String,
    cancel: CancellationToken,
}

struct IntakeState {
    target: Arc<dyn Sink>,
    dlq: Option<Arc<dyn Sink>>,
    codec: Codec,
}

impl HttpSource {
    pub fn new(
        spec: SourceSpec,
        target: Arc<dyn Sink>,
        dlq: Option<Arc<dyn Sink>>,
        codec: Codec,
        router: Router,
        port: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            spec,
            target,
            dlq,
            codec,
            router: Some(router),
            port,
            cancel,
        }
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn worker(&mut self) -> Result<()> {
        self.dlq = crate::initialize_sinks(&self.target, self.dlq.take()).await?;

        if !self.spec.specs.endpoint.starts_with('/') {
            return Err(anyhow!(
                "endpoint {} is invalid, it must start with /",
                self.spec.specs.endpoint
            ));
        }

        let methods = if self.spec.specs.method.is_empty() {
            METHODS_ALLOWED_DEFAULT
        } else {
            self.spec.specs.method.as_str()
        };
        let filter = method_filter(methods)?;

        let state = Arc::new(IntakeState {
            target: self.target.clone(),
            dlq: self.dlq.clone(),
            codec: self.codec,
        });

        let intake = Router::new()
            .route(&self.spec.specs.endpoint, on(filter, handle))
            .with_state(state);

        let mut router = self.router.take().unwrap_or_default().merge(intake);

        if let Some(read_timeout) = config_u64(&self.spec.specs.configurations, "readTimeout") {
            if read_timeout > 0 {
                router = router.layer(
                    tower::ServiceBuilder::new()
                        .layer(HandleErrorLayer::new(|_: BoxError| async {
                            StatusCode::REQUEST_TIMEOUT
                        }))
                        .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(
                            read_timeout,
                        ))),
                );
            }
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(
            "endpoint initialize [endpoint: {addr}{}, method(s): {methods}]",
            self.spec.specs.endpoint
        );

        let cancel = self.cancel.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("http server failed")?;

        self.target
            .flush()
            .await
            .map_err(|e| anyhow!("failed to flush event: {e}"))
    }
}

async fn handle(
    State(state): State<Arc<IntakeState>>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let mut key = md5_hex(Utc::now().to_rfc3339().as_bytes());
    let mut payload = Payload::new();

    if !body.is_empty() {
        key = md5_hex(&body);

        payload = match state.codec.deserialize(&body) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to deserialize content: {e}");
                return respond(
                    StatusCode::BAD_REQUEST,
                    &key,
                    &message_body("failed to deserialize content"),
                );
            }
        };
    }

    for (name, value) in params {
        payload.insert(name, Value::String(value));
    }

    info!("processing request [{method} {uri}]");
    metrics::increment_counter!("rivulet_records_received_total", "source" => "http");

    if let Err(e) = state.target.attach(&key, &payload).await {
        error!("failed to attach content: {e}");
        route_to_dlq(state.dlq.as_ref(), &key, &payload).await;
        return respond(
            StatusCode::BAD_REQUEST,
            &key,
            &message_body("failed to attach content"),
        );
    }

    if !state.target.can_flush().await {
        return respond(StatusCode::ACCEPTED, &key, &Value::Object(payload));
    }

    if let Err(e) = state.target.flush().await {
        error!("failed to flush event: {e}");
        return respond(
            StatusCode::BAD_REQUEST,
            &key,
            &message_body("failed to flush event"),
        );
    }

    respond(StatusCode::CREATED, &key, &Value::Object(payload))
}

fn message_body(message: &str) -> Value {
    let mut body = Payload::new();
    body.insert("message".to_string(), Value::String(message.to_string()));
    Value::Object(body)
}

fn respond(status: StatusCode, key: &str, body: &Value) -> Response {
    let content = serde_json::to_vec(body).unwrap_or_default();
    (
        status,
        [
            ("x-stream-application", "rivulet".to_string()),
            ("x-request-key", key.to_string()),
            ("content-type", "application/json; charset=utf-8".to_string()),
        ],
        content,
    )
        .into_response()
}

fn method_filter(methods: &str) -> Result<MethodFilter> {
    let mut filter: Option<MethodFilter> = None;

    for method in methods.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        let parsed = match method.to_ascii_uppercase().as_str() {
            "GET" => MethodFilter::GET,
            "POST" => MethodFilter::POST,
            "PUT" => MethodFilter::PUT,
            "PATCH" => MethodFilter::PATCH,
            "DELETE" => MethodFilter::DELETE,
            "HEAD" => MethodFilter::HEAD,
            "OPTIONS" => MethodFilter::OPTIONS,
            "TRACE" => MethodFilter::TRACE,
            other => {
                warn!("method {other} is not supported, skipping");
                continue;
            }
        };

        filter = Some(match filter {
            Some(existing) => existing.or(parsed),
            None => parsed,
        });
    }

    filter.ok_or_else(|| anyhow!("no valid method configured"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_lists() {
        assert!(method_filter("GET,POST").is_ok());
        assert!(method_filter("put").is_ok());
        assert!(method_filter("GET, SPY").is_ok());
        assert!(method_filter("SPY").is_err());
        assert!(method_filter("").is_err());
    }

    #[test]
    fn error_bodies_are_json_messages() {
        let body = message_body("failed to flush event");
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            "{\"message\":\"failed to flush event\"}"
        );
    }
}
