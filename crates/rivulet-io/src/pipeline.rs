//! Pipeline runner: builds the target sink, the optional dead-letter sink
//! and the source from the configuration, wires the shared HTTP router
//! (liveness, metrics, and the intake route when the source is HTTP), and
//! runs the source worker until it finishes or a termination signal lands.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use rivulet_core::StreamSpec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{build_sink, build_source, HTTP_SOURCE};

#[derive(Default)]
pub struct RunOptions {
    pub liveness: bool,
    pub metrics: bool,
    /// Installed recorder handle; rendered at the metrics endpoint.
    pub prometheus: Option<PrometheusHandle>,
}

pub async fn run(stream: StreamSpec, options: RunOptions) -> Result<()> {
    info!("initializing target: {}", stream.instance.target.kind);
    let target = build_sink(&stream.instance.target)?;

    let dlq = match &stream.instance.dlq {
        Some(spec) => {
            info!("initializing dlq context: {}", spec.kind);
            match build_sink(spec) {
                Ok(sink) => Some(sink),
                Err(e) => {
                    info!("dlq not defined: {e}");
                    None
                }
            }
        }
        None => None,
    };

    let router = endpoints_router(&stream, &options);

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let serves_intake = stream.instance.source.kind == HTTP_SOURCE;
    if !serves_intake {
        spawn_endpoints_server(&stream, router.clone(), cancel.clone()).await?;
    }

    info!("initializing source context: {}", stream.instance.source.kind);
    let mut source = build_source(
        &stream,
        target.clone(),
        dlq.clone(),
        serves_intake.then_some(router),
        cancel.clone(),
    )?;

    debug!("initializing worker");
    let result = source.worker().await;

    if let Err(e) = target.close().await {
        warn!("failed to close target: {e}");
    }
    if let Some(sink) = &dlq {
        if let Err(e) = sink.close().await {
            warn!("failed to close dlq: {e}");
        }
    }

    result
}

fn endpoints_router(stream: &StreamSpec, options: &RunOptions) -> Router {
    let mut router = Router::new();

    if options.liveness && !stream.health_check.endpoint.is_empty() {
        router = router.route(&stream.health_check.endpoint, get(|| async { "OK" }));
        debug!(
            "initialize endpoint liveness: http://localhost:{}{}",
            stream.port, stream.health_check.endpoint
        );
    }

    if options.metrics && !stream.metrics.endpoint.is_empty() {
        if let Some(handle) = options.prometheus.clone() {
            router = router.route(
                &stream.metrics.endpoint,
                get(move || async move { handle.render() }),
            );
            debug!(
                "initialize endpoint prometheus: http://localhost:{}{}",
                stream.port, stream.metrics.endpoint
            );
        }
    }

    router
}

/// Serve the liveness/metrics router for sources that do not run their own
/// HTTP server. Nothing to serve (or no port) means no server.
async fn spawn_endpoints_server(
    stream: &StreamSpec,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    if !router.has_routes() || stream.port.is_empty() {
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", stream.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("endpoints server failed: {e}");
        }
    });

    Ok(())
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("caught termination signal, shutting down");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
