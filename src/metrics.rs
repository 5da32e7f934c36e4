//! Challenger metrics
//!
//! Labelled counters and gauges shared by all per-feed pipelines, exposed
//! over HTTP in Prometheus text format.

use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

type Labels = Vec<(String, String)>;

/// Shared handle to the challenger metric families.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    errors: Family<Labels, Counter>,
    challenges: Family<Labels, Counter>,
    last_scanned_block: Family<Labels, Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let sub = registry.sub_registry_with_prefix("challenger");

        let errors = Family::<Labels, Counter>::default();
        sub.register("errors", "Challenger Errors Counter", errors.clone());

        let challenges = Family::<Labels, Counter>::default();
        sub.register("challenges", "Number of challenges made", challenges.clone());

        let last_scanned_block = Family::<Labels, Gauge>::default();
        sub.register(
            "last_scanned_block",
            "Last scanned block",
            last_scanned_block.clone(),
        );

        Self {
            inner: Arc::new(MetricsInner {
                registry,
                errors,
                challenges,
                last_scanned_block,
            }),
        }
    }

    /// Count a tick or challenge-task error for a feed.
    pub fn record_error(&self, address: Address, from: Address, error: &str) {
        self.inner
            .errors
            .get_or_create(&vec![
                ("address".to_string(), format!("0x{address:x}")),
                ("from".to_string(), format!("0x{from:x}")),
                ("error".to_string(), error.to_string()),
            ])
            .inc();
    }

    /// Count one confirmed challenge.
    pub fn record_challenge(&self, address: Address, from: Address, tx_hash: B256) {
        self.inner
            .challenges
            .get_or_create(&vec![
                ("address".to_string(), format!("0x{address:x}")),
                ("from".to_string(), format!("0x{from:x}")),
                ("tx".to_string(), format!("0x{tx_hash:x}")),
            ])
            .inc();
    }

    /// Publish the scan cursor for a feed.
    pub fn set_last_scanned_block(&self, address: Address, from: Address, block: u64) {
        self.inner
            .last_scanned_block
            .get_or_create(&vec![
                ("address".to_string(), format!("0x{address:x}")),
                ("from".to_string(), format!("0x{from:x}")),
            ])
            .set(block as i64);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.inner.registry).context("encode Prometheus metrics")?;
        Ok(buffer)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

async fn render(metrics: Metrics) -> Response {
    match metrics.encode() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Serve `GET /metrics` until shutdown is requested.
pub async fn serve(metrics: Metrics, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move { render(metrics).await }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
    info!("Serving metrics on http://{addr}/metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("metrics server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, b256};

    #[test]
    fn test_metric_families_appear_in_exposition() {
        let metrics = Metrics::new();
        let feed = address!("891e368fe81cba2ac6f6cc4b98e684c106e2ef4f");
        let from = address!("1f7acda376ef37ec371235a094113df9cb4efee1");

        metrics.record_error(feed, from, "network error: timeout");
        metrics.record_challenge(
            feed,
            from,
            b256!("00000000000000000000000000000000000000000000000000000000000000aa"),
        );
        metrics.set_last_scanned_block(feed, from, 12_345);

        let body = metrics.encode().unwrap();
        assert!(body.contains("challenger_errors_total"));
        assert!(body.contains("challenger_challenges_total"));
        assert!(body.contains("challenger_last_scanned_block"));
        assert!(body.contains("12345"));
    }

    #[test]
    fn test_gauge_tracks_latest_value() {
        let metrics = Metrics::new();
        let feed = address!("891e368fe81cba2ac6f6cc4b98e684c106e2ef4f");
        let from = address!("1f7acda376ef37ec371235a094113df9cb4efee1");

        metrics.set_last_scanned_block(feed, from, 10);
        metrics.set_last_scanned_block(feed, from, 20);

        let body = metrics.encode().unwrap();
        assert!(body.contains("20"));
    }
}
