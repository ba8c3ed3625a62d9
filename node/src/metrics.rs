//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] under the
//! `blobchain` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub blocks_accepted_total: IntCounter,
    pub transactions_accepted_total: IntCounter,
    /// Builds that produced no block (empty pool, surplus short, ...).
    pub block_build_failures_total: IntCounter,
    pub transactions_in_mempool: IntGauge,
    pub block_height: IntGauge,
    pub block_build_seconds: Histogram,
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, prometheus::Error>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("blobchain".into()), None)?;

        let blocks_accepted_total = register(
            &registry,
            IntCounter::new("blocks_accepted_total", "Blocks accepted by this node")?,
        )?;
        let transactions_accepted_total = register(
            &registry,
            IntCounter::new(
                "transactions_accepted_total",
                "Transactions included in accepted blocks",
            )?,
        )?;
        let block_build_failures_total = register(
            &registry,
            IntCounter::new(
                "block_build_failures_total",
                "Build attempts that did not produce a block",
            )?,
        )?;
        let transactions_in_mempool = register(
            &registry,
            IntGauge::new("transactions_in_mempool", "Pending transactions in the mempool")?,
        )?;
        let block_height = register(
            &registry,
            IntGauge::new("block_height", "Height of the last accepted block")?,
        )?;
        let block_build_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("block_build_seconds", "Time to build and verify a block")
                    .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            blocks_accepted_total,
            transactions_accepted_total,
            block_build_failures_total,
            transactions_in_mempool,
            block_height,
            block_build_seconds,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics`. HTTP 500 if encoding fails.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_namespaced() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.blocks_accepted_total.inc();
        metrics.block_height.set(7);

        let text = metrics.encode().unwrap();
        assert!(text.contains("blobchain_blocks_accepted_total 1"));
        assert!(text.contains("blobchain_block_height 7"));
    }
}
