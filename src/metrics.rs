//! Metrics initialization for Prometheus exporter.
//!
//! The relay emits one counter family, `relay.datagrams`, labelled by
//! `outcome`: `captured`, `forwarded`, `ignored`, `recv_error` and `error`.
//! A healthy session shows `forwarded` tracking `captured` times the
//! receiver count.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::config::MetricsConfig;
use crate::error::{Error, Result};

/// Initialize the metrics system based on configuration.
///
/// When enabled, starts an HTTP server exposing a `/metrics` endpoint for
/// Prometheus to scrape. When disabled this is a no-op; unregistered
/// counters on the capture path cost nothing.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(Error::Metrics)?;

    info!("metrics exporter listening on {}", config.listen);
    Ok(())
}
