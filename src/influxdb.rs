//! Metric sink abstraction and the InfluxDB 2.x implementation
//!
//! One point is written per compensated measurement, best effort: a failed
//! write is logged by the caller and the sample dropped. No buffering, no
//! retry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use influxdb2::models::DataPoint;
use influxdb2::Client;
use tracing::info;

use crate::devices::DeviceId;

/// One fully compensated measurement ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: DeviceId,
    pub name: String,
    /// °F
    pub temperature: f64,
    /// %RH
    pub humidity: f64,
    /// hPa
    pub pressure: f64,
    pub rssi: f64,
    pub snr: f64,
    pub fei: f64,
    /// Battery volts.
    pub vbat: f64,
    pub timestamp: DateTime<Utc>,
}

/// Time-series storage endpoint.
pub trait MetricSink {
    fn write(&self, sample: &Sample) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// InfluxDB 2.x sink.
pub struct InfluxDbSink {
    client: Client,
    bucket: String,
    measurement: String,
    url: String,
}

impl InfluxDbSink {
    pub fn new(url: &str, org: &str, bucket: &str, token: &str, measurement: &str) -> Self {
        info!(url, org, bucket, measurement, "creating InfluxDB client");

        InfluxDbSink {
            client: Client::new(url, org, token),
            bucket: bucket.to_string(),
            measurement: measurement.to_string(),
            url: url.to_string(),
        }
    }

    /// Probe the server's /health endpoint. The influxdb2 crate does not
    /// expose it, so go through reqwest directly.
    pub async fn health_check(&self) -> Result<()> {
        let health_url = format!("{}/health", self.url);

        let response = reqwest::get(&health_url)
            .await
            .context("connecting to InfluxDB health endpoint")?;

        let status = response.status();
        if status.is_success() {
            info!(status = %status, "InfluxDB health check passed");
            Ok(())
        } else {
            anyhow::bail!("InfluxDB health check failed with status: {}", status)
        }
    }
}

impl MetricSink for InfluxDbSink {
    async fn write(&self, sample: &Sample) -> Result<()> {
        let mut builder = DataPoint::builder(self.measurement.as_str())
            .tag("id", sample.id.to_string())
            .tag("name", sample.name.as_str())
            .field("temperature", sample.temperature)
            .field("humidity", sample.humidity)
            .field("pressure", sample.pressure)
            .field("rssi", sample.rssi)
            .field("snr", sample.snr)
            .field("fei", sample.fei)
            .field("vbat", sample.vbat);

        if let Some(ns) = sample.timestamp.timestamp_nanos_opt() {
            builder = builder.timestamp(ns);
        }

        let point = builder.build().context("building data point")?;

        self.client
            .write(&self.bucket, futures::stream::iter(vec![point]))
            .await
            .context("writing data point to InfluxDB")?;

        Ok(())
    }
}
