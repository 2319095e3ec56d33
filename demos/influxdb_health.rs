//! Probe the configured InfluxDB server and write one throwaway sample.
//!
//! Run with: cargo run --example influxdb_health

use chrono::Utc;
use datmos::devices::DeviceId;
use datmos::influxdb::{InfluxDbSink, MetricSink, Sample};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let sink = InfluxDbSink::new(
        "http://localhost:8086",
        "home",
        "datmos",
        "my-super-secret-auth-token",
        "environment_test",
    );

    sink.health_check().await?;
    println!("InfluxDB health check passed");

    sink.write(&Sample {
        id: DeviceId(0xFF),
        name: "healthcheck".into(),
        temperature: 72.5,
        humidity: 40.0,
        pressure: 1013.25,
        rssi: -60.0,
        snr: 10.0,
        fei: 0.0,
        vbat: 3.0,
        timestamp: Utc::now(),
    })
    .await?;
    println!("test sample written");

    Ok(())
}
