//! datmos gateway binary
//!
//! Wires the pieces together: resolves settings from the environment,
//! loads the device registry, opens the InfluxDB sink and the receiver
//! subprocess, forwards SIGUSR1/SIGTERM into the loop, and persists the
//! registry on every exit path.

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::info;

use datmos::config::Settings;
use datmos::devices::DeviceMap;
use datmos::gateway::Gateway;
use datmos::influxdb::InfluxDbSink;
use datmos::radio::SubprocessSource;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("datmos gateway starting");

    let settings = Settings::from_env()?;

    let devices = DeviceMap::load(&settings.devices_path)?;
    for (id, dev) in &devices.0 {
        info!(id = %id, name = %dev.display_name(), "known device");
    }

    // From here on the registry must reach disk no matter how we exit.
    let (devices, result) = run(&settings, devices).await;

    devices
        .save(&settings.devices_path)
        .context("saving device registry")?;
    info!(path = %settings.devices_path.display(), "device registry saved");

    result
}

async fn run(settings: &Settings, devices: DeviceMap) -> (DeviceMap, Result<()>) {
    let sink = InfluxDbSink::new(
        &settings.hostname,
        &settings.org,
        &settings.bucket,
        &settings.token,
        &settings.measurement,
    );
    if let Err(e) = sink.health_check().await {
        return (devices, Err(e.context("InfluxDB health check failed")));
    }

    let (program, args) = match settings.rx_command.split_first() {
        Some(split) => split,
        None => return (devices, Err(anyhow::anyhow!("empty receiver command"))),
    };
    let source = SubprocessSource::new(program.clone(), args.to_vec(), settings.channel_capacity);

    let (reload_tx, reload_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => return (devices, Err(e).context("installing SIGUSR1 handler")),
    };
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            if reload_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => return (devices, Err(e).context("installing SIGTERM handler")),
    };
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        let _ = shutdown_tx.send(()).await;
    });

    let mut gw = Gateway::new(source, sink, devices, settings.devices_path.clone());
    let result = gw.run(reload_rx, shutdown_rx).await;

    (gw.into_devices(), result)
}
