//! The receive/dispatch loop
//!
//! A single task multiplexes four event producers: the packet channel, the
//! watchdog timer, the reload signal and the shutdown signal. All device
//! registry mutation happens here; frame processing, compensation and the
//! metric write complete before the next event is considered.
//!
//! The watchdog is the only recovery path for a radio that has silently
//! stopped delivering: on expiry the receive context is torn down and a
//! fresh one opened. The select is biased so a frame that is already
//! queued always beats an expired watchdog, and every frame arrival resets
//! the deadline before dispatch.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use crate::bme280;
use crate::devices::{DeviceId, DeviceMap};
use crate::frame::{Frame, RawMeasurement};
use crate::influxdb::{MetricSink, Sample};
use crate::radio::{LinkQuality, PacketSource, RawPacket};

/// Radio silence tolerated before the receive context is restarted.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(120);

// Battery sense: ADC reference and the node's voltage divider.
const VREF: f64 = 1.5;
const R1: f64 = 300e3;
const R2: f64 = 180e3;
const VDIV: f64 = R2 / (R1 + R2);

/// Battery volts from the node's averaged 10-bit ADC reading.
pub fn battery_volts(adc: u16) -> f64 {
    adc as f64 * VREF / 1023.0 / VDIV / 64.0
}

/// The gateway control loop. Owns the device registry for its lifetime;
/// [`Gateway::into_devices`] hands it back for shutdown persistence.
pub struct Gateway<S, K> {
    source: S,
    sink: K,
    devices: DeviceMap,
    devices_path: PathBuf,
    watchdog_timeout: Duration,
}

impl<S: PacketSource, K: MetricSink> Gateway<S, K> {
    pub fn new(source: S, sink: K, devices: DeviceMap, devices_path: PathBuf) -> Self {
        Gateway {
            source,
            sink,
            devices,
            devices_path,
            watchdog_timeout: WATCHDOG_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_watchdog(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn devices(&self) -> &DeviceMap {
        &self.devices
    }

    pub fn into_devices(self) -> DeviceMap {
        self.devices
    }

    /// Run until a shutdown event arrives or both signal channels close.
    pub async fn run(
        &mut self,
        mut reload: mpsc::Receiver<()>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut packets = self.source.open().context("opening packet source")?;

        let watchdog = tokio::time::sleep(self.watchdog_timeout);
        tokio::pin!(watchdog);

        info!("listening...");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("interrupted...");
                    break;
                }

                Some(()) = reload.recv() => {
                    info!("reloading device registry...");
                    if let Err(e) = self.devices.reload(&self.devices_path) {
                        warn!(error = %e, "reload failed, keeping in-memory registry");
                    }
                }

                pkt = packets.recv() => {
                    // Reset before dispatch so a slow sink write cannot
                    // eat into the next silence window.
                    watchdog.as_mut().reset(Instant::now() + self.watchdog_timeout);
                    match pkt {
                        Some(pkt) => self.handle_packet(pkt).await,
                        None => {
                            info!("receive context cancelled...");
                            break;
                        }
                    }
                }

                () = &mut watchdog => {
                    warn!(
                        timeout_secs = self.watchdog_timeout.as_secs(),
                        "radio silent, restarting receive context"
                    );
                    self.source.close();
                    packets = self.source.open().context("reopening packet source")?;
                    watchdog.as_mut().reset(Instant::now() + self.watchdog_timeout);
                }
            }
        }

        self.source.close();
        Ok(())
    }

    async fn handle_packet(&mut self, pkt: RawPacket) {
        match Frame::decode(&pkt.bytes) {
            Frame::Calibration { id, block, measurement } => {
                info!(id = %id, "calibrating...");
                self.devices.apply_calibration(id, &block);
                self.compensate_and_emit(id, measurement, pkt.link).await;
            }
            Frame::Measurement { id, measurement } => {
                if self.devices.get(id).is_none() {
                    warn!(id = %id, "not calibrated");
                    return;
                }
                self.compensate_and_emit(id, measurement, pkt.link).await;
            }
            Frame::Unrecognized { len } => {
                warn!(len, bytes = ?pkt.bytes, "unhandled frame length");
            }
        }
    }

    async fn compensate_and_emit(&mut self, id: DeviceId, m: RawMeasurement, link: LinkQuality) {
        let Some(dev) = self.devices.get(id) else {
            return;
        };
        let cal = &dev.bme280;

        // Temperature first: humidity and pressure need its t_fine.
        let (temperature, t_fine) = bme280::temperature(cal, m.temperature);
        let humidity = bme280::humidity(cal, m.humidity, t_fine);
        let pressure = bme280::pressure(cal, m.pressure, t_fine);
        if pressure == 0.0 {
            warn!(id = %id, "degenerate pressure calibration, skipping sample");
            return;
        }

        let vbat = battery_volts(m.battery_adc);
        let name = dev.display_name().to_string();

        trace!(
            id = %id,
            name = %name,
            temperature_f = temperature,
            humidity_pct = humidity,
            pressure_hpa = pressure,
            vbat,
            "compensated measurement"
        );

        let sample = Sample {
            id,
            name,
            temperature,
            humidity,
            pressure,
            rssi: link.rssi,
            snr: link.snr,
            fei: link.fei,
            vbat,
            timestamp: Utc::now(),
        };

        if let Err(e) = self.sink.write(&sample).await {
            warn!(error = %e, id = %id, "dropping sample, sink write failed");
        }
    }
}
