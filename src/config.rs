//! Environment-driven settings
//!
//! Everything the gateway needs from its environment is resolved once at
//! startup into a [`Settings`] value. Required variables are hard errors;
//! the bucket and measurement names have defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

const DEFAULT_BUCKET: &str = "datmos";
const DEFAULT_MEASUREMENT: &str = "environment";
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the persisted device registry.
    pub devices_path: PathBuf,
    /// InfluxDB server URL.
    pub hostname: String,
    pub org: String,
    pub token: String,
    pub bucket: String,
    /// Measurement name for emitted points.
    pub measurement: String,
    /// Receiver command line: program followed by its arguments.
    pub rx_command: Vec<String>,
    pub channel_capacity: usize,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("required environment variable {} undefined", name))
}

impl Settings {
    /// Resolve settings from `DATMOS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let devices_path = PathBuf::from(required("DATMOS_DEVICES")?);
        info!(path = %devices_path.display(), "DATMOS_DEVICES");

        let hostname = required("DATMOS_HOSTNAME")?;
        info!(hostname, "DATMOS_HOSTNAME");

        let org = required("DATMOS_ORG")?;
        info!(org, "DATMOS_ORG");

        let token = required("DATMOS_TOKEN")?;
        info!("DATMOS_TOKEN=********");

        let bucket = std::env::var("DATMOS_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.into());
        info!(bucket, "DATMOS_BUCKET");

        let measurement =
            std::env::var("DATMOS_MEASURE").unwrap_or_else(|_| DEFAULT_MEASUREMENT.into());
        info!(measurement, "DATMOS_MEASURE");

        let rx_command = std::env::var("DATMOS_RX_CMD")
            .unwrap_or_else(|_| "sx1276-rx".into())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let settings = Settings {
            devices_path,
            hostname,
            org,
            token,
            bucket,
            measurement,
            rx_command,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        };
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !self.hostname.starts_with("http://") && !self.hostname.starts_with("https://") {
            anyhow::bail!(
                "invalid InfluxDB URL: {} (must start with http:// or https://)",
                self.hostname
            );
        }

        if self.measurement.is_empty() {
            anyhow::bail!("measurement name must not be empty");
        }

        if self.rx_command.is_empty() {
            anyhow::bail!("receiver command must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            devices_path: PathBuf::from("devices.json"),
            hostname: "http://localhost:8086".into(),
            org: "home".into(),
            token: "secret".into(),
            bucket: DEFAULT_BUCKET.into(),
            measurement: DEFAULT_MEASUREMENT.into(),
            rx_command: vec!["sx1276-rx".into()],
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    #[test]
    fn validation() {
        assert!(base().validate().is_ok());

        let mut s = base();
        s.hostname = "localhost:8086".into();
        assert!(s.validate().is_err());

        let mut s = base();
        s.measurement = String::new();
        assert!(s.validate().is_err());

        let mut s = base();
        s.rx_command.clear();
        assert!(s.validate().is_err());
    }
}
