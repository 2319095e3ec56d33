//! Device registry: calibration store and on-disk config
//!
//! Maps each 8-bit node id to a display name and its BME280 calibration.
//! The whole map is the unit of persistence: one JSON file, overwritten on
//! save, keyed by 2-digit hex ids:
//!
//! ```json
//! { "A3": { "Name": "porch", "BME280": { "T1": 27504, ... } } }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use crate::bme280::{Calibration, CAL_BLOCK_LEN};

/// 8-bit sensor node identifier. Textual form is 2-digit hex,
/// case-insensitive on input, uppercase on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u8);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 2 {
            anyhow::bail!("invalid device id length: {:?}", s);
        }
        let byte = u8::from_str_radix(s, 16)
            .with_context(|| format!("invalid device id: {:?}", s))?;
        Ok(DeviceId(byte))
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = DeviceId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 2-digit hex device id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<DeviceId, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

/// One sensor node: display name plus its compensation coefficients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "BME280")]
    pub bme280: Calibration,
    /// True once a calibration frame has been seen this session. Devices
    /// loaded from disk are compensable by map presence alone.
    #[serde(skip)]
    pub calibrated: bool,
}

impl Device {
    /// Display name, defaulting to "unnamed" for devices that have only
    /// ever been heard over the air.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "unnamed"
        } else {
            &self.name
        }
    }
}

/// The full device registry. All mutation happens on the gateway loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceMap(pub BTreeMap<DeviceId, Device>);

impl DeviceMap {
    /// Load the registry from disk. A missing file yields an empty map;
    /// any other read or parse error is fatal to startup.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "device file does not exist, starting empty");
                return Ok(DeviceMap::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Overwrite the on-disk registry with the in-memory one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).context("encoding device map")?;
        std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
    }

    /// Merge a freshly loaded registry into this one and commit the merged
    /// result back to disk. Entries in the new file overwrite same-id
    /// entries here; entries present only in memory are preserved. A
    /// failed read aborts the merge and leaves the map untouched.
    pub fn reload(&mut self, path: &Path) -> Result<()> {
        let fresh = DeviceMap::load(path)?;
        for (id, dev) in fresh.0 {
            self.0.insert(id, dev);
        }
        self.save(path)
    }

    /// Decode a raw 33-byte calibration block into the device's
    /// coefficients, creating the device on first sight. Marks it
    /// calibrated.
    pub fn apply_calibration(&mut self, id: DeviceId, block: &[u8; CAL_BLOCK_LEN]) {
        let dev = self.0.entry(id).or_default();
        dev.bme280 = Calibration::decode(block);
        dev.calibrated = true;
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.0.get(&id)
    }
}
