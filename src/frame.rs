//! Radio frame classification and raw reading extraction
//!
//! Sensor nodes transmit two frame shapes, distinguished by length alone:
//! a 44-byte calibration frame (device id, 33-byte calibration block, and
//! an embedded 10-byte measurement payload) and an 11-byte measurement
//! frame (device id and the 10-byte payload). Anything else is noise.

use crate::bme280::CAL_BLOCK_LEN;
use crate::devices::DeviceId;

const CAL_FRAME_LEN: usize = 44;
const MEAS_FRAME_LEN: usize = 11;
const PAYLOAD_LEN: usize = 10;

/// Raw ADC readings carried by a measurement payload.
///
/// Pressure and temperature are 20-bit nibble-packed big-endian values,
/// humidity is big-endian 16-bit, and the battery ADC is little-endian
/// 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMeasurement {
    pub pressure: u32,
    pub temperature: u32,
    pub humidity: u16,
    pub battery_adc: u16,
}

impl RawMeasurement {
    fn decode(payload: &[u8]) -> Self {
        debug_assert_eq!(payload.len(), PAYLOAD_LEN);
        RawMeasurement {
            pressure: unpack20(payload[0], payload[1], payload[2]),
            temperature: unpack20(payload[3], payload[4], payload[5]),
            humidity: u16::from_be_bytes([payload[6], payload[7]]),
            battery_adc: u16::from_le_bytes([payload[8], payload[9]]),
        }
    }
}

/// 20-bit reading packed as byte0<<12 | byte1<<4 | byte2>>4.
fn unpack20(b0: u8, b1: u8, b2: u8) -> u32 {
    (b0 as u32) << 12 | (b1 as u32) << 4 | (b2 as u32) >> 4
}

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 44 bytes: calibration block plus an embedded measurement that must
    /// be processed right after the block is stored.
    Calibration {
        id: DeviceId,
        block: [u8; CAL_BLOCK_LEN],
        measurement: RawMeasurement,
    },
    /// 11 bytes: one measurement payload.
    Measurement {
        id: DeviceId,
        measurement: RawMeasurement,
    },
    /// Unknown length; logged and dropped by the caller.
    Unrecognized { len: usize },
}

impl Frame {
    /// Classify a raw packet by length and extract its fields.
    pub fn decode(raw: &[u8]) -> Frame {
        match raw.len() {
            CAL_FRAME_LEN => {
                let mut block = [0u8; CAL_BLOCK_LEN];
                block.copy_from_slice(&raw[1..1 + CAL_BLOCK_LEN]);
                Frame::Calibration {
                    id: DeviceId(raw[0]),
                    block,
                    measurement: RawMeasurement::decode(&raw[34..]),
                }
            }
            MEAS_FRAME_LEN => Frame::Measurement {
                id: DeviceId(raw[0]),
                measurement: RawMeasurement::decode(&raw[1..]),
            },
            len => Frame::Unrecognized { len },
        }
    }
}
