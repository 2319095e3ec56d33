//! BME280 calibration decode and compensation
//!
//! Implements the Bosch double-precision compensation formulas for
//! temperature, humidity and pressure, plus a Magnus-formula dew point.
//! All functions here are pure: the fine-temperature intermediate that
//! couples the three conversions is returned by [`temperature`] and passed
//! explicitly into [`humidity`] and [`pressure`].

use serde::{Deserialize, Serialize};

/// Factory compensation coefficients for one BME280.
///
/// Field widths follow the sensor datasheet: `t1`/`p1` unsigned, the rest
/// of the 16-bit coefficients signed, and the humidity group a mix of
/// 8-bit and nibble-packed 12-bit values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    #[serde(rename = "T1")]
    pub t1: u16,
    #[serde(rename = "T2")]
    pub t2: i16,
    #[serde(rename = "T3")]
    pub t3: i16,

    #[serde(rename = "P1")]
    pub p1: u16,
    #[serde(rename = "P2")]
    pub p2: i16,
    #[serde(rename = "P3")]
    pub p3: i16,
    #[serde(rename = "P4")]
    pub p4: i16,
    #[serde(rename = "P5")]
    pub p5: i16,
    #[serde(rename = "P6")]
    pub p6: i16,
    #[serde(rename = "P7")]
    pub p7: i16,
    #[serde(rename = "P8")]
    pub p8: i16,
    #[serde(rename = "P9")]
    pub p9: i16,

    #[serde(rename = "H1")]
    pub h1: u8,
    #[serde(rename = "H2")]
    pub h2: i16,
    #[serde(rename = "H3")]
    pub h3: u8,
    #[serde(rename = "H4")]
    pub h4: i16,
    #[serde(rename = "H5")]
    pub h5: i16,
    #[serde(rename = "H6")]
    pub h6: i8,
}

/// Length of the raw calibration block carried by a calibration frame:
/// 26 temperature/pressure bytes followed by 7 humidity bytes.
pub const CAL_BLOCK_LEN: usize = 33;

impl Calibration {
    /// Decode a raw 33-byte calibration block.
    ///
    /// The temperature/pressure group is little-endian 16-bit pairs; the
    /// humidity group mixes byte-wide fields with the nibble-packed H4/H5
    /// pair, which share `h_cal[4]`.
    pub fn decode(block: &[u8; CAL_BLOCK_LEN]) -> Self {
        let tp = &block[..26];
        let h = &block[26..];

        Calibration {
            t1: u16::from_le_bytes([tp[0], tp[1]]),
            t2: i16::from_le_bytes([tp[2], tp[3]]),
            t3: i16::from_le_bytes([tp[4], tp[5]]),

            p1: u16::from_le_bytes([tp[6], tp[7]]),
            p2: i16::from_le_bytes([tp[8], tp[9]]),
            p3: i16::from_le_bytes([tp[10], tp[11]]),
            p4: i16::from_le_bytes([tp[12], tp[13]]),
            p5: i16::from_le_bytes([tp[14], tp[15]]),
            p6: i16::from_le_bytes([tp[16], tp[17]]),
            p7: i16::from_le_bytes([tp[18], tp[19]]),
            p8: i16::from_le_bytes([tp[20], tp[21]]),
            p9: i16::from_le_bytes([tp[22], tp[23]]),

            h1: tp[25],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            h4: (h[3] as i16) << 4 | (h[4] & 0x0F) as i16,
            h5: ((h[4] & 0xF0) as i16) >> 4 | (h[5] as i16) << 4,
            h6: h[6] as i8,
        }
    }
}

/// Compensate a raw 20-bit temperature reading.
///
/// Returns the temperature in °F together with the `t_fine` intermediate
/// that [`humidity`] and [`pressure`] require. `t_fine` is truncated to
/// `i32` before reuse, matching the sensor datasheet.
pub fn temperature(cal: &Calibration, raw: u32) -> (f64, i32) {
    let uct = raw as f64;
    let t1 = cal.t1 as f64;
    let t2 = cal.t2 as f64;
    let t3 = cal.t3 as f64;

    let v1 = (uct / 16384.0 - t1 / 1024.0) * t2;
    let v2 = (uct / 131072.0 - t1 / 8192.0) * (uct / 131072.0 - t1 / 8192.0) * t3;

    (c_to_f((v1 + v2) / 5120.0), (v1 + v2) as i32)
}

/// Compensate a raw 16-bit humidity reading. Result is clamped to [0, 100] %RH.
pub fn humidity(cal: &Calibration, raw: u16, t_fine: i32) -> f64 {
    let uch = raw as f64;
    let h1 = cal.h1 as f64;
    let h2 = cal.h2 as f64;
    let h3 = cal.h3 as f64;
    let h4 = cal.h4 as f64;
    let h5 = cal.h5 as f64;
    let h6 = cal.h6 as f64;

    let mut h = t_fine as f64 - 76800.0;
    h = (uch - (h4 * 64.0 + h5 / 16384.8 * h))
        * (h2 / 65536.0 * (1.0 + h6 / 67108864.0 * h * (1.0 + h3 / 67108864.0 * h)));
    h *= 1.0 - h1 * h / 524288.0;

    h.clamp(0.0, 100.0)
}

/// Compensate a raw 20-bit pressure reading. Result is in hPa.
///
/// Returns 0.0 when the P1-derived intermediate is zero, which only occurs
/// with uncalibrated or corrupt coefficients. The early return keeps the
/// division from producing Inf/NaN.
pub fn pressure(cal: &Calibration, raw: u32, t_fine: i32) -> f64 {
    let ucp = raw as f64;
    let p1 = cal.p1 as f64;
    let p2 = cal.p2 as f64;
    let p3 = cal.p3 as f64;
    let p4 = cal.p4 as f64;
    let p5 = cal.p5 as f64;
    let p6 = cal.p6 as f64;
    let p7 = cal.p7 as f64;
    let p8 = cal.p8 as f64;
    let p9 = cal.p9 as f64;

    let mut v1 = 0.5 * t_fine as f64 - 64000.0;
    let mut v2 = v1 * v1 * p6 / 32768.0 + v1 * p5 * 2.0;
    v2 = v2 / 4.0 + p4 * 65536.0;
    v1 = (p3 * v1 * v1 / 524288.0 + p2 * v1) / 524288.0;
    v1 = (1.0 + v1 / 32768.0) * p1;
    if v1 == 0.0 {
        return 0.0;
    }

    let mut p = 1048576.0 - ucp;
    p = (p - v2 / 4096.0) * 6250.0 / v1;
    v1 = p9 * p * p / 2147483648.0;
    v2 = p * p8 / 32768.0;
    (p + (v1 + v2 + p7) / 16.0) / 100.0
}

pub fn c_to_f(t: f64) -> f64 {
    t * 1.8 + 32.0
}

pub fn f_to_c(t: f64) -> f64 {
    (t - 32.0) / 1.8
}

// Magnus formula constants.
const BETA: f64 = 17.62;
const LAMBDA: f64 = 243.12;

/// Dew point from temperature (°F) and relative humidity (%), in °F.
pub fn dew_point(t: f64, rh: f64) -> f64 {
    let t = f_to_c(t);
    let rh = rh / 100.0;

    let alpha = rh.ln() + BETA * t / (LAMBDA + t);

    c_to_f(LAMBDA * alpha / (BETA - alpha))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Coefficients from the Bosch datasheet's worked compensation example.
    fn datasheet_cal() -> Calibration {
        Calibration {
            t1: 27504,
            t2: 26435,
            t3: -1000,
            p1: 36477,
            p2: -10685,
            p3: 3024,
            p4: 2855,
            p5: 140,
            p6: -7,
            p7: 15500,
            p8: -14600,
            p9: 6000,
            h1: 75,
            h2: 363,
            h3: 0,
            h4: 317,
            h5: 50,
            h6: 30,
        }
    }

    fn datasheet_block() -> [u8; CAL_BLOCK_LEN] {
        let cal = datasheet_cal();
        let mut block = [0u8; CAL_BLOCK_LEN];
        block[0..2].copy_from_slice(&cal.t1.to_le_bytes());
        block[2..4].copy_from_slice(&cal.t2.to_le_bytes());
        block[4..6].copy_from_slice(&cal.t3.to_le_bytes());
        block[6..8].copy_from_slice(&cal.p1.to_le_bytes());
        block[8..10].copy_from_slice(&cal.p2.to_le_bytes());
        block[10..12].copy_from_slice(&cal.p3.to_le_bytes());
        block[12..14].copy_from_slice(&cal.p4.to_le_bytes());
        block[14..16].copy_from_slice(&cal.p5.to_le_bytes());
        block[16..18].copy_from_slice(&cal.p6.to_le_bytes());
        block[18..20].copy_from_slice(&cal.p7.to_le_bytes());
        block[20..22].copy_from_slice(&cal.p8.to_le_bytes());
        block[22..24].copy_from_slice(&cal.p9.to_le_bytes());
        block[25] = cal.h1;
        block[26..28].copy_from_slice(&cal.h2.to_le_bytes());
        block[28] = cal.h3;
        block[29] = (cal.h4 >> 4) as u8;
        block[30] = ((cal.h4 & 0x0F) as u8) | (((cal.h5 & 0x0F) as u8) << 4);
        block[31] = (cal.h5 >> 4) as u8;
        block[32] = cal.h6 as u8;
        block
    }

    #[test]
    fn decode_round_trips_datasheet_coefficients() {
        assert_eq!(Calibration::decode(&datasheet_block()), datasheet_cal());
    }

    #[test]
    fn decode_nibble_packed_h4_h5() {
        // H4 = b[29]<<4 | b[30]&0x0F, H5 = b[30]>>4 | b[31]<<4, within the
        // 7-byte humidity group at offset 26.
        let mut block = [0u8; CAL_BLOCK_LEN];
        block[29] = 0xAB;
        block[30] = 0xCD;
        block[31] = 0xEF;
        let cal = Calibration::decode(&block);
        assert_eq!(cal.h4, (0xAB_i16) << 4 | 0x0D);
        assert_eq!(cal.h5, 0x0C | (0xEF_i16) << 4);
    }

    #[test]
    fn decode_signed_coefficients() {
        let mut block = [0u8; CAL_BLOCK_LEN];
        block[2..4].copy_from_slice(&(-1000i16).to_le_bytes());
        block[32] = (-5i8) as u8;
        let cal = Calibration::decode(&block);
        assert_eq!(cal.t2, -1000);
        assert_eq!(cal.h6, -5);
    }

    #[test]
    fn temperature_matches_datasheet_sample() {
        // adc_T = 519888 compensates to 25.08 °C in the datasheet example.
        let (t, t_fine) = temperature(&datasheet_cal(), 519888);
        assert!((f_to_c(t) - 25.08).abs() < 0.01, "got {} °C", f_to_c(t));
        assert!((t_fine - 128422).abs() < 100, "t_fine {}", t_fine);
    }

    #[test]
    fn pressure_matches_datasheet_sample() {
        // adc_P = 415148 at the same t_fine compensates to ~1006.5 hPa.
        let (_, t_fine) = temperature(&datasheet_cal(), 519888);
        let p = pressure(&datasheet_cal(), 415148, t_fine);
        assert!((p - 1006.5).abs() < 0.5, "got {} hPa", p);
    }

    #[test]
    fn pressure_degenerate_p1_returns_zero() {
        let mut cal = datasheet_cal();
        cal.p1 = 0;
        cal.p2 = 0;
        cal.p3 = 0;
        for raw in [0u32, 1, 415148, 0xFFFFF] {
            for t_fine in [i32::MIN, -1, 0, 128422, i32::MAX] {
                let p = pressure(&cal, raw, t_fine);
                assert_eq!(p, 0.0);
                assert!(p.is_finite());
            }
        }
    }

    #[test]
    fn humidity_clamped_to_percent_range() {
        let cal = datasheet_cal();
        for raw in [0u16, 1, 30000, u16::MAX] {
            for t_fine in [-1_000_000, 0, 128422, 1_000_000] {
                let h = humidity(&cal, raw, t_fine);
                assert!((0.0..=100.0).contains(&h), "h={} raw={} t_fine={}", h, raw, t_fine);
            }
        }

        // Adversarial coefficients that would otherwise blow out the range.
        let hostile = Calibration {
            h1: u8::MAX,
            h2: i16::MIN,
            h3: u8::MAX,
            h4: i16::MIN,
            h5: i16::MAX,
            h6: i8::MIN,
            ..datasheet_cal()
        };
        for raw in [0u16, u16::MAX] {
            let h = humidity(&hostile, raw, 128422);
            assert!((0.0..=100.0).contains(&h), "h={}", h);
        }
    }

    #[test]
    fn fahrenheit_celsius_round_trip() {
        for x in [-40.0, 0.0, 25.08, 37.5, 100.0] {
            assert!((f_to_c(c_to_f(x)) - x).abs() < 1e-9);
        }
        // -40 is the fixed point of the two scales.
        assert!((c_to_f(-40.0) - -40.0).abs() < 1e-9);
    }

    #[test]
    fn dew_point_monotone_in_humidity() {
        let t = 68.0;
        let mut prev = f64::NEG_INFINITY;
        for rh in (5..=100).step_by(5) {
            let dp = dew_point(t, rh as f64);
            assert!(dp >= prev, "rh={} dp={} prev={}", rh, dp, prev);
            prev = dp;
        }
        // Saturated air: dew point equals the air temperature.
        assert!((dew_point(t, 100.0) - t).abs() < 1e-6);
    }

    #[test]
    fn dew_point_monotone_in_temperature() {
        let rh = 60.0;
        let mut prev = f64::NEG_INFINITY;
        for t in (32..=110).step_by(2) {
            let dp = dew_point(t as f64, rh);
            assert!(dp >= prev, "t={} dp={} prev={}", t, dp, prev);
            prev = dp;
        }
    }

    #[test]
    fn dew_point_below_temperature_when_unsaturated() {
        assert!(dew_point(75.0, 50.0) < 75.0);
    }
}
