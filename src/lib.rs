//! datmos: LoRa BME280 sensor gateway
//!
//! Receives radio packets from battery-powered sensor nodes, decodes
//! per-node factory calibration, compensates raw ADC readings into
//! physical units and forwards one point per measurement to InfluxDB.

pub mod bme280;
pub mod config;
pub mod devices;
pub mod frame;
pub mod gateway;
pub mod influxdb;
pub mod radio;
