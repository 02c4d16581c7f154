#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Light Control Node Library
//!
//! This library provides the core of an environmental-control node: a bounded,
//! rotating multi-channel log store and a fault-tolerant ambient light
//! acquisition state machine, plus the thin control loop that ties them to a relay.

extern crate alloc;

pub mod clock;
pub mod control;
pub mod diagnostic;
pub mod light_sensor;
pub mod log_store;
#[cfg(feature = "device")]
pub mod sd_medium;
pub mod state_machine;
pub mod storage;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// Relay output GPIO pin
    pub const RELAY_PIN: u8 = 4;

    /// I2C data pin for the light sensor
    pub const I2C_SDA_PIN: u8 = 5;

    /// I2C clock pin for the light sensor
    pub const I2C_SCL_PIN: u8 = 6;

    /// I2C bus frequency in kHz
    pub const I2C_FREQUENCY_KHZ: u32 = 100;

    /// SD card SPI pins
    pub const SD_SCK_PIN: u8 = 10;
    pub const SD_MOSI_PIN: u8 = 7;
    pub const SD_MISO_PIN: u8 = 2;
    pub const SD_CS_PIN: u8 = 3;

    /// SD SPI initialization frequency in kHz (slow for card init)
    pub const SD_SPI_INIT_FREQ_KHZ: u32 = 400;

    /// Logical directory holding every log stream
    pub const LOG_DIR: &str = "LOGS";

    /// Lines kept by a rotation
    pub const LOG_RETAIN_LINES: usize = 80;

    /// Handshake attempts made by `begin`
    pub const SENSOR_PROBE_ATTEMPTS: u32 = 3;

    /// Delay between handshake attempts in milliseconds
    pub const SENSOR_PROBE_DELAY_MS: u32 = 500;

    /// Settle time after a bus reset in milliseconds
    pub const SENSOR_BUS_SETTLE_MS: u32 = 100;

    /// Simulated signal update interval in milliseconds
    pub const SENSOR_SIMULATION_INTERVAL_MS: u64 = 5000;

    /// Reconnection interval while the sensor is lost, in milliseconds
    pub const SENSOR_RECONNECT_INTERVAL_MS: u64 = 10000;

    /// Relay decision interval in milliseconds
    pub const CHECK_INTERVAL_MS: u64 = 10000;

    /// Telemetry logging interval in milliseconds
    pub const SENSOR_LOG_INTERVAL_MS: u64 = 5000;

    /// Control loop tick period in milliseconds
    pub const CONTROL_TICK_MS: u64 = 100;

    /// Light threshold in lux, read from the environment at compile time
    pub const LIGHT_THRESHOLD_LUX: &str = env!("NODE_LIGHT_THRESHOLD");

    /// Per-channel log cap in bytes, read from the environment at compile time
    pub const LOG_MAX_SIZE: &str = env!("NODE_LOG_MAX_SIZE");

    /// Parsed light threshold, falling back to 500 lux
    pub fn light_threshold() -> f32 {
        LIGHT_THRESHOLD_LUX.parse().unwrap_or(500.0)
    }

    /// Parsed log cap, falling back to 50 KiB
    pub fn log_max_size() -> u32 {
        LOG_MAX_SIZE.parse().unwrap_or(50 * 1024)
    }
}

/// Error types for the light control node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// Storage not mounted or not initialized
    MediumUnavailable,
    /// A named stream could not be opened
    StreamOpenFailure,
    /// Writing to or reading from an open stream failed
    StreamWriteFailure,
    /// The medium has no room left for the write
    OutOfSpace,
    /// The light sensor did not answer the handshake
    BusHandshakeFailure,
    /// A single sensor read failed
    TransientReadFailure,
}

impl core::fmt::Display for NodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            NodeError::MediumUnavailable => "storage medium unavailable",
            NodeError::StreamOpenFailure => "stream open failed",
            NodeError::StreamWriteFailure => "stream write failed",
            NodeError::OutOfSpace => "storage medium full",
            NodeError::BusHandshakeFailure => "sensor handshake failed",
            NodeError::TransientReadFailure => "sensor read failed",
        };
        f.write_str(text)
    }
}
