//! BH1750 ambient light sensor
//!
//! Driver over any `embedded-hal` 1.0 I2C bus, and the reading type shared with
//! the acquisition state machine.

use crate::NodeError;
use embedded_hal::i2c::I2c;

/// Lux value carried by an unavailable reading
pub const UNAVAILABLE_LUX: f32 = -1.0;

/// Where a reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Hardware,
    Simulated,
    Unavailable,
}

/// One lux sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub lux: f32,
    pub provenance: Provenance,
}

impl SensorReading {
    pub fn hardware(lux: f32) -> Self {
        Self {
            lux,
            provenance: Provenance::Hardware,
        }
    }

    pub fn simulated(lux: f32) -> Self {
        Self {
            lux,
            provenance: Provenance::Simulated,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            lux: UNAVAILABLE_LUX,
            provenance: Provenance::Unavailable,
        }
    }

    /// True for hardware and simulated readings
    pub fn is_usable(&self) -> bool {
        self.provenance != Provenance::Unavailable
    }
}

/// A light meter reachable over a shared bus
pub trait LightMeter {
    /// Put the device and bus back into a known state. Errors are ignored.
    fn reset_bus(&mut self);

    /// Power the device up and start continuous measurement
    fn handshake(&mut self) -> Result<(), NodeError>;

    /// Latest measurement, without waiting for a new conversion
    fn read_lux(&mut self) -> Result<f32, NodeError>;
}

/// BH1750 opcodes
mod opcode {
    pub const POWER_DOWN: u8 = 0x00;
    pub const POWER_ON: u8 = 0x01;
    pub const RESET: u8 = 0x07;
    pub const CONTINUOUS_HIGH_RES_MODE: u8 = 0x10;
}

/// Counts per lux at the default measurement time
const COUNTS_PER_LUX: f32 = 1.2;

/// BH1750 (GY-30) in continuous high resolution mode
pub struct Bh1750<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Bh1750<I2C> {
    /// Address with ADDR pulled low
    pub const ADDRESS_LOW: u8 = 0x23;
    /// Address with ADDR pulled high
    pub const ADDRESS_HIGH: u8 = 0x5C;

    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn command(&mut self, opcode: u8) -> Result<(), I2C::Error> {
        self.i2c.write(self.address, &[opcode])
    }
}

impl<I2C: I2c> LightMeter for Bh1750<I2C> {
    fn reset_bus(&mut self) {
        // RESET is only accepted while powered on
        self.command(opcode::POWER_DOWN).ok();
        self.command(opcode::POWER_ON).ok();
        self.command(opcode::RESET).ok();
    }

    fn handshake(&mut self) -> Result<(), NodeError> {
        self.command(opcode::POWER_ON)
            .and_then(|_| self.command(opcode::CONTINUOUS_HIGH_RES_MODE))
            .map_err(|_| NodeError::BusHandshakeFailure)
    }

    fn read_lux(&mut self) -> Result<f32, NodeError> {
        let mut raw = [0u8; 2];
        self.i2c
            .read(self.address, &mut raw)
            .map_err(|_| NodeError::TransientReadFailure)?;
        Ok(u16::from_be_bytes(raw) as f32 / COUNTS_PER_LUX)
    }
}
