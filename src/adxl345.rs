//! ADXL345 sensor channel driver over 4-wire SPI

use crate::bus::SpiTransport;
use crate::error::{AccelError, Result};
use crate::protocol::RegisterBus;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

// ADXL345 register addresses
pub const REG_DEVID: u8 = 0x00;
pub const REG_BW_RATE: u8 = 0x2C;
pub const REG_POWER_CTL: u8 = 0x2D;
pub const REG_DATAX0: u8 = 0x32;

/// Expected DEVID value
pub const DEVID_VALUE: u8 = 0xE5;

/// POWER_CTL measure bit
const POWER_CTL_MEASURE: u8 = 0x08;

/// Bytes in one X/Y/Z burst (DATAX0..DATAZ1)
const SAMPLE_BYTES: usize = 6;

/// Linear scale: g per LSB
pub const SCALE_G_PER_LSB: f64 = 0.004;

/// Output data rate, as written to BW_RATE
///
/// The rate code also selects the plot range used at export time (see
/// [`crate::export::plot_bound`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRate {
    Hz0_10 = 0x0,
    Hz0_20 = 0x1,
    Hz0_39 = 0x2,
    Hz0_78 = 0x3,
    Hz1_56 = 0x4,
    Hz3_13 = 0x5,
    Hz6_25 = 0x6,
    Hz12_5 = 0x7,
    Hz25 = 0x8,
    Hz50 = 0x9,
    Hz100 = 0xA,
    Hz200 = 0xB,
    Hz400 = 0xC,
    Hz800 = 0xD,
    Hz1600 = 0xE,
    Hz3200 = 0xF,
}

const RATE_TABLE: [(DataRate, &str, f64); 16] = [
    (DataRate::Hz3200, "3200hz", 3200.0),
    (DataRate::Hz1600, "1600hz", 1600.0),
    (DataRate::Hz800, "800hz", 800.0),
    (DataRate::Hz400, "400hz", 400.0),
    (DataRate::Hz200, "200hz", 200.0),
    (DataRate::Hz100, "100hz", 100.0),
    (DataRate::Hz50, "50hz", 50.0),
    (DataRate::Hz25, "25hz", 25.0),
    (DataRate::Hz12_5, "12.5hz", 12.5),
    (DataRate::Hz6_25, "6.25hz", 6.25),
    (DataRate::Hz3_13, "3.13hz", 3.13),
    (DataRate::Hz1_56, "1.56hz", 1.56),
    (DataRate::Hz0_78, "0.78hz", 0.78),
    (DataRate::Hz0_39, "0.39hz", 0.39),
    (DataRate::Hz0_20, "0.20hz", 0.20),
    (DataRate::Hz0_10, "0.10hz", 0.10),
];

impl DataRate {
    /// BW_RATE register code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a rate by its 4-bit register code
    pub fn from_code(code: u8) -> Option<Self> {
        RATE_TABLE
            .iter()
            .find(|(rate, _, _)| rate.code() == code)
            .map(|(rate, _, _)| *rate)
    }

    /// Nominal output data rate in Hz
    pub fn hz(self) -> f64 {
        self.entry().2
    }

    /// Label accepted on the command line, e.g. `100hz`
    pub fn label(self) -> &'static str {
        self.entry().1
    }

    fn entry(self) -> &'static (DataRate, &'static str, f64) {
        // Every variant is in the table
        &RATE_TABLE[(0xF - self.code()) as usize]
    }
}

impl Default for DataRate {
    fn default() -> Self {
        DataRate::Hz3200
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:X})", self.label(), self.code())
    }
}

impl FromStr for DataRate {
    type Err = AccelError;

    /// Accepts labels (`3200hz`, `12.5HZ`) or register codes (`0xA`, `10`)
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();

        if let Some((rate, _, _)) = RATE_TABLE.iter().find(|(_, label, _)| *label == s) {
            return Ok(*rate);
        }

        let code = match s.strip_prefix("0x") {
            Some(hex) => u8::from_str_radix(hex, 16).ok(),
            None => s.parse::<u8>().ok(),
        };

        code.and_then(DataRate::from_code).ok_or_else(|| {
            AccelError::InvalidParameter(format!(
                "Unknown data rate '{}' (expected e.g. 3200hz, 100hz, 0xA)",
                s
            ))
        })
    }
}

/// Raw X/Y/Z reading in LSB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReading {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl RawReading {
    /// Decode DATAX0..DATAZ1 (three little-endian i16)
    pub fn from_le_bytes(bytes: &[u8; SAMPLE_BYTES]) -> Self {
        Self {
            x: i16::from_le_bytes([bytes[0], bytes[1]]),
            y: i16::from_le_bytes([bytes[2], bytes[3]]),
            z: i16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }

    /// Convert to g using the fixed linear scale
    pub fn to_g(&self) -> (f64, f64, f64) {
        (raw_to_g(self.x), raw_to_g(self.y), raw_to_g(self.z))
    }
}

/// Convert one raw axis value to g
pub fn raw_to_g(raw: i16) -> f64 {
    f64::from(raw) * SCALE_G_PER_LSB
}

/// One ADXL345 on its own SPI bus
///
/// The bus is owned exclusively and released when the channel is dropped.
pub struct Adxl345<T: SpiTransport> {
    bus: RegisterBus<T>,
    channel_id: u8,
    data_rate: Option<DataRate>,
}

impl<T: SpiTransport> Adxl345<T> {
    /// Wrap a transport; the device is not touched until [`Self::initialize`]
    pub fn new(transport: T, channel_id: u8) -> Self {
        Self {
            bus: RegisterBus::new(transport),
            channel_id,
            data_rate: None,
        }
    }

    /// Verify identity, enter measurement mode and set the data rate
    ///
    /// # Returns
    /// * `Err(AccelError::DeviceNotFound)` - DEVID mismatch (not retried)
    /// * `Err(AccelError::InvalidParameter)` - called twice
    pub fn initialize(&mut self, data_rate: DataRate) -> Result<()> {
        if self.data_rate.is_some() {
            return Err(AccelError::InvalidParameter(format!(
                "Channel {} is already initialized",
                self.channel_id
            )));
        }

        let devid = self.bus.read_register(REG_DEVID)?;
        if devid != DEVID_VALUE {
            return Err(AccelError::DeviceNotFound {
                channel: self.channel_id,
                found: devid,
            });
        }

        self.bus.write_register(REG_POWER_CTL, POWER_CTL_MEASURE)?;
        self.bus.write_register(REG_BW_RATE, data_rate.code())?;
        self.data_rate = Some(data_rate);

        info!(channel = self.channel_id, rate = %data_rate, "adxl345 initialized");
        Ok(())
    }

    /// Burst-read X/Y/Z without scaling
    pub fn read_raw(&mut self) -> Result<RawReading> {
        if self.data_rate.is_none() {
            return Err(AccelError::InvalidParameter(format!(
                "Channel {} read before initialize",
                self.channel_id
            )));
        }

        let bytes = self.bus.read_burst(REG_DATAX0, SAMPLE_BYTES)?;
        let bytes: [u8; SAMPLE_BYTES] = bytes.as_slice().try_into().map_err(|_| {
            AccelError::ShortRead {
                expected: SAMPLE_BYTES,
                actual: bytes.len(),
            }
        })?;

        Ok(RawReading::from_le_bytes(&bytes))
    }

    /// Read one 3-axis sample in g
    pub fn read_sample(&mut self) -> Result<(f64, f64, f64)> {
        Ok(self.read_raw()?.to_g())
    }

    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// Configured data rate, once initialized
    pub fn data_rate(&self) -> Option<DataRate> {
        self.data_rate
    }
}

impl<T: SpiTransport> Drop for Adxl345<T> {
    fn drop(&mut self) {
        debug!(channel = self.channel_id, "sensor channel closed");
    }
}
