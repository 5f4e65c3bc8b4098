//! SPI transport layer
//!
//! The register driver only needs one primitive from the bus: a
//! full-duplex transfer that clocks out a frame and returns whatever was
//! clocked in. `SpidevBus` provides it on Linux through the spidev
//! character device; tests use [`crate::mock::MockAdxl345`].

use crate::error::{AccelError, Result};
use linux_embedded_hal::spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Full-duplex synchronous serial transfer primitive
pub trait SpiTransport {
    /// Clock `bytes_out` onto the bus and return the bytes clocked in.
    ///
    /// A well-behaved transport returns exactly `bytes_out.len()` bytes;
    /// callers must still check the length before decoding.
    fn transfer(&mut self, bytes_out: &[u8]) -> Result<Vec<u8>>;
}

impl<T: SpiTransport + ?Sized> SpiTransport for Box<T> {
    fn transfer(&mut self, bytes_out: &[u8]) -> Result<Vec<u8>> {
        (**self).transfer(bytes_out)
    }
}

/// SPI clock polarity/phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl SpiMode {
    fn flags(self) -> SpiModeFlags {
        match self {
            SpiMode::Mode0 => SpiModeFlags::SPI_MODE_0,
            SpiMode::Mode1 => SpiModeFlags::SPI_MODE_1,
            SpiMode::Mode2 => SpiModeFlags::SPI_MODE_2,
            SpiMode::Mode3 => SpiModeFlags::SPI_MODE_3,
        }
    }
}

/// Configuration for one spidev bus
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Device node, e.g. `/dev/spidev0.0`
    pub path: PathBuf,
    /// Maximum clock rate in Hz
    pub max_speed_hz: u32,
    /// Clock mode (the ADXL345 requires mode 3)
    pub mode: SpiMode,
}

impl BusConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/spidev0.0"),
            max_speed_hz: 5_000_000,
            mode: SpiMode::Mode3,
        }
    }
}

/// Linux spidev-backed transport
///
/// The device node is closed when the value is dropped.
pub struct SpidevBus {
    spi: Spidev,
    path: PathBuf,
}

impl SpidevBus {
    /// Open and configure a spidev device
    pub fn open(config: &BusConfig) -> Result<Self> {
        let mut spi = Spidev::open(&config.path).map_err(AccelError::Bus)?;

        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(config.max_speed_hz)
            .mode(config.mode.flags())
            .build();
        spi.configure(&options).map_err(AccelError::Bus)?;

        info!(
            path = %config.path.display(),
            speed_hz = config.max_speed_hz,
            mode = ?config.mode,
            "spi bus opened"
        );

        Ok(Self {
            spi,
            path: config.path.clone(),
        })
    }
}

impl SpiTransport for SpidevBus {
    fn transfer(&mut self, bytes_out: &[u8]) -> Result<Vec<u8>> {
        let mut bytes_in = vec![0u8; bytes_out.len()];
        {
            let mut transfer = SpidevTransfer::read_write(bytes_out, &mut bytes_in);
            self.spi.transfer(&mut transfer).map_err(AccelError::Bus)?;
        }
        Ok(bytes_in)
    }
}

impl Drop for SpidevBus {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "spi bus released");
    }
}
