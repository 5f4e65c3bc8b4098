//! Error types for the dual ADXL345 logger

use thiserror::Error;

/// Error type for acquisition, storage and export operations
#[derive(Error, Debug)]
pub enum AccelError {
    /// SPI transport reported a transfer failure
    #[error("SPI bus error: {0}")]
    Bus(#[source] std::io::Error),

    /// Burst read returned fewer bytes than the frame it was sent with
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// DEVID register did not match the ADXL345 identity byte
    #[error("ADXL345 not found on channel {channel}: expected DEVID 0xE5, got 0x{found:02X}")]
    DeviceNotFound { channel: u8, found: u8 },

    /// Persisting a round failed
    #[error("Sample store write failed: {0}")]
    StoreWrite(String),

    /// Querying the sample store failed
    #[error("Sample store read failed: {0}")]
    StoreRead(String),

    /// GPIO character device error
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Rendering a snapshot image failed
    #[error("Render error: {0}")]
    Render(String),

    /// Acquisition thread panicked
    #[error("Acquisition thread panicked")]
    WorkerPanic,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Filesystem error outside the sample store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AccelError {
    /// Errors that must keep the acquisition loop from ever starting
    pub fn is_init_fatal(&self) -> bool {
        matches!(self, AccelError::DeviceNotFound { .. })
    }

    /// Errors that abort the round in progress and end acquisition
    pub fn is_round_fatal(&self) -> bool {
        matches!(
            self,
            AccelError::Bus(_) | AccelError::ShortRead { .. } | AccelError::StoreWrite(_)
        )
    }
}

/// Result type for logger operations
pub type Result<T> = std::result::Result<T, AccelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classification() {
        let not_found = AccelError::DeviceNotFound { channel: 1, found: 0x00 };
        assert!(not_found.is_init_fatal());
        assert!(!not_found.is_round_fatal());

        let short = AccelError::ShortRead { expected: 7, actual: 3 };
        assert!(short.is_round_fatal());
        assert!(!short.is_init_fatal());

        let bus = AccelError::Bus(std::io::Error::new(std::io::ErrorKind::Other, "nack"));
        assert!(bus.is_round_fatal());

        assert!(AccelError::StoreWrite("disk full".into()).is_round_fatal());
        assert!(!AccelError::Render("no font".into()).is_round_fatal());
    }

    #[test]
    fn test_device_not_found_message() {
        let err = AccelError::DeviceNotFound { channel: 0, found: 0x3F };
        assert_eq!(
            err.to_string(),
            "ADXL345 not found on channel 0: expected DEVID 0xE5, got 0x3F"
        );
    }
}
