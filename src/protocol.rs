//! Register protocol for 4-wire SPI accelerometers
//!
//! Every transaction starts with an address byte: bits 0-5 select the
//! register, bit 6 selects multi-byte (burst) mode and bit 7 selects a
//! read. Response byte 0 is clocked in while the address goes out and
//! carries no data.

use crate::bus::SpiTransport;
use crate::error::{AccelError, Result};

/// Address bit selecting a read transaction
pub const READ_BIT: u8 = 0x80;
/// Address bit selecting multi-byte (auto-increment) mode
pub const BURST_BIT: u8 = 0x40;
/// Highest addressable register
pub const MAX_REGISTER: u8 = 0x3F;

/// Register-level access to one device on an owned transport
pub struct RegisterBus<T: SpiTransport> {
    transport: T,
}

impl<T: SpiTransport> RegisterBus<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Write a single byte to a register
    pub fn write_register(&mut self, addr: u8, value: u8) -> Result<()> {
        check_address(addr)?;
        self.transport.transfer(&[addr, value])?;
        Ok(())
    }

    /// Read a single byte from a register
    pub fn read_register(&mut self, addr: u8) -> Result<u8> {
        check_address(addr)?;
        let response = self.transport.transfer(&[addr | READ_BIT, 0x00])?;
        match response.get(1) {
            Some(&value) => Ok(value),
            None => Err(AccelError::ShortRead {
                expected: 2,
                actual: response.len(),
            }),
        }
    }

    /// Read `length` consecutive registers in one transaction
    ///
    /// Fails with [`AccelError::ShortRead`] when the transport returns fewer
    /// than `length + 1` bytes; partial data is never returned.
    pub fn read_burst(&mut self, addr: u8, length: usize) -> Result<Vec<u8>> {
        check_address(addr)?;

        let mut frame = vec![0u8; length + 1];
        frame[0] = addr | READ_BIT | BURST_BIT;

        let response = self.transport.transfer(&frame)?;
        if response.len() < length + 1 {
            return Err(AccelError::ShortRead {
                expected: length + 1,
                actual: response.len(),
            });
        }

        Ok(response[1..=length].to_vec())
    }
}

fn check_address(addr: u8) -> Result<()> {
    if addr > MAX_REGISTER {
        return Err(AccelError::InvalidParameter(format!(
            "Register address 0x{:02X} exceeds 0x{:02X}",
            addr, MAX_REGISTER
        )));
    }
    Ok(())
}
