//! In-memory transceiver register file.

use std::collections::BTreeMap;

use skylink_transport::radio::{write_command, RegisterBus};
use skylink_transport::TransportError;

/// Register bus backed by a map, recording every write in order.
#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    regs: BTreeMap<u8, u8>,
    writes: Vec<(u8, u8)>,
    /// Fail every access once this many writes have succeeded.
    fail_after: Option<usize>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that breaks after `writes` successful writes.
    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    /// Current value of `reg`; unset registers read as zero.
    pub fn get(&self, reg: u8) -> u8 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    pub fn preset(&mut self, reg: u8, value: u8) {
        self.regs.insert(reg, value);
    }

    pub fn writes(&self) -> &[(u8, u8)] {
        &self.writes
    }

    /// The writes as they would appear on the SPI bus.
    pub fn spi_log(&self) -> Vec<[u8; 2]> {
        self.writes.iter().map(|&(r, v)| write_command(r, v)).collect()
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.fail_after {
            Some(n) if self.writes.len() >= n => Err(TransportError::Disconnected),
            _ => Ok(()),
        }
    }
}

impl RegisterBus for RegisterFile {
    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), TransportError> {
        self.check()?;
        self.regs.insert(reg, value);
        self.writes.push((reg, value));
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, TransportError> {
        self.check()?;
        Ok(self.get(reg))
    }
}
