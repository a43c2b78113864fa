//! Serial port (`$FF01` SB, `$FF02` SC)
//!
//! No link partner is emulated. A transfer started with the internal clock
//! shifts the outgoing byte out over 8 bit-times, receives 0xFF, and raises the
//! serial interrupt. Outgoing bytes are collected so test ROMs that report
//! through the link port can be read back.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use sm83_core::logging::{log, LogCategory, LogLevel};

/// 8 bits at 8192 Hz
const TRANSFER_CYCLES: u32 = 4096;

/// Bytes kept for the host; the oldest are dropped once full
pub const OUTPUT_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Serial {
    sb: u8,
    sc: u8,
    cycles: u32,
    #[serde(skip)]
    output: VecDeque<u8>,
}

impl Serial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.sb = 0;
        self.sc = 0;
        self.cycles = 0;
    }

    fn transferring(&self) -> bool {
        self.sc & 0x81 == 0x81
    }

    pub fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF01 => self.sb,
            0xFF02 => self.sc | 0x7E,
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF01 => self.sb = val,
            0xFF02 => {
                self.sc = val;
                self.cycles = 0;
            }
            _ => {}
        }
    }

    /// Advance the shift clock. Returns true when a transfer completes.
    pub fn step(&mut self, cycles: u32) -> bool {
        if !self.transferring() {
            return false;
        }
        self.cycles += cycles;
        if self.cycles < TRANSFER_CYCLES {
            return false;
        }

        self.cycles = 0;
        if self.output.len() == OUTPUT_CAPACITY {
            self.output.pop_front();
        }
        self.output.push_back(self.sb);
        log(LogCategory::Bus, LogLevel::Trace, || {
            format!("Serial: sent {:02X}", self.sb)
        });
        self.sb = 0xFF;
        self.sc &= 0x7F;
        true
    }

    /// Drain bytes sent so far
    pub fn take_output(&mut self) -> Vec<u8> {
        self.output.drain(..).collect()
    }
}
