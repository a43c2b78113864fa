//! Divider and programmable timer
//!
//! - `$FF04 (DIV)`: high byte of a free-running 16-bit divider; any write resets it
//! - `$FF05 (TIMA)`: counter, incremented at the rate selected by TAC
//! - `$FF06 (TMA)`: reload value for TIMA on overflow
//! - `$FF07 (TAC)`: bit 2 enable, bits 1-0 clock select (1024/16/64/256 cycles)
//!
//! TIMA counts by accumulating CPU cycles against the selected period. On
//! overflow it reloads from TMA and the caller raises the timer interrupt.

use serde::{Deserialize, Serialize};

use sm83_core::logging::{log, LogCategory, LogLevel};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timer {
    divider: u16,
    tima: u8,
    tma: u8,
    tac: u8,
    tima_cycles: u32,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// TIMA period in CPU cycles for the current clock select
    fn period(&self) -> u32 {
        match self.tac & 0x03 {
            0 => 1024,
            1 => 16,
            2 => 64,
            _ => 256,
        }
    }

    pub fn enabled(&self) -> bool {
        self.tac & 0x04 != 0
    }

    pub fn div(&self) -> u8 {
        (self.divider >> 8) as u8
    }

    pub fn read_register(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => self.div(),
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => self.tac | 0xF8,
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => self.divider = 0,
            0xFF05 => self.tima = val,
            0xFF06 => self.tma = val,
            0xFF07 => {
                if (val ^ self.tac) & 0x03 != 0 {
                    self.tima_cycles = 0;
                }
                self.tac = val & 0x07;
            }
            _ => {}
        }
    }

    /// Advance by `cycles` CPU cycles. Returns true if TIMA overflowed.
    pub fn tima_step(&mut self, cycles: u32) -> bool {
        self.divider = self.divider.wrapping_add(cycles as u16);

        if !self.enabled() {
            return false;
        }

        let period = self.period();
        let mut overflowed = false;
        self.tima_cycles += cycles;
        while self.tima_cycles >= period {
            self.tima_cycles -= period;
            let (next, overflow) = self.tima.overflowing_add(1);
            if overflow {
                self.tima = self.tma;
                overflowed = true;
                log(LogCategory::Timer, LogLevel::Trace, || {
                    format!("Timer: TIMA overflow, reload {:02X}", self.tma)
                });
            } else {
                self.tima = next;
            }
        }
        overflowed
    }
}
