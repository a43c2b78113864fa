//! MBC3 real-time clock
//!
//! The clock keeps its logical time fields plus the wall-clock timestamp of the
//! last time they were brought up to date. Elapsed time is folded in lazily:
//! views compute it on the fly, mutations commit it first.
//!
//! # Registers (selected through the MBC3 RAM bank register)
//!
//! - 0x08: seconds (0-59)
//! - 0x09: minutes (0-59)
//! - 0x0A: hours (0-23)
//! - 0x0B: day counter, low 8 bits
//! - 0x0C: bit 0 day counter bit 8, bit 6 halt, bit 7 day-counter carry
//!
//! Reads always return the latched copy, refreshed by writing 0x00 then 0x01 to
//! the latch region.
//!
//! # Save format
//!
//! The `.rtc` sidecar file holds seconds, minutes, hours, day-low, day-high, then
//! the last-update timestamp as a little-endian `u64` of Unix seconds.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sm83_core::logging::{log, LogCategory, LogLevel};

const DH_DAY_BIT8: u8 = 0x01;
const DH_HALT: u8 = 0x40;
const DH_CARRY: u8 = 0x80;

/// Length of the `.rtc` sidecar file
pub const RTC_FILE_LEN: usize = 5 + 8;

/// Wall-clock source for the RTC
pub trait RtcClock: fmt::Debug {
    /// Current time in seconds since the Unix epoch
    fn now(&self) -> u64;
}

/// Host clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl RtcClock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Hand-driven clock; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::Relaxed);
    }
}

impl RtcClock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Logical clock value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RtcValue {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    /// 9-bit day counter
    pub days: u16,
    pub halted: bool,
    /// Set when the day counter overflows past 511; sticky until written
    pub day_carry: bool,
}

impl RtcValue {
    /// Add `secs` of elapsed time unless halted
    pub fn advance(&mut self, secs: u64) {
        if self.halted || secs == 0 {
            return;
        }

        let total = self.seconds as u64
            + self.minutes as u64 * 60
            + self.hours as u64 * 3600
            + self.days as u64 * 86_400
            + secs;

        self.seconds = (total % 60) as u8;
        self.minutes = (total / 60 % 60) as u8;
        self.hours = (total / 3600 % 24) as u8;
        let days = total / 86_400;
        if days > 511 {
            self.day_carry = true;
        }
        self.days = (days % 512) as u16;
    }

    fn day_high(&self) -> u8 {
        let mut dh = ((self.days >> 8) as u8) & DH_DAY_BIT8;
        if self.halted {
            dh |= DH_HALT;
        }
        if self.day_carry {
            dh |= DH_CARRY;
        }
        dh
    }

    /// Register view by select value 0x08-0x0C
    pub fn register(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.seconds,
            0x09 => self.minutes,
            0x0A => self.hours,
            0x0B => self.days as u8,
            0x0C => self.day_high(),
            _ => 0xFF,
        }
    }

    pub fn set_register(&mut self, reg: u8, val: u8) {
        match reg {
            0x08 => self.seconds = val & 0x3F,
            0x09 => self.minutes = val & 0x3F,
            0x0A => self.hours = val & 0x1F,
            0x0B => self.days = (self.days & 0x100) | val as u16,
            0x0C => {
                self.days = (self.days & 0xFF) | (((val & DH_DAY_BIT8) as u16) << 8);
                self.halted = val & DH_HALT != 0;
                self.day_carry = val & DH_CARRY != 0;
            }
            _ => {}
        }
    }

    fn to_bytes(self) -> [u8; 5] {
        [
            self.seconds,
            self.minutes,
            self.hours,
            self.days as u8,
            self.day_high(),
        ]
    }

    fn from_bytes(b: &[u8]) -> Self {
        let mut v = RtcValue::default();
        for (i, byte) in b.iter().take(5).enumerate() {
            v.set_register(0x08 + i as u8, *byte);
        }
        v
    }
}

/// MBC3 clock chip
#[derive(Debug)]
pub struct Rtc {
    live: RtcValue,
    latched: RtcValue,
    last_update: u64,
    latch_armed: bool,
    clock: Box<dyn RtcClock>,
}

impl Rtc {
    pub fn new(clock: Box<dyn RtcClock>) -> Self {
        let last_update = clock.now();
        Self {
            live: RtcValue::default(),
            latched: RtcValue::default(),
            last_update,
            latch_armed: false,
            clock,
        }
    }

    /// Live value including time elapsed since the last update
    pub fn current(&self) -> RtcValue {
        let mut v = self.live;
        v.advance(self.clock.now().saturating_sub(self.last_update));
        v
    }

    pub fn latched(&self) -> RtcValue {
        self.latched
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Commit elapsed time into the live value
    fn sync(&mut self) {
        let now = self.clock.now();
        self.live.advance(now.saturating_sub(self.last_update));
        self.last_update = now;
    }

    /// Latch region write: 0x00 arms, a following 0x01 copies live into latched
    pub fn write_latch(&mut self, val: u8) {
        if val == 0x00 {
            self.latch_armed = true;
            return;
        }
        if val == 0x01 && self.latch_armed {
            self.sync();
            self.latched = self.live;
            log(LogCategory::Cartridge, LogLevel::Debug, || {
                format!(
                    "MBC3: RTC latched {}d {:02}:{:02}:{:02}",
                    self.latched.days, self.latched.hours, self.latched.minutes, self.latched.seconds
                )
            });
        }
        self.latch_armed = false;
    }

    pub fn read_register(&self, reg: u8) -> u8 {
        self.latched.register(reg)
    }

    pub fn write_register(&mut self, reg: u8, val: u8) {
        self.sync();
        self.live.set_register(reg, val);
    }

    pub fn reset(&mut self) {
        self.latch_armed = false;
    }

    pub fn save(&self, path: &Path) -> bool {
        let mut buf = Vec::with_capacity(RTC_FILE_LEN);
        buf.extend_from_slice(&self.current().to_bytes());
        buf.extend_from_slice(&self.clock.now().to_le_bytes());

        match fs::write(path, &buf) {
            Ok(()) => {
                log(LogCategory::Cartridge, LogLevel::Debug, || {
                    format!("MBC3: RTC saved to {}", path.display())
                });
                true
            }
            Err(e) => {
                log(LogCategory::Cartridge, LogLevel::Error, || {
                    format!("MBC3: failed to save RTC to {}: {}", path.display(), e)
                });
                false
            }
        }
    }

    pub fn load(&mut self, path: &Path) -> bool {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                log(LogCategory::Cartridge, LogLevel::Error, || {
                    format!("MBC3: failed to load RTC from {}: {}", path.display(), e)
                });
                return false;
            }
        };

        if data.len() < RTC_FILE_LEN {
            log(LogCategory::Cartridge, LogLevel::Error, || {
                format!(
                    "MBC3: RTC file {} is {} bytes, expected {}",
                    path.display(),
                    data.len(),
                    RTC_FILE_LEN
                )
            });
            return false;
        }

        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&data[5..RTC_FILE_LEN]);
        self.live = RtcValue::from_bytes(&data[..5]);
        self.latched = self.live;
        self.last_update = u64::from_le_bytes(stamp);
        log(LogCategory::Cartridge, LogLevel::Debug, || {
            format!("MBC3: RTC loaded from {}", path.display())
        });
        true
    }
}
