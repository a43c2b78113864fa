//! Cartridge memory bank controllers (MBCs)
//!
//! Every controller maps the CPU windows 0x0000-0x7FFF (ROM) and 0xA000-0xBFFF
//! (external RAM) onto cartridge storage and decodes writes to the ROM window as
//! banking register writes.
//!
//! Effective banks are recomputed on every banking register write and masked
//! against the physical bank count, so oversized selections mirror the way the
//! real address lines wrap. RAM reads return 0xFF and writes are dropped while
//! RAM is disabled or absent.

mod mbc0;
mod mbc1;
mod mbc2;
mod mbc3;
mod mbc5;
pub mod rtc;

use std::fs;
use std::path::Path;

use sm83_core::logging::{log, LogCategory, LogLevel};

pub use mbc0::Mbc0;
pub use mbc1::Mbc1;
pub use mbc2::Mbc2;
pub use mbc3::{rtc_path, Mbc3};
pub use mbc5::Mbc5;
pub use rtc::{ManualClock, RtcClock, RtcValue, SystemClock};

use crate::cartridge::{CartridgeType, MbcKind};

pub const ROM_BANK_SIZE: usize = 0x4000;
pub const RAM_BANK_SIZE: usize = 0x2000;

/// Number of 16KB ROM banks, rounded up to a power of two so it can be used as a mask
pub(crate) fn rom_bank_count(len: usize) -> usize {
    len.div_ceil(ROM_BANK_SIZE).max(2).next_power_of_two()
}

/// Number of 8KB RAM banks (RAM smaller than a bank still counts as one)
pub(crate) fn ram_bank_count(len: usize) -> usize {
    if len == 0 {
        0
    } else {
        len.div_ceil(RAM_BANK_SIZE).next_power_of_two()
    }
}

/// Byte at `bank`:`offset`, mirroring inside the physical ROM
pub(crate) fn rom_byte(rom: &[u8], bank: usize, offset: u16) -> u8 {
    if rom.is_empty() {
        return 0xFF;
    }
    rom[(bank * ROM_BANK_SIZE + (offset as usize & (ROM_BANK_SIZE - 1))) % rom.len()]
}

/// Offset into external RAM for `bank` and a CPU address in 0xA000-0xBFFF
pub(crate) fn ram_offset(ram: &[u8], bank: usize, addr: u16) -> Option<usize> {
    if ram.is_empty() {
        return None;
    }
    Some((bank * RAM_BANK_SIZE + (addr as usize & (RAM_BANK_SIZE - 1))) % ram.len())
}

/// Write battery RAM to `path`; failures are logged, never propagated
pub(crate) fn save_ram_file(path: &Path, ram: &[u8]) -> bool {
    if ram.is_empty() {
        return false;
    }
    match fs::write(path, ram) {
        Ok(()) => {
            log(LogCategory::Cartridge, LogLevel::Debug, || {
                format!("Saved {} bytes of cartridge RAM to {}", ram.len(), path.display())
            });
            true
        }
        Err(e) => {
            log(LogCategory::Cartridge, LogLevel::Error, || {
                format!("Failed to save cartridge RAM to {}: {}", path.display(), e)
            });
            false
        }
    }
}

/// Fill `ram` from `path`. A shorter file fills a prefix, a longer one is truncated.
pub(crate) fn load_ram_file(path: &Path, ram: &mut [u8]) -> bool {
    if ram.is_empty() {
        return false;
    }
    match fs::read(path) {
        Ok(data) => {
            let n = data.len().min(ram.len());
            ram[..n].copy_from_slice(&data[..n]);
            if data.len() != ram.len() {
                log(LogCategory::Cartridge, LogLevel::Warn, || {
                    format!(
                        "Save file {} is {} bytes, cartridge RAM is {}",
                        path.display(),
                        data.len(),
                        ram.len()
                    )
                });
            }
            true
        }
        Err(e) => {
            log(LogCategory::Cartridge, LogLevel::Error, || {
                format!("Failed to load cartridge RAM from {}: {}", path.display(), e)
            });
            false
        }
    }
}

/// Common contract of all bank controllers
pub trait BankController {
    /// Restore power-on banking registers (RAM contents are kept)
    fn reset(&mut self);

    fn read_rom(&self, addr: u16) -> u8;

    /// Writes to the ROM window are banking register writes
    fn write_rom(&mut self, addr: u16, val: u8);

    fn read_ram(&self, addr: u16) -> u8;

    fn write_ram(&mut self, addr: u16, val: u8);

    /// External RAM as stored on the cartridge
    fn ram(&self) -> &[u8];

    fn ram_mut(&mut self) -> &mut [u8];

    fn save_ram(&self, path: &Path) -> bool {
        save_ram_file(path, self.ram())
    }

    fn load_ram(&mut self, path: &Path) -> bool {
        load_ram_file(path, self.ram_mut())
    }

    fn ram_enabled(&self) -> bool;

    /// Bank visible at 0x4000-0x7FFF
    fn current_rom_bank(&self) -> usize;

    fn current_ram_bank(&self) -> usize;

    fn total_rom_banks(&self) -> usize;

    fn total_ram_banks(&self) -> usize;

    fn has_battery(&self) -> bool;

    fn has_rtc(&self) -> bool {
        false
    }

    fn rtc(&self) -> Option<RtcValue> {
        None
    }
}

/// Controller selected by the cartridge type byte
#[derive(Debug)]
pub enum Mapper {
    Mbc0(Mbc0),
    Mbc1(Mbc1),
    Mbc2(Mbc2),
    Mbc3(Mbc3),
    Mbc5(Mbc5),
}

impl Mapper {
    /// Build the controller for a validated cartridge type
    pub fn from_cart(rom: Vec<u8>, ram: Vec<u8>, kind: &CartridgeType) -> Self {
        match kind.mbc {
            MbcKind::None => Mapper::Mbc0(Mbc0::new(rom, ram, kind.battery)),
            MbcKind::Mbc1 => Mapper::Mbc1(Mbc1::new(rom, ram, kind.battery)),
            MbcKind::Mbc2 => Mapper::Mbc2(Mbc2::new(rom, kind.battery)),
            MbcKind::Mbc3 => {
                let clock: Option<Box<dyn RtcClock>> = if kind.rtc {
                    Some(Box::new(SystemClock))
                } else {
                    None
                };
                Mapper::Mbc3(Mbc3::new(rom, ram, kind.battery, clock))
            }
            MbcKind::Mbc5 => Mapper::Mbc5(Mbc5::new(rom, ram, kind.battery, kind.rumble)),
        }
    }

    pub fn controller(&self) -> &dyn BankController {
        match self {
            Mapper::Mbc0(m) => m,
            Mapper::Mbc1(m) => m,
            Mapper::Mbc2(m) => m,
            Mapper::Mbc3(m) => m,
            Mapper::Mbc5(m) => m,
        }
    }

    pub fn controller_mut(&mut self) -> &mut dyn BankController {
        match self {
            Mapper::Mbc0(m) => m,
            Mapper::Mbc1(m) => m,
            Mapper::Mbc2(m) => m,
            Mapper::Mbc3(m) => m,
            Mapper::Mbc5(m) => m,
        }
    }

    pub fn read_rom(&self, addr: u16) -> u8 {
        self.controller().read_rom(addr)
    }

    pub fn write_rom(&mut self, addr: u16, val: u8) {
        self.controller_mut().write_rom(addr, val)
    }

    pub fn read_ram(&self, addr: u16) -> u8 {
        self.controller().read_ram(addr)
    }

    pub fn write_ram(&mut self, addr: u16, val: u8) {
        self.controller_mut().write_ram(addr, val)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Mbc0(_) => "ROM",
            Mapper::Mbc1(_) => "MBC1",
            Mapper::Mbc2(_) => "MBC2",
            Mapper::Mbc3(_) => "MBC3",
            Mapper::Mbc5(_) => "MBC5",
        }
    }

    /// Rumble motor state (MBC5 rumble carts only)
    pub fn rumble_active(&self) -> bool {
        match self {
            Mapper::Mbc5(m) => m.rumble_active(),
            _ => false,
        }
    }
}
