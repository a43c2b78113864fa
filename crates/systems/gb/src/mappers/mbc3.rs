//! MBC3
//!
//! Up to 2MB ROM, 32KB RAM (64KB on MBC30 boards) and an optional real-time clock.
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM and RTC enable (0x0A in the low nibble enables)
//! - 0x2000-0x3FFF: 7-bit ROM bank; 0 selects 1
//! - 0x4000-0x5FFF: 0x00-0x07 selects a RAM bank, 0x08-0x0C an RTC register
//! - 0x6000-0x7FFF: RTC latch (write 0x00 then 0x01)

use std::path::{Path, PathBuf};

use super::rtc::{Rtc, RtcClock, RtcValue};
use super::{
    load_ram_file, ram_bank_count, ram_offset, rom_bank_count, rom_byte, save_ram_file,
    BankController, ROM_BANK_SIZE,
};
use sm83_core::logging::{log, LogCategory, LogLevel};

/// Sibling path of a save file holding the RTC state
pub fn rtc_path(save: &Path) -> PathBuf {
    let mut name = save.as_os_str().to_owned();
    name.push(".rtc");
    PathBuf::from(name)
}

#[derive(Debug)]
pub struct Mbc3 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    battery: bool,
    rom_banks: usize,
    ram_banks: usize,
    rtc: Option<Rtc>,

    enabled: bool,
    rom_bank_reg: u8,
    select: u8,

    rom_bank: usize,
    ram_bank: usize,
}

impl Mbc3 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, battery: bool, clock: Option<Box<dyn RtcClock>>) -> Self {
        let mut mbc = Self {
            rom_banks: rom_bank_count(rom.len()),
            ram_banks: ram_bank_count(ram.len()),
            rom,
            ram,
            battery,
            rtc: clock.map(Rtc::new),
            enabled: false,
            rom_bank_reg: 1,
            select: 0,
            rom_bank: 1,
            ram_bank: 0,
        };
        mbc.update_banks();
        mbc
    }

    fn update_banks(&mut self) {
        let bank = if self.rom_bank_reg == 0 { 1 } else { self.rom_bank_reg as usize };
        self.rom_bank = bank & (self.rom_banks - 1);
        self.ram_bank = if self.ram_banks > 0 && self.select <= 0x07 {
            self.select as usize & (self.ram_banks - 1)
        } else {
            0
        };
    }

    /// RTC register currently mapped at 0xA000-0xBFFF, if any
    fn selected_rtc_register(&self) -> Option<u8> {
        match self.select {
            0x08..=0x0C if self.rtc.is_some() => Some(self.select),
            _ => None,
        }
    }

    pub fn rtc_latched(&self) -> Option<RtcValue> {
        self.rtc.as_ref().map(Rtc::latched)
    }
}

impl BankController for Mbc3 {
    fn reset(&mut self) {
        self.enabled = false;
        self.rom_bank_reg = 1;
        self.select = 0;
        if let Some(rtc) = &mut self.rtc {
            rtc.reset();
        }
        self.update_banks();
    }

    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if (addr as usize) < ROM_BANK_SIZE { 0 } else { self.rom_bank };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_rom(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.enabled = val & 0x0F == 0x0A,
            0x2000..=0x3FFF => {
                self.rom_bank_reg = val & 0x7F;
                self.update_banks();
                log(LogCategory::Cartridge, LogLevel::Trace, || {
                    format!("MBC3: ROM bank -> {:02X}", self.rom_bank)
                });
            }
            0x4000..=0x5FFF => {
                self.select = val & 0x0F;
                self.update_banks();
            }
            0x6000..=0x7FFF => {
                if let Some(rtc) = &mut self.rtc {
                    rtc.write_latch(val);
                }
            }
            _ => {}
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.enabled {
            return 0xFF;
        }
        if let (Some(reg), Some(rtc)) = (self.selected_rtc_register(), &self.rtc) {
            return rtc.read_register(reg);
        }
        if self.select > 0x07 {
            return 0xFF;
        }
        ram_offset(&self.ram, self.ram_bank, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.enabled {
            return;
        }
        if let Some(reg) = self.selected_rtc_register() {
            if let Some(rtc) = &mut self.rtc {
                rtc.write_register(reg, val);
            }
            return;
        }
        if self.select > 0x07 {
            return;
        }
        if let Some(i) = ram_offset(&self.ram, self.ram_bank, addr) {
            self.ram[i] = val;
        }
    }

    fn ram(&self) -> &[u8] {
        &self.ram
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    /// RAM plus, on clock carts, the `.rtc` sidecar
    fn save_ram(&self, path: &Path) -> bool {
        let mut ok = true;
        if !self.ram.is_empty() {
            ok &= save_ram_file(path, &self.ram);
        }
        if let Some(rtc) = &self.rtc {
            ok &= rtc.save(&rtc_path(path));
        }
        ok && (!self.ram.is_empty() || self.rtc.is_some())
    }

    /// A missing `.rtc` sidecar leaves the clock running from reset
    fn load_ram(&mut self, path: &Path) -> bool {
        let mut ok = true;
        let mut loaded = false;
        if !self.ram.is_empty() {
            ok &= load_ram_file(path, &mut self.ram);
            loaded = true;
        }
        if let Some(rtc) = &mut self.rtc {
            let sidecar = rtc_path(path);
            if sidecar.exists() {
                ok &= rtc.load(&sidecar);
                loaded = true;
            } else {
                log(LogCategory::Cartridge, LogLevel::Warn, || {
                    format!("MBC3: no RTC state at {}, clock not restored", sidecar.display())
                });
            }
        }
        ok && loaded
    }

    fn ram_enabled(&self) -> bool {
        self.enabled
    }

    fn current_rom_bank(&self) -> usize {
        self.rom_bank
    }

    fn current_ram_bank(&self) -> usize {
        self.ram_bank
    }

    fn total_rom_banks(&self) -> usize {
        self.rom_banks
    }

    fn total_ram_banks(&self) -> usize {
        self.ram_banks
    }

    fn has_battery(&self) -> bool {
        self.battery
    }

    fn has_rtc(&self) -> bool {
        self.rtc.is_some()
    }

    fn rtc(&self) -> Option<RtcValue> {
        self.rtc.as_ref().map(Rtc::current)
    }
}
