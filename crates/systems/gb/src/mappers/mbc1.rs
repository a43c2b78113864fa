//! MBC1
//!
//! Up to 2MB ROM and 32KB RAM.
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM enable (0x0A in the low nibble enables)
//! - 0x2000-0x3FFF: BANK1, 5-bit ROM bank; 0 selects 1
//! - 0x4000-0x5FFF: BANK2, 2-bit secondary register
//! - 0x6000-0x7FFF: mode select
//!
//! # Bank derivation
//!
//! BANK2 supplies ROM bank bits 5-6 for the 0x4000-0x7FFF window in both modes.
//! In mode 1 it also selects the bank at 0x0000-0x3FFF (0/32/64/96) and, on carts
//! below 1MB, the RAM bank. On 1MB multicarts the board wires BANK1 with only four
//! bits, so BANK2 lands at bits 4-5 instead.

use super::{
    ram_bank_count, ram_offset, rom_bank_count, rom_byte, BankController, ROM_BANK_SIZE,
};
use crate::cartridge::NINTENDO_LOGO;
use sm83_core::logging::{log, LogCategory, LogLevel};

const ONE_MB: usize = 0x10_0000;

#[derive(Debug)]
pub struct Mbc1 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    battery: bool,
    multicart: bool,
    rom_banks: usize,
    ram_banks: usize,

    ram_enabled: bool,
    bank1: u8,
    bank2: u8,
    mode: bool,

    lower_bank: usize,
    upper_bank: usize,
    ram_bank: usize,
}

/// Multicart boards repeat the boot logo at the start of each 256KB game
fn detect_multicart(rom: &[u8]) -> bool {
    const SECOND_GAME_LOGO: usize = 0x4_0104;
    rom.len() == ONE_MB
        && rom[SECOND_GAME_LOGO..SECOND_GAME_LOGO + NINTENDO_LOGO.len()] == NINTENDO_LOGO
}

impl Mbc1 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, battery: bool) -> Self {
        let multicart = detect_multicart(&rom);
        let mut mbc = Self {
            rom_banks: rom_bank_count(rom.len()),
            ram_banks: ram_bank_count(ram.len()),
            rom,
            ram,
            battery,
            multicart,
            ram_enabled: false,
            bank1: 1,
            bank2: 0,
            mode: false,
            lower_bank: 0,
            upper_bank: 1,
            ram_bank: 0,
        };
        mbc.update_banks();
        mbc
    }

    pub fn is_multicart(&self) -> bool {
        self.multicart
    }

    /// Re-derive every effective bank from the raw registers
    fn update_banks(&mut self) {
        let rom_mask = self.rom_banks - 1;
        let bank1 = if self.bank1 == 0 { 1 } else { self.bank1 as usize };
        let (high, low) = if self.multicart {
            ((self.bank2 as usize) << 4, bank1 & 0x0F)
        } else {
            ((self.bank2 as usize) << 5, bank1)
        };

        self.upper_bank = (high | low) & rom_mask;
        self.lower_bank = if self.mode { high & rom_mask } else { 0 };
        self.ram_bank = if self.mode && self.rom.len() < ONE_MB && self.ram_banks > 0 {
            self.bank2 as usize & (self.ram_banks - 1)
        } else {
            0
        };
    }
}

impl BankController for Mbc1 {
    fn reset(&mut self) {
        self.ram_enabled = false;
        self.bank1 = 1;
        self.bank2 = 0;
        self.mode = false;
        self.update_banks();
    }

    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if (addr as usize) < ROM_BANK_SIZE {
            self.lower_bank
        } else {
            self.upper_bank
        };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_rom(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => {
                self.ram_enabled = val & 0x0F == 0x0A;
                return;
            }
            0x2000..=0x3FFF => self.bank1 = val & 0x1F,
            0x4000..=0x5FFF => self.bank2 = val & 0x03,
            0x6000..=0x7FFF => self.mode = val & 0x01 != 0,
            _ => return,
        }
        self.update_banks();
        log(LogCategory::Cartridge, LogLevel::Trace, || {
            format!(
                "MBC1: {:04X}<-{:02X} rom {:02X}/{:02X} ram {}",
                addr, val, self.lower_bank, self.upper_bank, self.ram_bank
            )
        });
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        ram_offset(&self.ram, self.ram_bank, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
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

    fn ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    fn current_rom_bank(&self) -> usize {
        self.upper_bank
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
}
