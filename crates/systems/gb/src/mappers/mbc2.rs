//! MBC2
//!
//! Up to 256KB ROM (16 banks) and 512×4 bits of RAM built into the controller.
//!
//! # Register Map (0x0000-0x3FFF)
//!
//! Address bit 8 picks the register:
//! - bit 8 = 0: RAM enable (0x0A in the low nibble enables)
//! - bit 8 = 1: 4-bit ROM bank select; 0 selects 1
//!
//! The 512-entry RAM mirrors across 0xA000-0xBFFF. Only the low nibble is
//! stored; the high nibble reads back as 0xF.

use super::{rom_bank_count, rom_byte, BankController, ROM_BANK_SIZE};
use sm83_core::logging::{log, LogCategory, LogLevel};

pub const MBC2_RAM_SIZE: usize = 512;

#[derive(Debug)]
pub struct Mbc2 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    battery: bool,
    rom_banks: usize,
    ram_enabled: bool,
    rom_bank_reg: u8,
    rom_bank: usize,
}

impl Mbc2 {
    pub fn new(rom: Vec<u8>, battery: bool) -> Self {
        let mut mbc = Self {
            rom_banks: rom_bank_count(rom.len()),
            rom,
            ram: vec![0; MBC2_RAM_SIZE],
            battery,
            ram_enabled: false,
            rom_bank_reg: 1,
            rom_bank: 1,
        };
        mbc.update_banks();
        mbc
    }

    fn update_banks(&mut self) {
        let bank = if self.rom_bank_reg == 0 { 1 } else { self.rom_bank_reg as usize };
        self.rom_bank = bank & (self.rom_banks - 1);
    }
}

impl BankController for Mbc2 {
    fn reset(&mut self) {
        self.ram_enabled = false;
        self.rom_bank_reg = 1;
        self.update_banks();
    }

    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if (addr as usize) < ROM_BANK_SIZE { 0 } else { self.rom_bank };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_rom(&mut self, addr: u16, val: u8) {
        if addr >= 0x4000 {
            return;
        }
        if addr & 0x0100 == 0 {
            self.ram_enabled = val & 0x0F == 0x0A;
        } else {
            self.rom_bank_reg = val & 0x0F;
            self.update_banks();
            log(LogCategory::Cartridge, LogLevel::Trace, || {
                format!("MBC2: ROM bank -> {:02X}", self.rom_bank)
            });
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        self.ram[addr as usize & (MBC2_RAM_SIZE - 1)] | 0xF0
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
            return;
        }
        self.ram[addr as usize & (MBC2_RAM_SIZE - 1)] = val & 0x0F;
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
        self.rom_bank
    }

    fn current_ram_bank(&self) -> usize {
        0
    }

    fn total_rom_banks(&self) -> usize {
        self.rom_banks
    }

    fn total_ram_banks(&self) -> usize {
        1
    }

    fn has_battery(&self) -> bool {
        self.battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked_rom(banks: usize) -> Vec<u8> {
        let mut rom = vec![0; banks * ROM_BANK_SIZE];
        for bank in 0..banks {
            rom[bank * ROM_BANK_SIZE] = bank as u8;
        }
        rom
    }

    #[test]
    fn test_builtin_ram_is_fixed_size() {
        let mbc = Mbc2::new(vec![0; 0x8000], false);
        assert_eq!(mbc.ram().len(), MBC2_RAM_SIZE);
        assert!(!mbc.ram_enabled());
        assert_eq!(mbc.current_rom_bank(), 1);
    }

    #[test]
    fn test_address_bit8_selects_register() {
        let mut mbc = Mbc2::new(marked_rom(16), false);

        mbc.write_rom(0x0100, 0x05);
        assert_eq!(mbc.read_rom(0x4000), 5);
        assert!(!mbc.ram_enabled());

        mbc.write_rom(0x2000, 0x0A);
        assert!(mbc.ram_enabled());
        assert_eq!(mbc.read_rom(0x4000), 5);

        mbc.write_rom(0x3F00, 0x0F);
        assert_eq!(mbc.read_rom(0x4000), 15);
    }

    #[test]
    fn test_bank_zero_maps_to_one() {
        let mut mbc = Mbc2::new(marked_rom(16), false);
        mbc.write_rom(0x2100, 0x00);
        assert_eq!(mbc.current_rom_bank(), 1);
        assert_eq!(mbc.read_rom(0x4000), 1);
    }

    #[test]
    fn test_writes_above_0x4000_ignored() {
        let mut mbc = Mbc2::new(marked_rom(16), false);
        mbc.write_rom(0x4100, 0x07);
        assert_eq!(mbc.current_rom_bank(), 1);
    }

    #[test]
    fn test_ram_nibbles_and_mirroring() {
        let mut mbc = Mbc2::new(vec![0; 0x8000], true);
        mbc.write_rom(0x0000, 0x0A);

        mbc.write_ram(0xA000, 0xAB);
        assert_eq!(mbc.read_ram(0xA000), 0xFB);
        assert_eq!(mbc.read_ram(0xA200), 0xFB);
        assert_eq!(mbc.read_ram(0xBE00), 0xFB);

        mbc.write_ram(0xA3FF, 0x04);
        assert_eq!(mbc.read_ram(0xA1FF), 0xF4);
    }

    #[test]
    fn test_ram_address_outside_window_mirrors() {
        let mut mbc = Mbc2::new(vec![0; 0x8000], false);
        mbc.write_rom(0x0000, 0x0A);
        mbc.write_ram(0x0003, 0x09);
        assert_eq!(mbc.read_ram(0xA003), 0xF9);
        assert_eq!(mbc.read_ram(0x8003), 0xF9);
    }

    #[test]
    fn test_disabled_ram_reads_ff() {
        let mut mbc = Mbc2::new(vec![0; 0x8000], false);
        mbc.write_ram(0xA000, 0x01);
        assert_eq!(mbc.read_ram(0xA000), 0xFF);
        mbc.write_rom(0x0000, 0x0A);
        assert_eq!(mbc.read_ram(0xA000), 0xF0);
    }
}
