//! Cartridges without a bank controller (ROM only, optionally with RAM)
//!
//! The ROM is wired straight to the address bus and mirrors if smaller than
//! 32KB. There are no banking registers, but a write below 0x2000 still toggles
//! the RAM enable line on carts that have RAM.

use super::{ram_bank_count, ram_offset, BankController};

#[derive(Debug)]
pub struct Mbc0 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    battery: bool,
    ram_enabled: bool,
}

impl Mbc0 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, battery: bool) -> Self {
        Self {
            rom,
            ram,
            battery,
            ram_enabled: false,
        }
    }
}

impl BankController for Mbc0 {
    fn reset(&mut self) {
        self.ram_enabled = false;
    }

    fn read_rom(&self, addr: u16) -> u8 {
        if self.rom.is_empty() {
            return 0xFF;
        }
        self.rom[addr as usize % self.rom.len()]
    }

    fn write_rom(&mut self, addr: u16, val: u8) {
        if addr < 0x2000 {
            self.ram_enabled = val & 0x0F == 0x0A;
        }
    }

    fn read_ram(&self, addr: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }
        ram_offset(&self.ram, 0, addr).map_or(0xFF, |i| self.ram[i])
    }

    fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ram_enabled {
            return;
        }
        if let Some(i) = ram_offset(&self.ram, 0, addr) {
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
        0
    }

    fn current_ram_bank(&self) -> usize {
        0
    }

    fn total_rom_banks(&self) -> usize {
        2
    }

    fn total_ram_banks(&self) -> usize {
        ram_bank_count(self.ram.len())
    }

    fn has_battery(&self) -> bool {
        self.battery
    }
}
