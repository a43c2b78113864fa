//! MBC5
//!
//! Up to 8MB ROM (512 banks) and 128KB RAM (16 banks).
//!
//! # Register Map
//!
//! - 0x0000-0x1FFF: RAM enable (0x0A in the low nibble enables)
//! - 0x2000-0x2FFF: ROM bank, low 8 bits
//! - 0x3000-0x3FFF: ROM bank, bit 8
//! - 0x4000-0x5FFF: RAM bank; on rumble carts bit 3 drives the motor instead
//!
//! Unlike MBC1/MBC3, bank 0 can be mapped into 0x4000-0x7FFF.

use super::{
    ram_bank_count, ram_offset, rom_bank_count, rom_byte, BankController, ROM_BANK_SIZE,
};
use sm83_core::logging::{log, LogCategory, LogLevel};

const RUMBLE_MOTOR: u8 = 0x08;

#[derive(Debug)]
pub struct Mbc5 {
    rom: Vec<u8>,
    ram: Vec<u8>,
    battery: bool,
    rumble: bool,
    rom_banks: usize,
    ram_banks: usize,

    ram_enabled: bool,
    rom_bank_low: u8,
    rom_bank_high: u8,
    ram_bank_reg: u8,
    motor: bool,

    rom_bank: usize,
    ram_bank: usize,
}

impl Mbc5 {
    pub fn new(rom: Vec<u8>, ram: Vec<u8>, battery: bool, rumble: bool) -> Self {
        let mut mbc = Self {
            rom_banks: rom_bank_count(rom.len()),
            ram_banks: ram_bank_count(ram.len()),
            rom,
            ram,
            battery,
            rumble,
            ram_enabled: false,
            rom_bank_low: 1,
            rom_bank_high: 0,
            ram_bank_reg: 0,
            motor: false,
            rom_bank: 1,
            ram_bank: 0,
        };
        mbc.update_banks();
        mbc
    }

    fn update_banks(&mut self) {
        let bank = ((self.rom_bank_high as usize) << 8) | self.rom_bank_low as usize;
        self.rom_bank = bank & (self.rom_banks - 1);
        self.ram_bank = if self.ram_banks > 0 {
            self.ram_bank_reg as usize & (self.ram_banks - 1)
        } else {
            0
        };
    }

    pub fn has_rumble(&self) -> bool {
        self.rumble
    }

    pub fn rumble_active(&self) -> bool {
        self.motor
    }
}

impl BankController for Mbc5 {
    fn reset(&mut self) {
        self.ram_enabled = false;
        self.rom_bank_low = 1;
        self.rom_bank_high = 0;
        self.ram_bank_reg = 0;
        self.motor = false;
        self.update_banks();
    }

    fn read_rom(&self, addr: u16) -> u8 {
        let bank = if (addr as usize) < ROM_BANK_SIZE { 0 } else { self.rom_bank };
        rom_byte(&self.rom, bank, addr)
    }

    fn write_rom(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => {
                self.ram_enabled = val & 0x0F == 0x0A;
                return;
            }
            0x2000..=0x2FFF => self.rom_bank_low = val,
            0x3000..=0x3FFF => self.rom_bank_high = val & 0x01,
            0x4000..=0x5FFF => {
                if self.rumble {
                    let motor = val & RUMBLE_MOTOR != 0;
                    if motor != self.motor {
                        log(LogCategory::Cartridge, LogLevel::Trace, || {
                            format!("MBC5: rumble {}", if motor { "on" } else { "off" })
                        });
                    }
                    self.motor = motor;
                    self.ram_bank_reg = val & 0x07;
                } else {
                    self.ram_bank_reg = val & 0x0F;
                }
            }
            _ => return,
        }
        self.update_banks();
        log(LogCategory::Cartridge, LogLevel::Trace, || {
            format!(
                "MBC5: {:04X}<-{:02X} rom {:03X} ram {}",
                addr, val, self.rom_bank, self.ram_bank
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
}
