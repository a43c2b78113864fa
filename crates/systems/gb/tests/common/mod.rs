//! Synthetic cartridge images for integration tests

use sm83_gb::cartridge::{header_checksum, NINTENDO_LOGO};

pub struct RomBuilder {
    rom: Vec<u8>,
}

#[allow(dead_code)]
impl RomBuilder {
    /// Blank image of `0x8000 << rom_code` bytes; byte 0 of every 16KB bank holds
    /// the bank number.
    pub fn new(cart_type: u8, rom_code: u8, ram_code: u8) -> Self {
        let mut rom = vec![0; 0x8000 << rom_code];
        for bank in 1..rom.len() / 0x4000 {
            rom[bank * 0x4000] = bank as u8;
        }
        rom[0x104..0x134].copy_from_slice(&NINTENDO_LOGO);
        rom[0x147] = cart_type;
        rom[0x148] = rom_code;
        rom[0x149] = ram_code;
        Self { rom }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.rom[0x134..0x134 + title.len()].copy_from_slice(title.as_bytes());
        self
    }

    pub fn cgb(mut self, flag: u8) -> Self {
        self.rom[0x143] = flag;
        self
    }

    /// Place `code` at `addr`
    pub fn code(mut self, addr: usize, code: &[u8]) -> Self {
        self.rom[addr..addr + code.len()].copy_from_slice(code);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x14D] = header_checksum(&self.rom);
        self.rom
    }
}

/// ROM-only image running `code` from the entry point
#[allow(dead_code)]
pub fn program(code: &[u8]) -> Vec<u8> {
    RomBuilder::new(0x00, 0, 0).code(0x100, code).build()
}
