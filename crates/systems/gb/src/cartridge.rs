//! Cartridge header parsing and bank controller selection
//!
//! # Header layout
//!
//! ```text
//! $0104-$0133  Boot logo
//! $0134-$0143  Title (ASCII, padded with zeros)
//! $0143        Color flag ($80 = compatible, $C0 = color only)
//! $0147        Cartridge type
//! $0148        ROM size (32KB << n)
//! $0149        RAM size
//! $014D        Header checksum over $0134-$014C
//! ```

use serde::{Deserialize, Serialize};
use sm83_core::logging::{log, LogCategory, LogLevel};

use crate::mappers::{BankController, Mapper};

/// Boot logo bitmap, also used to detect MBC1 multicarts
pub const NINTENDO_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

const LOGO_ADDR: usize = 0x0104;
const TITLE_START: usize = 0x0134;
const TITLE_END: usize = 0x0143;
const CGB_FLAG_ADDR: usize = 0x0143;
const TYPE_ADDR: usize = 0x0147;
const ROM_SIZE_ADDR: usize = 0x0148;
const RAM_SIZE_ADDR: usize = 0x0149;
const CHECKSUM_ADDR: usize = 0x014D;

/// Smallest image that contains a full header
pub const HEADER_END: usize = 0x0150;

const ONE_MB: usize = 0x10_0000;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("ROM image is empty")]
    Empty,
    #[error("ROM image is truncated ({len} bytes, expected at least {expected})")]
    Truncated { len: usize, expected: usize },
    #[error("Header checksum mismatch (header {expected:02X}, computed {computed:02X})")]
    ChecksumMismatch { expected: u8, computed: u8 },
    #[error("Unsupported cartridge type {0:02X}")]
    UnsupportedType(u8),
}

/// Bank controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

/// Decoded cartridge type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeType {
    pub code: u8,
    pub mbc: MbcKind,
    pub battery: bool,
    pub rtc: bool,
    pub rumble: bool,
}

impl CartridgeType {
    pub fn from_code(code: u8) -> Result<Self, CartridgeError> {
        let (mbc, battery, rtc, rumble) = match code {
            0x00 | 0x08 => (MbcKind::None, false, false, false),
            0x09 => (MbcKind::None, true, false, false),
            0x01 | 0x02 => (MbcKind::Mbc1, false, false, false),
            0x03 => (MbcKind::Mbc1, true, false, false),
            0x05 => (MbcKind::Mbc2, false, false, false),
            0x06 => (MbcKind::Mbc2, true, false, false),
            0x0F | 0x10 => (MbcKind::Mbc3, true, true, false),
            0x11 | 0x12 => (MbcKind::Mbc3, false, false, false),
            0x13 => (MbcKind::Mbc3, true, false, false),
            0x19 | 0x1A => (MbcKind::Mbc5, false, false, false),
            0x1B => (MbcKind::Mbc5, true, false, false),
            0x1C | 0x1D => (MbcKind::Mbc5, false, false, true),
            0x1E => (MbcKind::Mbc5, true, false, true),
            _ => return Err(CartridgeError::UnsupportedType(code)),
        };
        Ok(Self {
            code,
            mbc,
            battery,
            rtc,
            rumble,
        })
    }
}

/// Color hardware support declared at 0x143
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CgbSupport {
    #[default]
    None,
    Compatible,
    Only,
}

impl CgbSupport {
    pub fn from_flag(flag: u8) -> Self {
        match flag {
            0xC0 => CgbSupport::Only,
            0x80 => CgbSupport::Compatible,
            _ => CgbSupport::None,
        }
    }
}

/// Running `x = x - byte - 1` over 0x134-0x14C
pub fn header_checksum(data: &[u8]) -> u8 {
    data[TITLE_START..CHECKSUM_ADDR]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

/// External RAM bytes for a RAM size code
pub fn ram_size_from_code(code: u8) -> usize {
    match code {
        0x01 => 2 * 1024,
        0x02 => 8 * 1024,
        0x03 => 32 * 1024,
        0x04 => 128 * 1024,
        0x05 => 64 * 1024,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeHeader {
    pub title: String,
    pub cgb: CgbSupport,
    pub cart_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub checksum: u8,
    pub logo_valid: bool,
}

impl CartridgeHeader {
    /// Parse and verify the header of a ROM image
    pub fn parse(data: &[u8]) -> Result<Self, CartridgeError> {
        if data.is_empty() {
            return Err(CartridgeError::Empty);
        }
        if data.len() < HEADER_END {
            return Err(CartridgeError::Truncated {
                len: data.len(),
                expected: HEADER_END,
            });
        }

        let computed = header_checksum(data);
        let expected = data[CHECKSUM_ADDR];
        if computed != expected {
            return Err(CartridgeError::ChecksumMismatch { expected, computed });
        }

        let title = data[TITLE_START..=TITLE_END]
            .iter()
            .take_while(|&&b| (0x20..0x7F).contains(&b))
            .map(|&b| b as char)
            .collect::<String>()
            .trim_end()
            .to_string();

        Ok(Self {
            title,
            cgb: CgbSupport::from_flag(data[CGB_FLAG_ADDR]),
            cart_type: data[TYPE_ADDR],
            rom_size_code: data[ROM_SIZE_ADDR],
            ram_size_code: data[RAM_SIZE_ADDR],
            checksum: expected,
            logo_valid: data[LOGO_ADDR..LOGO_ADDR + NINTENDO_LOGO.len()] == NINTENDO_LOGO,
        })
    }

    /// Declared ROM size; `None` for codes outside the standard table
    pub fn rom_size(&self) -> Option<usize> {
        (self.rom_size_code <= 0x08).then(|| 0x8000 << self.rom_size_code)
    }

    pub fn ram_size(&self) -> usize {
        ram_size_from_code(self.ram_size_code)
    }
}

/// A validated cartridge with its bank controller
#[derive(Debug)]
pub struct Cartridge {
    header: CartridgeHeader,
    kind: CartridgeType,
    mapper: Mapper,
}

impl Cartridge {
    pub fn from_bytes(rom: Vec<u8>) -> Result<Self, CartridgeError> {
        let header = CartridgeHeader::parse(&rom)?;
        let kind = CartridgeType::from_code(header.cart_type)?;

        if let Some(expected) = header.rom_size() {
            if rom.len() < expected {
                return Err(CartridgeError::Truncated {
                    len: rom.len(),
                    expected,
                });
            }
        }

        let mut ram_size = match kind.mbc {
            MbcKind::Mbc2 => 0,
            _ => header.ram_size(),
        };
        // Large MBC1 boards reuse the RAM bank lines for ROM
        if kind.mbc == MbcKind::Mbc1 && rom.len() >= ONE_MB {
            ram_size = ram_size.min(0x2000);
        }

        log(LogCategory::Cartridge, LogLevel::Info, || {
            format!(
                "Cartridge \"{}\": type {:02X} ({:?}), ROM {}KB, RAM {}KB{}{}",
                header.title,
                kind.code,
                kind.mbc,
                rom.len() / 1024,
                ram_size / 1024,
                if kind.battery { ", battery" } else { "" },
                if kind.rtc { ", RTC" } else { "" },
            )
        });
        if !header.logo_valid {
            log(LogCategory::Cartridge, LogLevel::Warn, || {
                "Boot logo does not match; continuing".to_string()
            });
        }

        let mapper = Mapper::from_cart(rom, vec![0; ram_size], &kind);
        Ok(Self {
            header,
            kind,
            mapper,
        })
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    pub fn cart_type(&self) -> &CartridgeType {
        &self.kind
    }

    pub fn is_cgb_compatible(&self) -> bool {
        self.header.cgb != CgbSupport::None
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut Mapper {
        &mut self.mapper
    }

    pub fn controller(&self) -> &dyn BankController {
        self.mapper.controller()
    }

    pub fn reset(&mut self) {
        self.mapper.controller_mut().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with(title: &str, cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let size = 0x8000usize << rom_code;
        let mut rom = vec![0; size];
        rom[LOGO_ADDR..LOGO_ADDR + 48].copy_from_slice(&NINTENDO_LOGO);
        rom[TITLE_START..TITLE_START + title.len()].copy_from_slice(title.as_bytes());
        rom[TYPE_ADDR] = cart_type;
        rom[ROM_SIZE_ADDR] = rom_code;
        rom[RAM_SIZE_ADDR] = ram_code;
        rom[CHECKSUM_ADDR] = header_checksum(&rom);
        rom
    }

    #[test]
    fn test_rom_only_scenario() {
        let cart = Cartridge::from_bytes(rom_with("TESTROM", 0x00, 0, 0)).unwrap();
        assert_eq!(cart.title(), "TESTROM");
        assert_eq!(cart.controller().current_rom_bank(), 0);
        assert!(!cart.controller().ram_enabled());
        assert!(cart.header().logo_valid);
        assert!(!cart.is_cgb_compatible());
    }

    #[test]
    fn test_corrupted_header_rejected() {
        let mut rom = rom_with("TESTROM", 0x00, 0, 0);
        rom[0x0140] ^= 0x01;
        match Cartridge::from_bytes(rom) {
            Err(CartridgeError::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_and_short_images() {
        assert_eq!(CartridgeHeader::parse(&[]), Err(CartridgeError::Empty));
        assert_eq!(
            CartridgeHeader::parse(&[0; 0x100]),
            Err(CartridgeError::Truncated {
                len: 0x100,
                expected: HEADER_END
            })
        );
    }

    #[test]
    fn test_declared_size_larger_than_image() {
        let mut rom = rom_with("SHORT", 0x01, 0, 0);
        rom[ROM_SIZE_ADDR] = 2;
        rom[CHECKSUM_ADDR] = header_checksum(&rom);
        assert_eq!(
            Cartridge::from_bytes(rom).err(),
            Some(CartridgeError::Truncated {
                len: 0x8000,
                expected: 0x20000
            })
        );
    }

    #[test]
    fn test_unsupported_type() {
        let rom = rom_with("HUC", 0xFF, 0, 0);
        assert_eq!(
            Cartridge::from_bytes(rom).err(),
            Some(CartridgeError::UnsupportedType(0xFF))
        );
    }

    #[test]
    fn test_type_table_flags() {
        let t = CartridgeType::from_code(0x10).unwrap();
        assert_eq!(t.mbc, MbcKind::Mbc3);
        assert!(t.battery && t.rtc && !t.rumble);

        let t = CartridgeType::from_code(0x1E).unwrap();
        assert_eq!(t.mbc, MbcKind::Mbc5);
        assert!(t.battery && t.rumble);

        for code in [0x03, 0x06, 0x09, 0x0F, 0x10, 0x13, 0x1B, 0x1E] {
            assert!(CartridgeType::from_code(code).unwrap().battery, "{:02X}", code);
        }
        for code in [0x04, 0x07, 0x0B, 0x14, 0x20, 0xFC] {
            assert!(CartridgeType::from_code(code).is_err(), "{:02X}", code);
        }
    }

    #[test]
    fn test_title_stops_at_non_printable() {
        let mut rom = rom_with("ZELDA", 0x00, 0, 0);
        rom[CGB_FLAG_ADDR] = 0x80;
        rom[CHECKSUM_ADDR] = header_checksum(&rom);
        let cart = Cartridge::from_bytes(rom).unwrap();
        assert_eq!(cart.title(), "ZELDA");
        assert!(cart.is_cgb_compatible());
        assert_eq!(cart.header().cgb, CgbSupport::Compatible);
    }

    #[test]
    fn test_ram_sizing() {
        let cart = Cartridge::from_bytes(rom_with("RAM", 0x03, 0, 0x03)).unwrap();
        assert_eq!(cart.controller().ram().len(), 0x8000);

        let cart = Cartridge::from_bytes(rom_with("MBC2", 0x06, 0, 0x00)).unwrap();
        assert_eq!(cart.controller().ram().len(), 512);
    }

    #[test]
    fn test_large_mbc1_ram_capped() {
        let cart = Cartridge::from_bytes(rom_with("BIG", 0x03, 5, 0x03)).unwrap();
        assert_eq!(cart.controller().ram().len(), 0x2000);
    }

    #[test]
    fn test_cgb_flags() {
        assert_eq!(CgbSupport::from_flag(0xC0), CgbSupport::Only);
        assert_eq!(CgbSupport::from_flag(0x80), CgbSupport::Compatible);
        assert_eq!(CgbSupport::from_flag(0x00), CgbSupport::None);
    }
}
