//! SM83 register file
//!
//! Eight 8-bit registers (A, F, B, C, D, E, H, L) that pair up into AF, BC, DE
//! and HL, plus the 16-bit stack pointer and program counter.
//!
//! F only stores bits 4-7; the low nibble always reads as zero.

use serde::{Deserialize, Serialize};

/// Zero flag (bit 7 of F)
pub const FLAG_Z: u8 = 0b1000_0000;
/// Subtract flag (bit 6 of F)
pub const FLAG_N: u8 = 0b0100_0000;
/// Half-carry flag (bit 5 of F)
pub const FLAG_H: u8 = 0b0010_0000;
/// Carry flag (bit 4 of F)
pub const FLAG_C: u8 = 0b0001_0000;

/// CPU register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    pub a: u8,
    f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Registers with the monochrome post-boot values
    pub fn new() -> Self {
        let mut regs = Self {
            a: 0,
            f: 0,
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            sp: 0,
            pc: 0,
        };
        regs.reset();
        regs
    }

    /// Monochrome (DMG) power-on state after the boot ROM hands over
    pub fn reset(&mut self) {
        self.a = 0x01;
        self.f = 0xB0;
        self.b = 0x00;
        self.c = 0x13;
        self.d = 0x00;
        self.e = 0xD8;
        self.h = 0x01;
        self.l = 0x4D;
        self.sp = 0xFFFE;
        self.pc = 0x0100;
    }

    /// Color (CGB) power-on state after the boot ROM hands over
    pub fn reset_cgb(&mut self) {
        self.a = 0x11;
        self.f = 0x80;
        self.b = 0x00;
        self.c = 0x00;
        self.d = 0xFF;
        self.e = 0x56;
        self.h = 0x00;
        self.l = 0x0D;
        self.sp = 0xFFFE;
        self.pc = 0x0100;
    }

    pub fn f(&self) -> u8 {
        self.f
    }

    pub fn set_f(&mut self, val: u8) {
        self.f = val & 0xF0;
    }

    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | (self.f as u16)
    }

    pub fn set_af(&mut self, val: u16) {
        self.a = (val >> 8) as u8;
        self.set_f(val as u8);
    }

    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | (self.c as u16)
    }

    pub fn set_bc(&mut self, val: u16) {
        self.b = (val >> 8) as u8;
        self.c = val as u8;
    }

    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | (self.e as u16)
    }

    pub fn set_de(&mut self, val: u16) {
        self.d = (val >> 8) as u8;
        self.e = val as u8;
    }

    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | (self.l as u16)
    }

    pub fn set_hl(&mut self, val: u16) {
        self.h = (val >> 8) as u8;
        self.l = val as u8;
    }

    fn flag(&self, mask: u8) -> bool {
        (self.f & mask) != 0
    }

    fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.f |= mask;
        } else {
            self.f &= !mask;
        }
    }

    pub fn zero(&self) -> bool {
        self.flag(FLAG_Z)
    }

    pub fn set_zero(&mut self, on: bool) {
        self.set_flag(FLAG_Z, on);
    }

    pub fn subtract(&self) -> bool {
        self.flag(FLAG_N)
    }

    pub fn set_subtract(&mut self, on: bool) {
        self.set_flag(FLAG_N, on);
    }

    pub fn half_carry(&self) -> bool {
        self.flag(FLAG_H)
    }

    pub fn set_half_carry(&mut self, on: bool) {
        self.set_flag(FLAG_H, on);
    }

    pub fn carry(&self) -> bool {
        self.flag(FLAG_C)
    }

    pub fn set_carry(&mut self, on: bool) {
        self.set_flag(FLAG_C, on);
    }

    /// Replace all four flags at once
    pub fn set_flags(&mut self, z: bool, n: bool, h: bool, c: bool) {
        let mut f = 0;
        if z {
            f |= FLAG_Z;
        }
        if n {
            f |= FLAG_N;
        }
        if h {
            f |= FLAG_H;
        }
        if c {
            f |= FLAG_C;
        }
        self.f = f;
    }

    /// Read an 8-bit register by its 3-bit opcode index (6 = (HL) is not a register)
    pub(crate) fn get_r8(&self, idx: u8) -> u8 {
        match idx & 0x07 {
            0 => self.b,
            1 => self.c,
            2 => self.d,
            3 => self.e,
            4 => self.h,
            5 => self.l,
            7 => self.a,
            _ => unreachable!("(HL) operand is resolved by the CPU"),
        }
    }

    pub(crate) fn set_r8(&mut self, idx: u8, val: u8) {
        match idx & 0x07 {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            7 => self.a = val,
            _ => unreachable!("(HL) operand is resolved by the CPU"),
        }
    }
}
