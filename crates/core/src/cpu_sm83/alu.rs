//! Arithmetic, logic, rotate and shift helpers
//!
//! All flag updates for the 8-bit ALU live here so the opcode table only has to
//! move operands around.

use super::registers::Registers;

impl Registers {
    pub(crate) fn alu_add(&mut self, val: u8, with_carry: bool) {
        let c = (with_carry && self.carry()) as u8;
        let result = self.a as u16 + val as u16 + c as u16;
        let half = (self.a & 0x0F) + (val & 0x0F) + c > 0x0F;
        self.a = result as u8;
        self.set_flags(self.a == 0, false, half, result > 0xFF);
    }

    pub(crate) fn alu_sub(&mut self, val: u8, with_carry: bool) {
        let result = self.compare(val, with_carry);
        self.a = result;
    }

    pub(crate) fn alu_cp(&mut self, val: u8) {
        self.compare(val, false);
    }

    fn compare(&mut self, val: u8, with_carry: bool) -> u8 {
        let c = (with_carry && self.carry()) as u8;
        let result = (self.a as i16) - (val as i16) - (c as i16);
        let half = ((self.a & 0x0F) as i16) - ((val & 0x0F) as i16) - (c as i16) < 0;
        let out = result as u8;
        self.set_flags(out == 0, true, half, result < 0);
        out
    }

    pub(crate) fn alu_and(&mut self, val: u8) {
        self.a &= val;
        self.set_flags(self.a == 0, false, true, false);
    }

    pub(crate) fn alu_xor(&mut self, val: u8) {
        self.a ^= val;
        self.set_flags(self.a == 0, false, false, false);
    }

    pub(crate) fn alu_or(&mut self, val: u8) {
        self.a |= val;
        self.set_flags(self.a == 0, false, false, false);
    }

    /// Dispatch one of the eight accumulator operations by its opcode index
    pub(crate) fn alu_op(&mut self, op: u8, val: u8) {
        match op & 0x07 {
            0 => self.alu_add(val, false),
            1 => self.alu_add(val, true),
            2 => self.alu_sub(val, false),
            3 => self.alu_sub(val, true),
            4 => self.alu_and(val),
            5 => self.alu_xor(val),
            6 => self.alu_or(val),
            _ => self.alu_cp(val),
        }
    }

    pub(crate) fn alu_inc(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        self.set_zero(result == 0);
        self.set_subtract(false);
        self.set_half_carry((val & 0x0F) == 0x0F);
        result
    }

    pub(crate) fn alu_dec(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        self.set_zero(result == 0);
        self.set_subtract(true);
        self.set_half_carry((val & 0x0F) == 0);
        result
    }

    pub(crate) fn alu_add_hl(&mut self, val: u16) {
        let hl = self.hl();
        let (result, carry) = hl.overflowing_add(val);
        self.set_subtract(false);
        self.set_half_carry((hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF);
        self.set_carry(carry);
        self.set_hl(result);
    }

    /// SP plus a signed immediate; flags come from the unsigned low-byte add
    pub(crate) fn alu_sp_offset(&mut self, offset: i8) -> u16 {
        let sp = self.sp;
        let off = offset as i16 as u16;
        let half = (sp & 0x000F) + (off & 0x000F) > 0x000F;
        let carry = (sp & 0x00FF) + (off & 0x00FF) > 0x00FF;
        self.set_flags(false, false, half, carry);
        sp.wrapping_add(off)
    }

    pub(crate) fn alu_daa(&mut self) {
        let mut a = self.a;
        let mut carry = self.carry();
        if !self.subtract() {
            if carry || a > 0x99 {
                a = a.wrapping_add(0x60);
                carry = true;
            }
            if self.half_carry() || (a & 0x0F) > 0x09 {
                a = a.wrapping_add(0x06);
            }
        } else {
            if carry {
                a = a.wrapping_sub(0x60);
            }
            if self.half_carry() {
                a = a.wrapping_sub(0x06);
            }
        }
        self.a = a;
        self.set_zero(a == 0);
        self.set_half_carry(false);
        self.set_carry(carry);
    }

    pub(crate) fn alu_cpl(&mut self) {
        self.a = !self.a;
        self.set_subtract(true);
        self.set_half_carry(true);
    }

    pub(crate) fn alu_scf(&mut self) {
        self.set_subtract(false);
        self.set_half_carry(false);
        self.set_carry(true);
    }

    pub(crate) fn alu_ccf(&mut self) {
        let c = self.carry();
        self.set_subtract(false);
        self.set_half_carry(false);
        self.set_carry(!c);
    }

    /// Rotate/shift group of the 0xCB page, selected by bits 3-5 of the opcode
    pub(crate) fn alu_shift(&mut self, op: u8, val: u8) -> u8 {
        let (result, carry) = match op & 0x07 {
            // RLC
            0 => (val.rotate_left(1), val & 0x80 != 0),
            // RRC
            1 => (val.rotate_right(1), val & 0x01 != 0),
            // RL
            2 => ((val << 1) | self.carry() as u8, val & 0x80 != 0),
            // RR
            3 => ((val >> 1) | ((self.carry() as u8) << 7), val & 0x01 != 0),
            // SLA
            4 => (val << 1, val & 0x80 != 0),
            // SRA
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            // SWAP
            6 => (val.rotate_left(4), false),
            // SRL
            _ => (val >> 1, val & 0x01 != 0),
        };
        self.set_flags(result == 0, false, false, carry);
        result
    }

    pub(crate) fn alu_bit(&mut self, bit: u8, val: u8) {
        self.set_zero(val & (1 << bit) == 0);
        self.set_subtract(false);
        self.set_half_carry(true);
    }
}
