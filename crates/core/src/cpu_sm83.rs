//! Sharp SM83 CPU core (Game Boy / Game Boy Color CPU)
//!
//! A Z80-derived 8-bit core with a reduced instruction set, a 0xCB-prefixed
//! bit-manipulation page and five vectored interrupt sources.
//!
//! # Step contract
//!
//! [`CpuSm83::step`] runs exactly one instruction (or one idle slot while halted)
//! and returns the number of clock cycles it took. After every instruction the
//! interrupt-enable delay advances one step, then a pending interrupt is serviced
//! if IME allows it. At most one interrupt is serviced per step.
//!
//! # Interrupt-enable latency
//!
//! `EI` and `RETI` do not open IME immediately. They arm [`ImeDelay::PendingEnable`];
//! the post-instruction advance moves it to [`ImeDelay::EnabledWithDelay`], and only
//! after the *next* instruction completes does IME become set and interrupts get
//! checked.

mod alu;
pub mod registers;

use serde::{Deserialize, Serialize};

use crate::logging::{log, LogCategory, LogLevel};
pub use registers::{Registers, FLAG_C, FLAG_H, FLAG_N, FLAG_Z};

/// Memory interface trait for the SM83 CPU
pub trait MemorySm83 {
    /// Read a byte from memory
    fn read(&self, addr: u16) -> u8;

    /// Write a byte to memory
    fn write(&mut self, addr: u16, val: u8);

    /// Ask the bus to perform a pending color-mode speed switch.
    ///
    /// Called by `STOP`. Returns true if the switch happened, in which case the
    /// CPU keeps running instead of entering the stopped state.
    fn speed_switch(&mut self) -> bool {
        false
    }
}

/// Interrupt-enable register address
pub const IE_ADDR: u16 = 0xFFFF;
/// Interrupt-flag register address
pub const IF_ADDR: u16 = 0xFF0F;

/// Interrupt source bits shared by IE and IF
pub const INT_VBLANK: u8 = 0x01;
pub const INT_LCD_STAT: u8 = 0x02;
pub const INT_TIMER: u8 = 0x04;
pub const INT_SERIAL: u8 = 0x08;
pub const INT_JOYPAD: u8 = 0x10;

/// Cycles taken to dispatch an interrupt
pub const INTERRUPT_CYCLES: u32 = 20;

/// Fatal execution errors
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuError {
    #[error("unimplemented opcode {opcode:#04X} at {pc:#06X}")]
    UnimplementedOpcode { opcode: u8, pc: u16 },
}

/// One-instruction latency of IME after `EI`/`RETI`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImeDelay {
    #[default]
    None,
    PendingEnable,
    EnabledWithDelay,
}

/// Execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    #[default]
    Running,
    Halted,
    Stopped,
}

/// Sharp SM83 CPU state
#[derive(Debug)]
pub struct CpuSm83<M: MemorySm83> {
    /// Register file
    pub regs: Registers,
    /// Interrupt Master Enable flag
    pub ime: bool,
    /// Pending IME change
    pub ime_delay: ImeDelay,
    /// Running / halted / stopped
    pub state: RunState,
    /// Color-mode power-on values and speed switching
    pub cgb_mode: bool,
    /// Treat the reserved opcode slots as fatal instead of 4-cycle no-ops
    pub strict_opcodes: bool,
    /// Next fetch does not advance PC (HALT with IME clear and an interrupt pending)
    halt_bug: bool,
    /// Total cycles executed
    pub cycles: u64,
    /// Memory interface
    pub memory: M,
}

impl<M: MemorySm83> CpuSm83<M> {
    /// Create a new SM83 CPU in monochrome power-on state
    pub fn new(memory: M) -> Self {
        Self {
            regs: Registers::new(),
            ime: false,
            ime_delay: ImeDelay::None,
            state: RunState::Running,
            cgb_mode: false,
            strict_opcodes: false,
            halt_bug: false,
            cycles: 0,
            memory,
        }
    }

    /// Reset to the post-boot state for the current mode
    pub fn reset(&mut self) {
        if self.cgb_mode {
            self.regs.reset_cgb();
        } else {
            self.regs.reset();
        }
        self.ime = false;
        self.ime_delay = ImeDelay::None;
        self.state = RunState::Running;
        self.halt_bug = false;
        self.cycles = 0;
    }

    pub fn is_halted(&self) -> bool {
        self.state == RunState::Halted
    }

    pub fn is_stopped(&self) -> bool {
        self.state == RunState::Stopped
    }

    /// Execute one instruction
    pub fn step(&mut self) -> Result<u32, CpuError> {
        match self.state {
            RunState::Halted => {
                if self.pending_interrupts() == 0 {
                    self.cycles += 4;
                    return Ok(4);
                }
                self.state = RunState::Running;
                if self.ime && self.ime_delay == ImeDelay::None {
                    let cycles = self.service_interrupt();
                    self.cycles += cycles as u64;
                    return Ok(cycles);
                }
            }
            RunState::Stopped => {
                if self.memory.read(IF_ADDR) & INT_JOYPAD == 0 {
                    self.cycles += 4;
                    return Ok(4);
                }
                self.state = RunState::Running;
            }
            RunState::Running => {}
        }

        let pc = self.regs.pc;
        let opcode = self.fetch();
        let mut cycles = self.execute(opcode, pc)?;

        self.advance_ime_delay();
        if self.ime && self.ime_delay == ImeDelay::None {
            cycles += self.service_interrupt();
        }

        self.cycles += cycles as u64;
        Ok(cycles)
    }

    fn advance_ime_delay(&mut self) {
        self.ime_delay = match self.ime_delay {
            ImeDelay::None => ImeDelay::None,
            ImeDelay::PendingEnable => ImeDelay::EnabledWithDelay,
            ImeDelay::EnabledWithDelay => {
                self.ime = true;
                ImeDelay::None
            }
        };
    }

    /// IE & IF restricted to the five real sources
    pub fn pending_interrupts(&self) -> u8 {
        self.memory.read(IE_ADDR) & self.memory.read(IF_ADDR) & 0x1F
    }

    /// Dispatch the highest-priority pending interrupt.
    ///
    /// Returns the cycles taken, or 0 if nothing was pending.
    pub fn service_interrupt(&mut self) -> u32 {
        let pending = self.pending_interrupts();
        if pending == 0 {
            return 0;
        }

        let bit = pending.trailing_zeros() as u8;
        let vector = 0x0040 + (bit as u16) * 8;

        self.ime = false;
        self.ime_delay = ImeDelay::None;
        let flags = self.memory.read(IF_ADDR);
        self.memory.write(IF_ADDR, flags & !(1 << bit));
        self.push_u16(self.regs.pc);

        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!(
                "CPU: interrupt {} -> {:04X} (return {:04X})",
                bit, vector, self.regs.pc
            )
        });

        self.regs.pc = vector;
        if self.state == RunState::Halted {
            self.state = RunState::Running;
        }
        INTERRUPT_CYCLES
    }

    fn fetch(&mut self) -> u8 {
        let val = self.memory.read(self.regs.pc);
        if self.halt_bug {
            self.halt_bug = false;
        } else {
            self.regs.pc = self.regs.pc.wrapping_add(1);
        }
        val
    }

    fn fetch_u16(&mut self) -> u16 {
        let lo = self.fetch() as u16;
        let hi = self.fetch() as u16;
        (hi << 8) | lo
    }

    fn push_u16(&mut self, val: u16) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.memory.write(self.regs.sp, (val >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.memory.write(self.regs.sp, val as u8);
    }

    fn pop_u16(&mut self) -> u16 {
        let lo = self.memory.read(self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = self.memory.read(self.regs.sp) as u16;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        (hi << 8) | lo
    }

    /// 8-bit operand by opcode index; 6 is the byte at (HL)
    fn read_r8(&self, idx: u8) -> u8 {
        if idx & 0x07 == 6 {
            self.memory.read(self.regs.hl())
        } else {
            self.regs.get_r8(idx)
        }
    }

    fn write_r8(&mut self, idx: u8, val: u8) {
        if idx & 0x07 == 6 {
            self.memory.write(self.regs.hl(), val);
        } else {
            self.regs.set_r8(idx, val);
        }
    }

    /// 16-bit register by opcode index (BC, DE, HL, SP)
    fn read_rr(&self, idx: u8) -> u16 {
        match idx & 0x03 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn write_rr(&mut self, idx: u8, val: u16) {
        match idx & 0x03 {
            0 => self.regs.set_bc(val),
            1 => self.regs.set_de(val),
            2 => self.regs.set_hl(val),
            _ => self.regs.sp = val,
        }
    }

    /// Branch condition by opcode index (NZ, Z, NC, C)
    fn condition(&self, cc: u8) -> bool {
        match cc & 0x03 {
            0 => !self.regs.zero(),
            1 => self.regs.zero(),
            2 => !self.regs.carry(),
            _ => self.regs.carry(),
        }
    }

    fn jump_relative(&mut self, offset: i8) {
        self.regs.pc = self.regs.pc.wrapping_add(offset as i16 as u16);
    }

    fn execute(&mut self, opcode: u8, pc: u16) -> Result<u32, CpuError> {
        let cycles = match opcode {
            // NOP
            0x00 => 4,

            // LD rr,d16
            0x01 | 0x11 | 0x21 | 0x31 => { let val = self.fetch_u16(); self.write_rr(opcode >> 4, val); 12 }

            // LD (BC),A / LD (DE),A / LD (HL+),A / LD (HL-),A
            0x02 => { self.memory.write(self.regs.bc(), self.regs.a); 8 }
            0x12 => { self.memory.write(self.regs.de(), self.regs.a); 8 }
            0x22 => { let addr = self.regs.hl(); self.memory.write(addr, self.regs.a); self.regs.set_hl(addr.wrapping_add(1)); 8 }
            0x32 => { let addr = self.regs.hl(); self.memory.write(addr, self.regs.a); self.regs.set_hl(addr.wrapping_sub(1)); 8 }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => { let idx = opcode >> 4; let val = self.read_rr(idx).wrapping_add(1); self.write_rr(idx, val); 8 }
            0x0B | 0x1B | 0x2B | 0x3B => { let idx = opcode >> 4; let val = self.read_rr(idx).wrapping_sub(1); self.write_rr(idx, val); 8 }

            // INC r / INC (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => {
                let idx = (opcode >> 3) & 0x07;
                let val = self.read_r8(idx);
                let result = self.regs.alu_inc(val);
                self.write_r8(idx, result);
                if idx == 6 { 12 } else { 4 }
            }

            // DEC r / DEC (HL)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => {
                let idx = (opcode >> 3) & 0x07;
                let val = self.read_r8(idx);
                let result = self.regs.alu_dec(val);
                self.write_r8(idx, result);
                if idx == 6 { 12 } else { 4 }
            }

            // LD r,d8 / LD (HL),d8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => {
                let idx = (opcode >> 3) & 0x07;
                let val = self.fetch();
                self.write_r8(idx, val);
                if idx == 6 { 12 } else { 8 }
            }

            // RLCA / RRCA / RLA / RRA (Z is always cleared)
            0x07 | 0x0F | 0x17 | 0x1F => {
                let result = self.regs.alu_shift((opcode >> 3) & 0x03, self.regs.a);
                self.regs.a = result;
                self.regs.set_zero(false);
                4
            }

            // LD (a16),SP
            0x08 => {
                let addr = self.fetch_u16();
                self.memory.write(addr, self.regs.sp as u8);
                self.memory.write(addr.wrapping_add(1), (self.regs.sp >> 8) as u8);
                20
            }

            // ADD HL,rr
            0x09 | 0x19 | 0x29 | 0x39 => { let val = self.read_rr(opcode >> 4); self.regs.alu_add_hl(val); 8 }

            // LD A,(BC) / LD A,(DE) / LD A,(HL+) / LD A,(HL-)
            0x0A => { self.regs.a = self.memory.read(self.regs.bc()); 8 }
            0x1A => { self.regs.a = self.memory.read(self.regs.de()); 8 }
            0x2A => { let addr = self.regs.hl(); self.regs.a = self.memory.read(addr); self.regs.set_hl(addr.wrapping_add(1)); 8 }
            0x3A => { let addr = self.regs.hl(); self.regs.a = self.memory.read(addr); self.regs.set_hl(addr.wrapping_sub(1)); 8 }

            // STOP
            0x10 => {
                self.fetch();
                if self.cgb_mode && self.memory.speed_switch() {
                    log(LogCategory::Cpu, LogLevel::Info, || {
                        format!("CPU: speed switch at {:04X}", pc)
                    });
                } else {
                    self.state = RunState::Stopped;
                }
                4
            }

            // JR r8 / JR cc,r8
            0x18 => { let offset = self.fetch() as i8; self.jump_relative(offset); 12 }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.fetch() as i8;
                if self.condition((opcode >> 3) & 0x03) { self.jump_relative(offset); 12 } else { 8 }
            }

            // DAA / CPL / SCF / CCF
            0x27 => { self.regs.alu_daa(); 4 }
            0x2F => { self.regs.alu_cpl(); 4 }
            0x37 => { self.regs.alu_scf(); 4 }
            0x3F => { self.regs.alu_ccf(); 4 }

            // HALT
            0x76 => {
                if !self.ime && self.ime_delay == ImeDelay::None && self.pending_interrupts() != 0 {
                    self.halt_bug = true;
                } else {
                    self.state = RunState::Halted;
                }
                4
            }

            // LD r,r' (0x40-0x7F, 0x76 is HALT above)
            0x40..=0x7F => {
                let dst = (opcode >> 3) & 0x07;
                let src = opcode & 0x07;
                let val = self.read_r8(src);
                self.write_r8(dst, val);
                if src == 6 || dst == 6 { 8 } else { 4 }
            }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP r (0x80-0xBF)
            0x80..=0xBF => {
                let src = opcode & 0x07;
                let val = self.read_r8(src);
                self.regs.alu_op((opcode >> 3) & 0x07, val);
                if src == 6 { 8 } else { 4 }
            }

            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 => {
                if self.condition((opcode >> 3) & 0x03) { self.regs.pc = self.pop_u16(); 20 } else { 8 }
            }

            // POP BC/DE/HL/AF
            0xC1 => { let val = self.pop_u16(); self.regs.set_bc(val); 12 }
            0xD1 => { let val = self.pop_u16(); self.regs.set_de(val); 12 }
            0xE1 => { let val = self.pop_u16(); self.regs.set_hl(val); 12 }
            0xF1 => { let val = self.pop_u16(); self.regs.set_af(val); 12 }

            // JP cc,a16
            0xC2 | 0xCA | 0xD2 | 0xDA => {
                let addr = self.fetch_u16();
                if self.condition((opcode >> 3) & 0x03) { self.regs.pc = addr; 16 } else { 12 }
            }

            // JP a16
            0xC3 => { self.regs.pc = self.fetch_u16(); 16 }

            // CALL cc,a16
            0xC4 | 0xCC | 0xD4 | 0xDC => {
                let addr = self.fetch_u16();
                if self.condition((opcode >> 3) & 0x03) {
                    self.push_u16(self.regs.pc);
                    self.regs.pc = addr;
                    24
                } else {
                    12
                }
            }

            // PUSH BC/DE/HL/AF
            0xC5 => { self.push_u16(self.regs.bc()); 16 }
            0xD5 => { self.push_u16(self.regs.de()); 16 }
            0xE5 => { self.push_u16(self.regs.hl()); 16 }
            0xF5 => { self.push_u16(self.regs.af()); 16 }

            // ADD/ADC/SUB/SBC/AND/XOR/OR/CP d8
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let val = self.fetch();
                self.regs.alu_op((opcode >> 3) & 0x07, val);
                8
            }

            // RST n
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                self.push_u16(self.regs.pc);
                self.regs.pc = (opcode & 0x38) as u16;
                16
            }

            // RET / RETI
            0xC9 => { self.regs.pc = self.pop_u16(); 16 }
            0xD9 => { self.regs.pc = self.pop_u16(); self.ime_delay = ImeDelay::PendingEnable; 16 }

            // CALL a16
            0xCD => { let addr = self.fetch_u16(); self.push_u16(self.regs.pc); self.regs.pc = addr; 24 }

            // CB prefix
            0xCB => { let cb_op = self.fetch(); self.execute_cb(cb_op) }

            // LDH (a8),A / LDH A,(a8)
            0xE0 => { let offset = self.fetch() as u16; self.memory.write(0xFF00 | offset, self.regs.a); 12 }
            0xF0 => { let offset = self.fetch() as u16; self.regs.a = self.memory.read(0xFF00 | offset); 12 }

            // LD (C),A / LD A,(C)
            0xE2 => { self.memory.write(0xFF00 | self.regs.c as u16, self.regs.a); 8 }
            0xF2 => { self.regs.a = self.memory.read(0xFF00 | self.regs.c as u16); 8 }

            // ADD SP,r8 / LD HL,SP+r8
            0xE8 => { let offset = self.fetch() as i8; self.regs.sp = self.regs.alu_sp_offset(offset); 16 }
            0xF8 => { let offset = self.fetch() as i8; let val = self.regs.alu_sp_offset(offset); self.regs.set_hl(val); 12 }

            // JP (HL) / LD SP,HL
            0xE9 => { self.regs.pc = self.regs.hl(); 4 }
            0xF9 => { self.regs.sp = self.regs.hl(); 8 }

            // LD (a16),A / LD A,(a16)
            0xEA => { let addr = self.fetch_u16(); self.memory.write(addr, self.regs.a); 16 }
            0xFA => { let addr = self.fetch_u16(); self.regs.a = self.memory.read(addr); 16 }

            // DI / EI
            0xF3 => { self.ime = false; self.ime_delay = ImeDelay::None; 4 }
            0xFB => {
                // A second EI inside the delay window does not restart it
                if !self.ime && self.ime_delay == ImeDelay::None {
                    self.ime_delay = ImeDelay::PendingEnable;
                }
                4
            }

            // D3 DB DD E3 E4 EB EC ED F4 FC FD: no instruction on real hardware
            _ => return self.illegal_opcode(opcode, pc),
        };
        Ok(cycles)
    }

    fn illegal_opcode(&mut self, opcode: u8, pc: u16) -> Result<u32, CpuError> {
        if self.strict_opcodes {
            log(LogCategory::Cpu, LogLevel::Error, || {
                format!("CPU: unimplemented opcode {:02X} at {:04X}", opcode, pc)
            });
            return Err(CpuError::UnimplementedOpcode { opcode, pc });
        }
        log(LogCategory::Cpu, LogLevel::Warn, || {
            format!("CPU: illegal opcode {:02X} at {:04X} treated as NOP", opcode, pc)
        });
        Ok(4)
    }

    fn execute_cb(&mut self, opcode: u8) -> u32 {
        let idx = opcode & 0x07;
        let bit = (opcode >> 3) & 0x07;
        let val = self.read_r8(idx);

        let result = match opcode >> 6 {
            0 => self.regs.alu_shift(bit, val),
            1 => {
                self.regs.alu_bit(bit, val);
                return if idx == 6 { 12 } else { 8 };
            }
            2 => val & !(1 << bit),
            _ => val | (1 << bit),
        };

        self.write_r8(idx, result);
        if idx == 6 { 16 } else { 8 }
    }
}

impl<M: MemorySm83> crate::Cpu for CpuSm83<M> {
    type Error = CpuError;

    fn reset(&mut self) {
        self.reset();
    }

    fn step(&mut self) -> Result<u32, CpuError> {
        self.step()
    }
}
