//! Joypad (`$FF00`, P1)
//!
//! - Bit 5: select action buttons (0 = selected)
//! - Bit 4: select direction keys (0 = selected)
//! - Bits 3-0: input lines, active low
//!
//! The host pushes a [`JoypadState`] snapshot; the joypad interrupt fires on any
//! input line going from high to low.

use serde::{Deserialize, Serialize};

/// Button state supplied by the host, `true` = pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoypadState {
    pub right: bool,
    pub left: bool,
    pub up: bool,
    pub down: bool,
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
}

impl JoypadState {
    /// Direction nibble, bit set = pressed (Right, Left, Up, Down)
    fn directions(&self) -> u8 {
        (self.right as u8) | (self.left as u8) << 1 | (self.up as u8) << 2 | (self.down as u8) << 3
    }

    /// Button nibble, bit set = pressed (A, B, Select, Start)
    fn buttons(&self) -> u8 {
        (self.a as u8) | (self.b as u8) << 1 | (self.select as u8) << 2 | (self.start as u8) << 3
    }

    /// Build from a bitmask: 0=Right, 1=Left, 2=Up, 3=Down, 4=A, 5=B, 6=Select, 7=Start
    pub fn from_bits(bits: u8) -> Self {
        Self {
            right: bits & 0x01 != 0,
            left: bits & 0x02 != 0,
            up: bits & 0x04 != 0,
            down: bits & 0x08 != 0,
            a: bits & 0x10 != 0,
            b: bits & 0x20 != 0,
            select: bits & 0x40 != 0,
            start: bits & 0x80 != 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joypad {
    /// P1 bits 4-5 as last written
    select: u8,
    state: JoypadState,
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            state: JoypadState::default(),
        }
    }

    pub fn reset(&mut self) {
        self.select = 0x30;
    }

    /// Low nibble of P1 (active low)
    fn lines(&self) -> u8 {
        let mut pressed = 0;
        if self.select & 0x10 == 0 {
            pressed |= self.state.directions();
        }
        if self.select & 0x20 == 0 {
            pressed |= self.state.buttons();
        }
        !pressed & 0x0F
    }

    pub fn read(&self) -> u8 {
        0xC0 | self.select | self.lines()
    }

    /// Returns true if the write pulled an input line low
    pub fn write(&mut self, val: u8) -> bool {
        let before = self.lines();
        self.select = val & 0x30;
        before & !self.lines() != 0
    }

    /// Returns true if a newly pressed button is on a selected line
    pub fn set_state(&mut self, state: JoypadState) -> bool {
        let before = self.lines();
        self.state = state;
        before & !self.lines() != 0
    }

    pub fn state(&self) -> JoypadState {
        self.state
    }
}
