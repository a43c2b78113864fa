//! Game Boy APU, register level.
//!
//! No samples are synthesized. The APU follows writes to the sound registers
//! through bus observers and keeps the state games can observe through NR52:
//! power, which channels are running, DAC state and length counters.
//!
//! ## Register Map
//!
//! - **$FF10-$FF14**: Pulse 1 (NR10-NR14)
//! - **$FF16-$FF19**: Pulse 2 (NR21-NR24)
//! - **$FF1A-$FF1E**: Wave (NR30-NR34)
//! - **$FF20-$FF23**: Noise (NR41-NR44)
//! - **$FF24-$FF25**: Master volume and panning (NR50, NR51)
//! - **$FF26**: Sound on/off (NR52): `P--- 4321`
//! - **$FF30-$FF3F**: Wave pattern RAM
//!
//! ## Frame Sequencer
//!
//! Runs at 512 Hz (every 8192 cycles). Length counters are clocked on the even
//! steps (256 Hz). Sweep and envelope steps have no visible effect at this level
//! and are not modeled.
//!
//! ## Channel enable
//!
//! - Trigger (NRx4 bit 7) enables the channel if its DAC is on, reloading an
//!   expired length counter with its maximum (64, or 256 for the wave channel).
//! - DAC off (NRx2 upper 5 bits zero, NR30 bit 7 clear) disables the channel.
//! - A length counter reaching zero with NRx4 bit 6 set disables the channel.
//!
//! While powered off every register write except NR52 and wave RAM is ignored.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bus::{GbBus, ObserverId};
use sm83_core::logging::{log, LogCategory, LogLevel};

/// 4194304 Hz / 512 Hz
const FRAME_SEQUENCER_PERIOD: u32 = 8192;

const NR52: u16 = 0xFF26;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Channel {
    enabled: bool,
    dac: bool,
    length: u16,
    length_enabled: bool,
    max_length: u16,
}

impl Channel {
    fn new(max_length: u16) -> Self {
        Self {
            enabled: false,
            dac: false,
            length: 0,
            length_enabled: false,
            max_length,
        }
    }

    fn load_length(&mut self, val: u16) {
        self.length = self.max_length - val;
    }

    fn set_dac(&mut self, on: bool) {
        self.dac = on;
        if !on {
            self.enabled = false;
        }
    }

    /// NRx4 write: length enable and trigger
    fn control(&mut self, val: u8) {
        self.length_enabled = val & 0x40 != 0;
        if val & 0x80 != 0 {
            if self.length == 0 {
                self.length = self.max_length;
            }
            self.enabled = self.dac;
        }
    }

    fn clock_length(&mut self) {
        if self.length_enabled && self.length > 0 {
            self.length -= 1;
            if self.length == 0 {
                self.enabled = false;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Apu {
    powered: bool,
    channels: [Channel; 4],
    sequencer_cycles: u32,
    sequencer_step: u8,
    wave_ram: [u8; 16],
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

impl Apu {
    /// State left behind by the boot ROM: powered, pulse 1 running
    pub fn new() -> Self {
        let mut apu = Self {
            powered: true,
            channels: [
                Channel::new(64),
                Channel::new(64),
                Channel::new(256),
                Channel::new(64),
            ],
            sequencer_cycles: 0,
            sequencer_step: 0,
            wave_ram: [0; 16],
        };
        apu.channels[0].dac = true;
        apu.channels[0].enabled = true;
        apu
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Register observers for NR10-NR52 and wave RAM
    pub fn connect(apu: &Rc<RefCell<Apu>>, bus: &mut GbBus) -> Vec<ObserverId> {
        (0xFF10..=NR52)
            .chain(0xFF30..=0xFF3F)
            .map(|addr| {
                let apu = Rc::clone(apu);
                bus.observers_mut().register(addr, move |addr, val| {
                    if let Ok(mut apu) = apu.try_borrow_mut() {
                        apu.write_register(addr, val);
                    }
                })
            })
            .collect()
    }

    pub fn powered(&self) -> bool {
        self.powered
    }

    /// NR52 low nibble
    pub fn status(&self) -> u8 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| ch.enabled)
            .fold(0, |bits, (i, _)| bits | 1 << i)
    }

    pub fn wave_ram(&self) -> &[u8; 16] {
        &self.wave_ram
    }

    fn power_off(&mut self) {
        log(LogCategory::Stubs, LogLevel::Debug, || "APU: power off".to_string());
        let wave_ram = self.wave_ram;
        *self = Self {
            powered: false,
            channels: [
                Channel::new(64),
                Channel::new(64),
                Channel::new(256),
                Channel::new(64),
            ],
            sequencer_cycles: 0,
            sequencer_step: 0,
            wave_ram,
        };
    }

    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            NR52 => {
                let on = val & 0x80 != 0;
                if !on && self.powered {
                    self.power_off();
                } else if on && !self.powered {
                    self.powered = true;
                    self.sequencer_step = 0;
                    self.sequencer_cycles = 0;
                }
            }
            0xFF30..=0xFF3F => self.wave_ram[(addr - 0xFF30) as usize] = val,
            _ if !self.powered => {
                log(LogCategory::Stubs, LogLevel::Trace, || {
                    format!("APU: write {:02X} to {:04X} while powered off", val, addr)
                });
            }

            0xFF11 => self.channels[0].load_length((val & 0x3F) as u16),
            0xFF16 => self.channels[1].load_length((val & 0x3F) as u16),
            0xFF1B => self.channels[2].load_length(val as u16),
            0xFF20 => self.channels[3].load_length((val & 0x3F) as u16),

            0xFF12 => self.channels[0].set_dac(val & 0xF8 != 0),
            0xFF17 => self.channels[1].set_dac(val & 0xF8 != 0),
            0xFF1A => self.channels[2].set_dac(val & 0x80 != 0),
            0xFF21 => self.channels[3].set_dac(val & 0xF8 != 0),

            0xFF14 => self.channels[0].control(val),
            0xFF19 => self.channels[1].control(val),
            0xFF1E => self.channels[2].control(val),
            0xFF23 => self.channels[3].control(val),

            _ => {}
        }
    }

    /// Advance the frame sequencer and publish NR52
    pub fn step(&mut self, cycles: u32, bus: &mut GbBus) {
        if !self.powered {
            bus.set_sound_status(0);
            return;
        }

        self.sequencer_cycles += cycles;
        while self.sequencer_cycles >= FRAME_SEQUENCER_PERIOD {
            self.sequencer_cycles -= FRAME_SEQUENCER_PERIOD;
            if self.sequencer_step % 2 == 0 {
                for ch in &mut self.channels {
                    ch.clock_length();
                }
            }
            self.sequencer_step = (self.sequencer_step + 1) & 7;
        }

        bus.set_sound_status(self.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Rc<RefCell<Apu>>, GbBus) {
        let mut bus = GbBus::new();
        let apu = Rc::new(RefCell::new(Apu::new()));
        Apu::connect(&apu, &mut bus);
        (apu, bus)
    }

    fn step(apu: &Rc<RefCell<Apu>>, bus: &mut GbBus, cycles: u32) {
        apu.borrow_mut().step(cycles, bus);
    }

    #[test]
    fn test_post_boot_status() {
        let (apu, mut bus) = setup();
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26), 0xF1);
        assert_eq!(bus.observers_mut().count(0xFF26), 1);
        assert_eq!(bus.observers_mut().count(0xFF3F), 1);
    }

    #[test]
    fn test_trigger_needs_dac() {
        let (apu, mut bus) = setup();
        bus.write_byte(0xFF19, 0x80);
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0);

        bus.write_byte(0xFF17, 0xF0);
        bus.write_byte(0xFF19, 0x80);
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0x02);

        // DAC off stops the channel
        bus.write_byte(0xFF17, 0x07);
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0);
    }

    #[test]
    fn test_length_counter_expires() {
        let (apu, mut bus) = setup();
        bus.write_byte(0xFF16, 0x3E);
        bus.write_byte(0xFF17, 0xF0);
        bus.write_byte(0xFF19, 0xC0);

        // Steps 0 and 2 clock length: 2 -> 1 -> 0
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD * 2);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0x02);
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0);
    }

    #[test]
    fn test_length_disabled_keeps_running() {
        let (apu, mut bus) = setup();
        bus.write_byte(0xFF16, 0x3F);
        bus.write_byte(0xFF17, 0xF0);
        bus.write_byte(0xFF19, 0x80);
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD * 16);
        assert_eq!(bus.read_byte(0xFF26) & 0x02, 0x02);
    }

    #[test]
    fn test_wave_length_and_dac() {
        let (apu, mut bus) = setup();
        bus.write_byte(0xFF1A, 0x80);
        bus.write_byte(0xFF1B, 0xFF);
        bus.write_byte(0xFF1E, 0xC0);
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26) & 0x04, 0x04);
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD);
        assert_eq!(bus.read_byte(0xFF26) & 0x04, 0);

        // Expired counter reloads to 256 on trigger
        bus.write_byte(0xFF1E, 0xC0);
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD * 2 * 255);
        assert_eq!(bus.read_byte(0xFF26) & 0x04, 0x04);
        step(&apu, &mut bus, FRAME_SEQUENCER_PERIOD * 2);
        assert_eq!(bus.read_byte(0xFF26) & 0x04, 0);
    }

    #[test]
    fn test_power_off_clears_and_ignores_writes() {
        let (apu, mut bus) = setup();
        bus.write_byte(0xFF24, 0x77);
        bus.write_byte(0xFF26, 0x00);
        step(&apu, &mut bus, 4);
        assert!(!apu.borrow().powered());
        assert_eq!(bus.read_byte(0xFF26), 0x70);
        assert_eq!(bus.read_byte(0xFF24), 0x00);

        bus.write_byte(0xFF21, 0xF0);
        bus.write_byte(0xFF23, 0x80);
        assert_eq!(bus.read_byte(0xFF21), 0x00);
        bus.write_byte(0xFF30, 0x5A);
        assert_eq!(bus.read_byte(0xFF30), 0x5A);
        assert_eq!(apu.borrow().wave_ram()[0], 0x5A);

        bus.write_byte(0xFF26, 0x80);
        bus.write_byte(0xFF21, 0xF0);
        bus.write_byte(0xFF23, 0x80);
        step(&apu, &mut bus, 4);
        assert_eq!(bus.read_byte(0xFF26), 0xF8);
        assert_eq!(bus.read_byte(0xFF21), 0xF0);
    }
}
