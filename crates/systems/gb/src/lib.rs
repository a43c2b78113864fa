//! Game Boy / Game Boy Color system built around the SM83 core

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use sm83_core::cpu_sm83::{CpuError, CpuSm83, ImeDelay, Registers, RunState};
use sm83_core::logging::{log, LogCategory, LogLevel};
use sm83_core::{types::Frame, MountPointInfo, System};

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod config;
pub mod joypad;
pub mod mappers;
pub mod ppu;
pub mod serial;
pub mod timer;

use apu::Apu;
use bus::GbBus;
use cartridge::{Cartridge, CartridgeError};
use config::GbConfig;
use joypad::JoypadState;
use ppu::{Ppu, FRAME_CYCLES};

const CARTRIDGE: &str = "Cartridge";

#[derive(thiserror::Error, Debug)]
pub enum GbError {
    #[error("No cartridge loaded")]
    NoCartridge,
    #[error("Invalid mount point")]
    InvalidMountPoint,
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
    #[error(transparent)]
    Cpu(#[from] CpuError),
    #[error("cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}

/// CPU part of a save state
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CpuSnapshot {
    regs: Registers,
    ime: bool,
    ime_delay: ImeDelay,
    state: RunState,
    cycles: u64,
}

pub struct GbSystem {
    cpu: CpuSm83<GbBus>,
    ppu: Rc<RefCell<Ppu>>,
    apu: Rc<RefCell<Apu>>,
    config: GbConfig,
}

impl Default for GbSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl GbSystem {
    pub fn new() -> Self {
        Self::with_config(GbConfig::default())
    }

    pub fn with_config(config: GbConfig) -> Self {
        let mut bus = GbBus::new();
        let ppu = Rc::new(RefCell::new(Ppu::new(false)));
        let apu = Rc::new(RefCell::new(Apu::new()));
        Ppu::connect(&ppu, &mut bus);
        Apu::connect(&apu, &mut bus);

        let mut cpu = CpuSm83::new(bus);
        cpu.strict_opcodes = config.strict_opcodes;
        cpu.reset();

        Self {
            cpu,
            ppu,
            apu,
            config,
        }
    }

    pub fn config(&self) -> &GbConfig {
        &self.config
    }

    pub fn cpu(&self) -> &CpuSm83<GbBus> {
        &self.cpu
    }

    pub fn bus(&self) -> &GbBus {
        &self.cpu.memory
    }

    pub fn bus_mut(&mut self) -> &mut GbBus {
        &mut self.cpu.memory
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cpu.memory.cartridge()
    }

    pub fn cgb_mode(&self) -> bool {
        self.cpu.memory.cgb_mode()
    }

    /// Set controller state
    pub fn set_input(&mut self, state: JoypadState) {
        self.cpu.memory.set_joypad(state);
    }

    /// Bytes sent over the link port since the last call
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.cpu.memory.take_serial_output()
    }

    /// Write battery-backed RAM (and RTC) to `path`
    pub fn save_battery(&self, path: &Path) -> bool {
        match self.cartridge() {
            Some(cart) if cart.controller().has_battery() => cart.controller().save_ram(path),
            _ => false,
        }
    }

    /// Restore battery-backed RAM (and RTC) from `path`
    pub fn load_battery(&mut self, path: &Path) -> bool {
        match self.cpu.memory.cartridge_mut() {
            Some(cart) if cart.controller().has_battery() => {
                cart.mapper_mut().controller_mut().load_ram(path)
            }
            _ => false,
        }
    }

    /// One CPU instruction with the PPU, APU, timer and serial port in lockstep.
    ///
    /// Returns the CPU cycles taken and whether the PPU entered VBlank.
    pub fn step(&mut self) -> Result<(u32, bool), GbError> {
        let cycles = self.cpu.step()?;
        let bus = &mut self.cpu.memory;
        // The CPU clock doubles; the PPU, APU and serial port keep their rate
        let sub = if bus.double_speed() { cycles / 2 } else { cycles };

        let vblank = self.ppu.borrow_mut().step(sub, bus);
        self.apu.borrow_mut().step(sub, bus);
        bus.tima_step(cycles);
        bus.serial_step(sub);
        Ok((sub, vblank))
    }
}

impl System for GbSystem {
    type Error = GbError;

    fn reset(&mut self) {
        let cgb = self.cpu.memory.cgb_mode();
        self.cpu.memory.reset();
        self.cpu.cgb_mode = cgb;
        self.cpu.strict_opcodes = self.config.strict_opcodes;
        self.cpu.reset();
        self.ppu.borrow_mut().reset(cgb);
        self.apu.borrow_mut().reset();
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        if self.cartridge().is_none() {
            return Err(GbError::NoCartridge);
        }

        // With the LCD off no VBlank comes; hand back a frame every 70224 cycles
        let mut lcd_off_cycles = 0;
        loop {
            let (cycles, vblank) = self.step()?;
            if vblank {
                break;
            }
            if !self.ppu.borrow().lcd_on() {
                lcd_off_cycles += cycles;
                if lcd_off_cycles >= FRAME_CYCLES {
                    break;
                }
            }
        }

        Ok(self.ppu.borrow().frame())
    }

    fn save_state(&self) -> serde_json::Value {
        let cpu = CpuSnapshot {
            regs: self.cpu.regs,
            ime: self.cpu.ime,
            ime_delay: self.cpu.ime_delay,
            state: self.cpu.state,
            cycles: self.cpu.cycles,
        };
        serde_json::json!({
            "system": "gb",
            "version": 1,
            "cgb_mode": self.cgb_mode(),
            "cpu": cpu,
        })
    }

    fn load_state(&mut self, v: &serde_json::Value) -> Result<(), serde_json::Error> {
        if let Some(saved) = v.get("cgb_mode").and_then(serde_json::Value::as_bool) {
            if saved != self.cgb_mode() {
                let mode = |cgb: bool| if cgb { "color" } else { "monochrome" };
                return Err(serde::de::Error::custom(format!(
                    "state was saved in {} mode, system is running in {} mode",
                    mode(saved),
                    mode(self.cgb_mode())
                )));
            }
        }
        let cpu: CpuSnapshot =
            serde_json::from_value(v.get("cpu").cloned().unwrap_or_default())?;
        self.cpu.regs = cpu.regs;
        self.cpu.ime = cpu.ime;
        self.cpu.ime_delay = cpu.ime_delay;
        self.cpu.state = cpu.state;
        self.cpu.cycles = cpu.cycles;
        log(LogCategory::Cpu, LogLevel::Debug, || {
            format!("Loaded state at PC={:04X}", self.cpu.regs.pc)
        });
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: CARTRIDGE.to_string(),
            name: "Cartridge Slot".to_string(),
            extensions: vec!["gb".to_string(), "gbc".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE {
            return Err(GbError::InvalidMountPoint);
        }

        let cart = Cartridge::from_bytes(data.to_vec())?;
        let cgb = self.config.model.cgb_mode(cart.header().cgb);
        self.cpu.memory.load_cartridge(cart);
        self.cpu.memory.set_cgb_mode(cgb);
        self.reset();
        Ok(())
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE {
            return Err(GbError::InvalidMountPoint);
        }

        self.cpu.memory.eject_cartridge();
        Ok(())
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        mount_point_id == CARTRIDGE && self.cartridge().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header_checksum;
    use crate::config::Model;

    /// 32KB ROM-only image whose entry point spins forever
    fn spin_rom(cgb_flag: u8) -> Vec<u8> {
        let mut rom = vec![0; 0x8000];
        rom[0x100] = 0x18; // JR -2
        rom[0x101] = 0xFE;
        rom[0x143] = cgb_flag;
        rom[0x14D] = header_checksum(&rom);
        rom
    }

    #[test]
    fn test_gb_mount_points() {
        let sys = GbSystem::new();
        let mount_points = sys.mount_points();
        assert_eq!(mount_points.len(), 1);
        assert_eq!(mount_points[0].id, "Cartridge");
        assert!(mount_points[0].required);
    }

    #[test]
    fn test_gb_mount_unmount() {
        let mut sys = GbSystem::new();
        assert!(!sys.is_mounted("Cartridge"));

        sys.mount("Cartridge", &spin_rom(0)).unwrap();
        assert!(sys.is_mounted("Cartridge"));
        assert!(!sys.cgb_mode());

        sys.unmount("Cartridge").unwrap();
        assert!(!sys.is_mounted("Cartridge"));
        assert!(matches!(sys.unmount("Tape"), Err(GbError::InvalidMountPoint)));
    }

    #[test]
    fn test_gb_mount_rejects_bad_image() {
        let mut sys = GbSystem::new();
        let mut rom = spin_rom(0);
        rom[0x14D] ^= 0xFF;
        assert!(matches!(
            sys.mount("Cartridge", &rom),
            Err(GbError::Cartridge(CartridgeError::ChecksumMismatch { .. }))
        ));
        assert!(matches!(
            sys.mount("Cartridge", &[]),
            Err(GbError::Cartridge(CartridgeError::Empty))
        ));
        assert!(!sys.is_mounted("Cartridge"));
    }

    #[test]
    fn test_gb_model_selection() {
        let mut sys = GbSystem::new();
        sys.mount("Cartridge", &spin_rom(0x80)).unwrap();
        assert!(sys.cgb_mode());
        assert_eq!(sys.cpu().regs.a, 0x11);

        let mut sys = GbSystem::with_config(GbConfig {
            model: Model::Dmg,
            ..Default::default()
        });
        sys.mount("Cartridge", &spin_rom(0xC0)).unwrap();
        assert!(!sys.cgb_mode());
        assert_eq!(sys.cpu().regs.a, 0x01);
    }

    #[test]
    fn test_gb_step_frame_without_cart() {
        let mut sys = GbSystem::new();
        assert!(matches!(sys.step_frame(), Err(GbError::NoCartridge)));
    }

    #[test]
    fn test_gb_step_frame_with_cart() {
        let mut sys = GbSystem::new();
        sys.mount("Cartridge", &spin_rom(0)).unwrap();

        let frame = sys.step_frame().unwrap();
        assert_eq!(frame.width, 160);
        assert_eq!(frame.height, 144);
        assert_eq!(frame.pixels.len(), 160 * 144);
        assert_eq!(sys.bus().read_byte(0xFF44), 144);

        let before = sys.cpu().cycles;
        sys.step_frame().unwrap();
        let elapsed = sys.cpu().cycles - before;
        assert!((FRAME_CYCLES as u64..FRAME_CYCLES as u64 + 12).contains(&elapsed));
    }

    #[test]
    fn test_gb_step_frame_lcd_off() {
        let mut sys = GbSystem::new();
        sys.mount("Cartridge", &spin_rom(0)).unwrap();
        sys.bus_mut().write_byte(0xFF40, 0x00);

        let before = sys.cpu().cycles;
        sys.step_frame().unwrap();
        let elapsed = sys.cpu().cycles - before;
        assert!((FRAME_CYCLES as u64..FRAME_CYCLES as u64 + 12).contains(&elapsed));
        assert_eq!(sys.bus().read_byte(0xFF44), 0);
    }

    #[test]
    fn test_gb_save_load_state() {
        let mut sys = GbSystem::new();
        sys.mount("Cartridge", &spin_rom(0)).unwrap();
        sys.step_frame().unwrap();
        let state = sys.save_state();
        assert_eq!(state["system"], "gb");
        assert_eq!(state["version"], 1);
        assert_eq!(state["cpu"]["regs"]["pc"], 0x100);

        let mut sys2 = GbSystem::new();
        sys2.load_state(&state).unwrap();
        assert_eq!(sys2.cpu().regs.pc, sys.cpu().regs.pc);
        assert_eq!(sys2.cpu().cycles, sys.cpu().cycles);

        assert!(sys2.load_state(&serde_json::json!({"system": "gb"})).is_err());
    }

    #[test]
    fn test_gb_load_state_rejects_other_mode() {
        let mut color = GbSystem::new();
        color.mount("Cartridge", &spin_rom(0x80)).unwrap();
        color.step_frame().unwrap();
        let state = color.save_state();
        assert_eq!(state["cgb_mode"], true);

        let mut mono = GbSystem::new();
        mono.mount("Cartridge", &spin_rom(0)).unwrap();
        let pc = mono.cpu().regs.pc;
        let err = mono.load_state(&state).unwrap_err();
        assert!(err.to_string().contains("color"), "{}", err);
        assert_eq!(mono.cpu().regs.pc, pc);

        let mut other = GbSystem::new();
        other.mount("Cartridge", &spin_rom(0x80)).unwrap();
        other.load_state(&state).unwrap();
        assert_eq!(other.cpu().cycles, color.cpu().cycles);
    }

    #[test]
    fn test_gb_input_raises_joypad_interrupt() {
        let mut sys = GbSystem::new();
        sys.bus_mut().write_byte(0xFF00, 0x10);
        sys.bus_mut().write_byte(0xFF0F, 0x00);
        sys.set_input(JoypadState {
            start: true,
            ..Default::default()
        });
        assert_eq!(sys.bus().read_byte(0xFF0F) & 0x10, 0x10);
        assert_eq!(sys.bus().read_byte(0xFF00) & 0x0F, 0x07);
    }

    #[test]
    fn test_gb_reset_keeps_observers() {
        let mut sys = GbSystem::new();
        sys.mount("Cartridge", &spin_rom(0)).unwrap();
        sys.reset();
        sys.reset();
        assert_eq!(sys.bus_mut().observers_mut().count(0xFF40), 1);
        assert_eq!(sys.bus_mut().observers_mut().count(0xFF26), 1);
    }

    #[test]
    fn test_gb_battery_without_cart() {
        let mut sys = GbSystem::new();
        assert!(!sys.save_battery(Path::new("/nonexistent/x.sav")));
        assert!(!sys.load_battery(Path::new("/nonexistent/x.sav")));
    }
}
