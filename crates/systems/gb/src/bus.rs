//! Game Boy memory bus
//!
//! The bus decodes the 16-bit address space and routes every access to the
//! cartridge, the internal memories or an I/O register. The PPU and APU live
//! outside the bus and learn about register writes through write observers.
//!
//! # Memory Map
//!
//! ```text
//! $0000-$3FFF  ROM bank 0 (MBC may remap in MBC1 mode 1)
//! $4000-$7FFF  ROM bank 1-N (switchable via MBC)
//! $8000-$9FFF  Video RAM (8KB) [CGB: 2 banks, VBK]
//! $A000-$BFFF  External RAM (via MBC)
//! $C000-$CFFF  Work RAM bank 0 (4KB)
//! $D000-$DFFF  Work RAM bank 1 (4KB) [CGB: banks 1-7, SVBK]
//! $E000-$FDFF  Echo RAM (mirror of $C000-$DDFF)
//! $FE00-$FE9F  OAM (160 bytes, 40 sprites x 4 bytes)
//! $FEA0-$FEFF  Not usable (reads $FF)
//! $FF00-$FF7F  I/O registers
//! $FF80-$FFFE  High RAM (127 bytes)
//! $FFFF        Interrupt Enable
//! ```
//!
//! # I/O read masks
//!
//! Unused register bits read back as 1: IF `| $E0`, TAC `| $F8`, STAT `| $80`,
//! the NRxx sound registers per their write-only bits. Unmapped registers read
//! `$FF` and ignore writes.
//!
//! # Write observers
//!
//! [`GbBus::write_byte`] first calls every observer registered for the address,
//! in registration order, then performs the routed write. [`GbBus::write_direct`]
//! does the same write without notifying anyone; DMA and the PPU's own register
//! updates go through it.
//!
//! # Color-mode registers
//!
//! - `$FF4D (KEY1)`: bit 0 speed switch armed, bit 7 current speed
//! - `$FF4F (VBK)`: VRAM bank
//! - `$FF51-$FF55 (HDMA1-5)`: VRAM DMA source, destination and control
//! - `$FF68-$FF6B (BCPS/BCPD/OCPS/OCPD)`: palette index and data
//! - `$FF70 (SVBK)`: WRAM bank for $D000-$DFFF (0 selects 1)
//!
//! All of these read `$FF` and ignore writes in monochrome mode.

use std::collections::HashMap;
use std::fmt;

use crate::cartridge::Cartridge;
use crate::joypad::{Joypad, JoypadState};
use crate::serial::Serial;
use crate::timer::Timer;
use sm83_core::cpu_sm83::{MemorySm83, INT_JOYPAD, INT_SERIAL, INT_TIMER};
use sm83_core::logging::{log, LogCategory, LogLevel};

pub const VRAM_BANK_SIZE: usize = 0x2000;
pub const WRAM_BANK_SIZE: usize = 0x1000;
pub const OAM_SIZE: usize = 0xA0;
pub const PALETTE_RAM_SIZE: usize = 64;

/// Unused-bit masks OR-ed into reads of $FF10-$FF2F
const SOUND_READ_MASK: [u8; 0x20] = [
    0x80, 0x3F, 0x00, 0xFF, 0xBF, // NR10-NR14
    0xFF, 0x3F, 0x00, 0xFF, 0xBF, // NR20-NR24
    0x7F, 0xFF, 0x9F, 0xFF, 0xBF, // NR30-NR34
    0xFF, 0xFF, 0x00, 0x00, 0xBF, // NR40-NR44
    0x00, 0x00, 0x70, // NR50-NR52
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Register values left behind by the boot ROM
const POST_BOOT_IO: [(u16, u8); 24] = [
    (0xFF10, 0x80),
    (0xFF11, 0xBF),
    (0xFF12, 0xF3),
    (0xFF13, 0xFF),
    (0xFF14, 0xBF),
    (0xFF16, 0x3F),
    (0xFF18, 0xFF),
    (0xFF19, 0xBF),
    (0xFF1A, 0x7F),
    (0xFF1B, 0xFF),
    (0xFF1C, 0x9F),
    (0xFF1D, 0xFF),
    (0xFF1E, 0xBF),
    (0xFF20, 0xFF),
    (0xFF23, 0xBF),
    (0xFF24, 0x77),
    (0xFF25, 0xF3),
    (0xFF26, 0xF1),
    (0xFF40, 0x91),
    (0xFF41, 0x05),
    (0xFF46, 0xFF),
    (0xFF47, 0xFC),
    (0xFF48, 0xFF),
    (0xFF49, 0xFF),
];

/// Handle returned by [`WriteObservers::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type ObserverFn = Box<dyn FnMut(u16, u8)>;

/// Per-address write callbacks, notified in registration order
#[derive(Default)]
pub struct WriteObservers {
    next_id: u64,
    by_addr: HashMap<u16, Vec<(ObserverId, ObserverFn)>>,
}

impl fmt::Debug for WriteObservers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteObservers")
            .field("addresses", &self.by_addr.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl WriteObservers {
    pub fn register<F>(&mut self, addr: u16, f: F) -> ObserverId
    where
        F: FnMut(u16, u8) + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.by_addr.entry(addr).or_default().push((id, Box::new(f)));
        id
    }

    /// Remove one observer. Returns false if the id is unknown.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        let mut found = false;
        self.by_addr.retain(|_, list| {
            let before = list.len();
            list.retain(|(oid, _)| *oid != id);
            found |= list.len() != before;
            !list.is_empty()
        });
        found
    }

    pub fn notify(&mut self, addr: u16, val: u8) {
        if let Some(list) = self.by_addr.get_mut(&addr) {
            for (_, f) in list.iter_mut() {
                f(addr, val);
            }
        }
    }

    pub fn count(&self, addr: u16) -> usize {
        self.by_addr.get(&addr).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.by_addr.clear();
    }
}

/// Color-mode VRAM DMA registers and HBlank transfer state
#[derive(Debug, Clone, Default)]
struct VramDma {
    /// Source address, low 4 bits clear
    src: u16,
    /// Destination offset inside VRAM, low 4 bits clear
    dst: u16,
    /// Blocks left in an HBlank transfer
    remaining: u8,
    hblank_active: bool,
    /// HDMA5 value when no HBlank transfer is running
    status: u8,
}

/// Game Boy memory bus
pub struct GbBus {
    vram: Vec<u8>,
    wram: Vec<u8>,
    oam: [u8; OAM_SIZE],
    io: [u8; 0x80],
    hram: [u8; 0x7F],
    ie: u8,
    if_reg: u8,
    cartridge: Option<Cartridge>,
    pub timer: Timer,
    joypad: Joypad,
    serial: Serial,
    observers: WriteObservers,

    cgb_mode: bool,
    vram_bank: u8,
    wram_bank: u8,
    bg_palette: [u8; PALETTE_RAM_SIZE],
    bcps: u8,
    obj_palette: [u8; PALETTE_RAM_SIZE],
    ocps: u8,
    speed_armed: bool,
    double_speed: bool,
    vram_dma: VramDma,
}

impl fmt::Debug for GbBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbBus")
            .field("cgb_mode", &self.cgb_mode)
            .field("ie", &self.ie)
            .field("if", &self.if_reg)
            .field("cartridge", &self.cartridge.as_ref().map(Cartridge::title))
            .field("observers", &self.observers)
            .finish()
    }
}

impl Default for GbBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Store into palette RAM and auto-increment the index when bit 7 is set
fn write_palette(ram: &mut [u8; PALETTE_RAM_SIZE], index: &mut u8, val: u8) {
    ram[(*index & 0x3F) as usize] = val;
    if *index & 0x80 != 0 {
        *index = 0x80 | (index.wrapping_add(1) & 0x3F);
    }
}

impl GbBus {
    pub fn new() -> Self {
        let mut bus = Self {
            vram: vec![0; VRAM_BANK_SIZE * 2],
            wram: vec![0; WRAM_BANK_SIZE * 8],
            oam: [0; OAM_SIZE],
            io: [0; 0x80],
            hram: [0; 0x7F],
            ie: 0,
            if_reg: 0,
            cartridge: None,
            timer: Timer::new(),
            joypad: Joypad::new(),
            serial: Serial::new(),
            observers: WriteObservers::default(),
            cgb_mode: false,
            vram_bank: 0,
            wram_bank: 1,
            bg_palette: [0; PALETTE_RAM_SIZE],
            bcps: 0,
            obj_palette: [0; PALETTE_RAM_SIZE],
            ocps: 0,
            speed_armed: false,
            double_speed: false,
            vram_dma: VramDma::default(),
        };
        bus.reset();
        bus
    }

    /// Clear memories and restore post-boot register values.
    ///
    /// The cartridge keeps its RAM; observers stay registered.
    pub fn reset(&mut self) {
        self.vram.fill(0);
        self.wram.fill(0);
        self.oam.fill(0);
        self.io.fill(0);
        self.hram.fill(0);
        for (addr, val) in POST_BOOT_IO {
            self.io[(addr & 0x7F) as usize] = val;
        }
        self.ie = 0;
        self.if_reg = 0x01;
        self.timer.reset();
        self.joypad.reset();
        self.serial.reset();
        self.vram_bank = 0;
        self.wram_bank = 1;
        self.bg_palette = [0xFF; PALETTE_RAM_SIZE];
        self.obj_palette = [0; PALETTE_RAM_SIZE];
        self.bcps = 0;
        self.ocps = 0;
        self.speed_armed = false;
        self.double_speed = false;
        self.vram_dma = VramDma {
            status: 0xFF,
            ..Default::default()
        };
        if let Some(cart) = &mut self.cartridge {
            cart.reset();
        }
    }

    pub fn load_cartridge(&mut self, cart: Cartridge) {
        self.cartridge = Some(cart);
    }

    pub fn eject_cartridge(&mut self) -> Option<Cartridge> {
        self.cartridge.take()
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    pub fn cartridge_mut(&mut self) -> Option<&mut Cartridge> {
        self.cartridge.as_mut()
    }

    pub fn set_cgb_mode(&mut self, cgb: bool) {
        self.cgb_mode = cgb;
    }

    pub fn cgb_mode(&self) -> bool {
        self.cgb_mode
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    pub fn observers_mut(&mut self) -> &mut WriteObservers {
        &mut self.observers
    }

    pub fn request_interrupt(&mut self, mask: u8) {
        self.if_reg |= mask & 0x1F;
    }

    pub fn set_joypad(&mut self, state: JoypadState) {
        if self.joypad.set_state(state) {
            self.request_interrupt(INT_JOYPAD);
        }
    }

    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.serial.take_output()
    }

    /// Advance DIV/TIMA by CPU cycles, raising the timer interrupt on overflow
    pub fn tima_step(&mut self, cycles: u32) {
        if self.timer.tima_step(cycles) {
            self.request_interrupt(INT_TIMER);
        }
    }

    pub fn serial_step(&mut self, cycles: u32) {
        if self.serial.step(cycles) {
            self.request_interrupt(INT_SERIAL);
        }
    }

    /// Raw I/O register byte, without read masks
    pub fn io(&self, addr: u16) -> u8 {
        self.io[(addr & 0x7F) as usize]
    }

    /// LY is owned by the PPU and only changes through here
    pub fn update_ly(&mut self, ly: u8) {
        self.io[0x44] = ly;
    }

    /// Set the STAT mode bits and LY=LYC flag, keeping the interrupt selects
    pub fn update_stat(&mut self, mode: u8, coincidence: bool) {
        self.io[0x41] = (self.io[0x41] & 0x78) | ((coincidence as u8) << 2) | (mode & 0x03);
    }

    pub fn apu_powered(&self) -> bool {
        self.io[0x26] & 0x80 != 0
    }

    /// Publish channel-active bits into NR52
    pub fn set_sound_status(&mut self, channels: u8) {
        self.io[0x26] = (self.io[0x26] & 0x80) | (channels & 0x0F);
    }

    pub fn vram_bank(&self, bank: usize) -> &[u8] {
        let start = (bank & 1) * VRAM_BANK_SIZE;
        &self.vram[start..start + VRAM_BANK_SIZE]
    }

    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    pub fn bg_palette_ram(&self) -> &[u8; PALETTE_RAM_SIZE] {
        &self.bg_palette
    }

    pub fn obj_palette_ram(&self) -> &[u8; PALETTE_RAM_SIZE] {
        &self.obj_palette
    }

    fn wram_index(&self, addr: u16) -> usize {
        let offset = addr as usize & 0x0FFF;
        if addr & 0x1000 == 0 {
            offset
        } else {
            let bank = if self.cgb_mode { self.wram_bank.max(1) } else { 1 };
            bank as usize * WRAM_BANK_SIZE + offset
        }
    }

    fn vram_index(&self, addr: u16) -> usize {
        self.vram_bank as usize * VRAM_BANK_SIZE + (addr as usize & 0x1FFF)
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.cartridge.as_ref().map_or(0xFF, |c| c.mapper().read_rom(addr)),
            0x8000..=0x9FFF => self.vram[self.vram_index(addr)],
            0xA000..=0xBFFF => self.cartridge.as_ref().map_or(0xFF, |c| c.mapper().read_ram(addr)),
            0xC000..=0xDFFF => self.wram[self.wram_index(addr)],
            0xE000..=0xFDFF => self.wram[self.wram_index(addr - 0x2000)],
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize],
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00..=0xFF7F => self.read_io(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ie,
        }
    }

    /// Notify observers, then write
    pub fn write_byte(&mut self, addr: u16, val: u8) {
        self.observers.notify(addr, val);
        self.write_direct(addr, val);
    }

    /// Routed write that skips observer notification
    pub fn write_direct(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF => {
                if let Some(cart) = &mut self.cartridge {
                    cart.mapper_mut().write_rom(addr, val);
                }
            }
            0x8000..=0x9FFF => {
                let i = self.vram_index(addr);
                self.vram[i] = val;
            }
            0xA000..=0xBFFF => {
                if let Some(cart) = &mut self.cartridge {
                    cart.mapper_mut().write_ram(addr, val);
                }
            }
            0xC000..=0xDFFF => {
                let i = self.wram_index(addr);
                self.wram[i] = val;
            }
            0xE000..=0xFDFF => {
                let i = self.wram_index(addr - 0x2000);
                self.wram[i] = val;
            }
            0xFE00..=0xFE9F => self.oam[(addr - 0xFE00) as usize] = val,
            0xFEA0..=0xFEFF => {
                log(LogCategory::Bus, LogLevel::Trace, || {
                    format!("Bus: write {:02X} to unusable {:04X}", val, addr)
                });
            }
            0xFF00..=0xFF7F => self.write_io(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ie = val,
        }
    }

    fn read_io(&self, addr: u16) -> u8 {
        let reg = (addr & 0x7F) as usize;
        match addr {
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read_register(addr),
            0xFF04..=0xFF07 => self.timer.read_register(addr),
            0xFF0F => self.if_reg | 0xE0,
            0xFF10..=0xFF2F => self.io[reg] | SOUND_READ_MASK[reg - 0x10],
            0xFF30..=0xFF3F => self.io[reg],
            0xFF41 => self.io[reg] | 0x80,
            0xFF40 | 0xFF42..=0xFF4B => self.io[reg],
            0xFF4D if self.cgb_mode => {
                0x7E | ((self.double_speed as u8) << 7) | self.speed_armed as u8
            }
            0xFF4F if self.cgb_mode => 0xFE | self.vram_bank,
            0xFF55 if self.cgb_mode => {
                if self.vram_dma.hblank_active {
                    (self.vram_dma.remaining - 1) & 0x7F
                } else {
                    self.vram_dma.status
                }
            }
            0xFF68 if self.cgb_mode => self.bcps | 0x40,
            0xFF69 if self.cgb_mode => self.bg_palette[(self.bcps & 0x3F) as usize],
            0xFF6A if self.cgb_mode => self.ocps | 0x40,
            0xFF6B if self.cgb_mode => self.obj_palette[(self.ocps & 0x3F) as usize],
            0xFF70 if self.cgb_mode => 0xF8 | self.wram_bank,
            _ => 0xFF,
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        let reg = (addr & 0x7F) as usize;
        match addr {
            0xFF00 => {
                if self.joypad.write(val) {
                    self.request_interrupt(INT_JOYPAD);
                }
            }
            0xFF01 | 0xFF02 => self.serial.write_register(addr, val),
            0xFF04..=0xFF07 => self.timer.write_register(addr, val),
            0xFF0F => self.if_reg = val & 0x1F,
            0xFF10..=0xFF25 => {
                if self.apu_powered() {
                    self.io[reg] = val;
                }
            }
            0xFF26 => {
                if val & 0x80 == 0 {
                    self.io[0x10..=0x25].fill(0);
                    self.io[reg] = 0;
                } else {
                    self.io[reg] = 0x80 | (self.io[reg] & 0x0F);
                }
            }
            0xFF30..=0xFF3F => self.io[reg] = val,
            0xFF41 => self.io[reg] = (val & 0x78) | (self.io[reg] & 0x07),
            0xFF44 => {}
            0xFF40 | 0xFF42 | 0xFF43 | 0xFF45 | 0xFF47..=0xFF4B => self.io[reg] = val,
            0xFF46 => {
                self.io[reg] = val;
                self.oam_dma(val);
            }
            0xFF4D if self.cgb_mode => self.speed_armed = val & 0x01 != 0,
            0xFF4F if self.cgb_mode => self.vram_bank = val & 0x01,
            0xFF51 if self.cgb_mode => {
                self.vram_dma.src = ((val as u16) << 8) | (self.vram_dma.src & 0x00F0)
            }
            0xFF52 if self.cgb_mode => {
                self.vram_dma.src = (self.vram_dma.src & 0xFF00) | (val & 0xF0) as u16
            }
            0xFF53 if self.cgb_mode => {
                self.vram_dma.dst = (((val & 0x1F) as u16) << 8) | (self.vram_dma.dst & 0x00F0)
            }
            0xFF54 if self.cgb_mode => {
                self.vram_dma.dst = (self.vram_dma.dst & 0x1F00) | (val & 0xF0) as u16
            }
            0xFF55 if self.cgb_mode => self.write_hdma5(val),
            0xFF68 if self.cgb_mode => self.bcps = val & 0xBF,
            0xFF69 if self.cgb_mode => write_palette(&mut self.bg_palette, &mut self.bcps, val),
            0xFF6A if self.cgb_mode => self.ocps = val & 0xBF,
            0xFF6B if self.cgb_mode => write_palette(&mut self.obj_palette, &mut self.ocps, val),
            0xFF70 if self.cgb_mode => self.wram_bank = val & 0x07,
            _ => {
                log(LogCategory::Bus, LogLevel::Trace, || {
                    format!("Bus: write {:02X} to unmapped I/O {:04X}", val, addr)
                });
            }
        }
    }

    /// Copy 160 bytes from `page << 8` into OAM. Pages 0xE0 and up read the
    /// work RAM echo.
    fn oam_dma(&mut self, page: u8) {
        let page = if page >= 0xE0 { page & 0xDF } else { page };
        let base = (page as u16) << 8;
        for i in 0..OAM_SIZE {
            self.oam[i] = self.read_byte(base.wrapping_add(i as u16));
        }
    }

    /// Copy `len` bytes from the DMA source to the VRAM destination, advancing both
    fn vram_dma_copy(&mut self, len: u16) {
        for _ in 0..len {
            let val = self.read_byte(self.vram_dma.src);
            self.write_direct(0x8000 | (self.vram_dma.dst & 0x1FFF), val);
            self.vram_dma.src = self.vram_dma.src.wrapping_add(1);
            self.vram_dma.dst = (self.vram_dma.dst + 1) & 0x1FFF;
        }
    }

    fn write_hdma5(&mut self, val: u8) {
        if self.vram_dma.hblank_active && val & 0x80 == 0 {
            self.vram_dma.hblank_active = false;
            self.vram_dma.status = 0x80 | (self.vram_dma.remaining - 1);
            log(LogCategory::Bus, LogLevel::Debug, || {
                format!("HDMA: cancelled with {} blocks left", self.vram_dma.remaining)
            });
            return;
        }

        let blocks = (val & 0x7F) + 1;
        if val & 0x80 == 0 {
            log(LogCategory::Bus, LogLevel::Debug, || {
                format!(
                    "GDMA: {:04X} -> {:04X}, {} bytes",
                    self.vram_dma.src,
                    0x8000 | self.vram_dma.dst,
                    blocks as u16 * 16
                )
            });
            self.vram_dma_copy(blocks as u16 * 16);
            self.vram_dma.status = 0xFF;
        } else {
            self.vram_dma.hblank_active = true;
            self.vram_dma.remaining = blocks;
        }
    }

    /// Copy one 16-byte block of an HBlank transfer; called on HBlank entry.
    ///
    /// Returns true if a block was copied.
    pub fn hblank_dma(&mut self) -> bool {
        if !self.vram_dma.hblank_active {
            return false;
        }
        self.vram_dma_copy(16);
        self.vram_dma.remaining -= 1;
        if self.vram_dma.remaining == 0 {
            self.vram_dma.hblank_active = false;
            self.vram_dma.status = 0xFF;
        }
        true
    }
}

impl MemorySm83 for GbBus {
    fn read(&self, addr: u16) -> u8 {
        self.read_byte(addr)
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.write_byte(addr, val);
    }

    fn speed_switch(&mut self) -> bool {
        if !self.cgb_mode || !self.speed_armed {
            return false;
        }
        self.double_speed = !self.double_speed;
        self.speed_armed = false;
        self.timer.write_register(0xFF04, 0);
        log(LogCategory::Cpu, LogLevel::Info, || {
            format!(
                "Speed switch: {} speed",
                if self.double_speed { "double" } else { "normal" }
            )
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::header_checksum;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn cart(cart_type: u8, rom_code: u8, ram_code: u8) -> Cartridge {
        let mut rom = vec![0; 0x8000 << rom_code];
        for bank in 0..rom.len() / 0x4000 {
            rom[bank * 0x4000 + 0x200] = bank as u8;
        }
        rom[0x147] = cart_type;
        rom[0x148] = rom_code;
        rom[0x149] = ram_code;
        rom[0x14D] = header_checksum(&rom);
        Cartridge::from_bytes(rom).unwrap()
    }

    fn cgb_bus() -> GbBus {
        let mut bus = GbBus::new();
        bus.set_cgb_mode(true);
        bus
    }

    #[test]
    fn test_no_cartridge_reads_open_bus() {
        let bus = GbBus::new();
        assert_eq!(bus.read_byte(0x0000), 0xFF);
        assert_eq!(bus.read_byte(0xA000), 0xFF);
    }

    #[test]
    fn test_rom_banking_through_bus() {
        let mut bus = GbBus::new();
        bus.load_cartridge(cart(0x01, 2, 0));
        assert_eq!(bus.read_byte(0x4200), 1);
        bus.write_byte(0x2000, 5);
        assert_eq!(bus.read_byte(0x4200), 5);
        assert_eq!(bus.read_byte(0x0200), 0);
    }

    #[test]
    fn test_external_ram_through_bus() {
        let mut bus = GbBus::new();
        bus.load_cartridge(cart(0x03, 0, 0x02));
        bus.write_byte(0xA000, 0x42);
        assert_eq!(bus.read_byte(0xA000), 0xFF);
        bus.write_byte(0x0000, 0x0A);
        bus.write_byte(0xA000, 0x42);
        assert_eq!(bus.read_byte(0xA000), 0x42);
    }

    #[test]
    fn test_wram_and_echo() {
        let mut bus = GbBus::new();
        bus.write_byte(0xC000, 0x12);
        bus.write_byte(0xDDFF, 0x34);
        assert_eq!(bus.read_byte(0xE000), 0x12);
        assert_eq!(bus.read_byte(0xFDFF), 0x34);
        bus.write_byte(0xE001, 0x56);
        assert_eq!(bus.read_byte(0xC001), 0x56);
    }

    #[test]
    fn test_unusable_region() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFEA0, 0x12);
        assert_eq!(bus.read_byte(0xFEA0), 0xFF);
        assert_eq!(bus.read_byte(0xFEFF), 0xFF);
    }

    #[test]
    fn test_hram_and_ie() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF80, 0xAA);
        bus.write_byte(0xFFFE, 0xBB);
        bus.write_byte(0xFFFF, 0x1F);
        assert_eq!(bus.read_byte(0xFF80), 0xAA);
        assert_eq!(bus.read_byte(0xFFFE), 0xBB);
        assert_eq!(bus.read_byte(0xFFFF), 0x1F);
    }

    #[test]
    fn test_register_read_masks() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF0F, 0x00);
        assert_eq!(bus.read_byte(0xFF0F), 0xE0);
        bus.write_byte(0xFF07, 0x05);
        assert_eq!(bus.read_byte(0xFF07), 0xFD);
        bus.write_byte(0xFF41, 0xFF);
        assert_eq!(bus.read_byte(0xFF41) & 0xF8, 0xF8);
        assert_eq!(bus.read_byte(0xFF4C), 0xFF);
    }

    #[test]
    fn test_div_write_resets() {
        let mut bus = GbBus::new();
        bus.tima_step(0x400);
        assert_eq!(bus.read_byte(0xFF04), 0x04);
        bus.write_byte(0xFF04, 0x99);
        assert_eq!(bus.read_byte(0xFF04), 0x00);
    }

    #[test]
    fn test_timer_interrupt() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF0F, 0);
        bus.write_byte(0xFF06, 0xF0);
        bus.write_byte(0xFF05, 0xFF);
        bus.write_byte(0xFF07, 0x05);
        bus.tima_step(16);
        assert_eq!(bus.read_byte(0xFF05), 0xF0);
        assert_eq!(bus.read_byte(0xFF0F) & INT_TIMER, INT_TIMER);
    }

    #[test]
    fn test_ly_is_read_only() {
        let mut bus = GbBus::new();
        bus.update_ly(42);
        bus.write_byte(0xFF44, 0);
        assert_eq!(bus.read_byte(0xFF44), 42);
    }

    #[test]
    fn test_stat_mode_bits_owned_by_ppu() {
        let mut bus = GbBus::new();
        bus.update_stat(3, true);
        bus.write_byte(0xFF41, 0x40);
        assert_eq!(bus.read_byte(0xFF41), 0x80 | 0x40 | 0x04 | 0x03);
    }

    #[test]
    fn test_observers_fire_in_order_before_write() {
        let mut bus = GbBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = Rc::clone(&seen);
        bus.observers_mut()
            .register(0xFF42, move |addr, val| s.borrow_mut().push((1, addr, val)));
        let s = Rc::clone(&seen);
        let second = bus
            .observers_mut()
            .register(0xFF42, move |addr, val| s.borrow_mut().push((2, addr, val)));

        bus.write_byte(0xFF42, 0x33);
        assert_eq!(*seen.borrow(), vec![(1, 0xFF42, 0x33), (2, 0xFF42, 0x33)]);
        assert_eq!(bus.read_byte(0xFF42), 0x33);

        assert!(bus.observers_mut().unregister(second));
        assert!(!bus.observers_mut().unregister(second));
        bus.write_byte(0xFF42, 0x44);
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_write_direct_skips_observers() {
        let mut bus = GbBus::new();
        let hits = Rc::new(RefCell::new(0));
        let h = Rc::clone(&hits);
        bus.observers_mut().register(0xFF43, move |_, _| *h.borrow_mut() += 1);
        bus.write_direct(0xFF43, 7);
        assert_eq!(*hits.borrow(), 0);
        assert_eq!(bus.read_byte(0xFF43), 7);
        assert_eq!(bus.observers_mut().count(0xFF43), 1);
    }

    #[test]
    fn test_oam_dma() {
        let mut bus = GbBus::new();
        for i in 0..OAM_SIZE as u16 {
            bus.write_byte(0xC100 + i, i as u8);
        }
        let hits = Rc::new(RefCell::new(0));
        let h = Rc::clone(&hits);
        bus.observers_mut().register(0xFE00, move |_, _| *h.borrow_mut() += 1);

        bus.write_byte(0xFF46, 0xC1);
        assert_eq!(bus.read_byte(0xFE00), 0);
        assert_eq!(bus.read_byte(0xFE9F), 0x9F);
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_oam_dma_high_page_reads_wram_echo() {
        let mut bus = GbBus::new();
        for i in 0..OAM_SIZE as u16 {
            bus.write_byte(0xC000 + i, 0x40 + i as u8);
            bus.write_byte(0xDE00 + i, !(i as u8));
        }
        bus.write_byte(0xFF46, 0xE0);
        assert_eq!(bus.read_byte(0xFE00), 0x40);
        assert_eq!(bus.read_byte(0xFE9F), 0x40 + 0x9F);

        bus.write_byte(0xFF46, 0xFE);
        assert_eq!(bus.read_byte(0xFE00), 0xFF);
        assert_eq!(bus.read_byte(0xFE10), 0xEF);
    }

    #[test]
    fn test_cgb_registers_hidden_in_dmg_mode() {
        let mut bus = GbBus::new();
        for addr in [0xFF4D, 0xFF4F, 0xFF55, 0xFF68, 0xFF69, 0xFF70] {
            bus.write_byte(addr, 0x01);
            assert_eq!(bus.read_byte(addr), 0xFF, "{:04X}", addr);
        }
        assert!(!bus.speed_switch());
    }

    #[test]
    fn test_wram_banking() {
        let mut bus = cgb_bus();
        for bank in 1..8u8 {
            bus.write_byte(0xFF70, bank);
            bus.write_byte(0xD000, bank);
        }
        bus.write_byte(0xFF70, 0);
        assert_eq!(bus.read_byte(0xFF70), 0xF8);
        assert_eq!(bus.read_byte(0xD000), 1);
        bus.write_byte(0xFF70, 5);
        assert_eq!(bus.read_byte(0xD000), 5);
        assert_eq!(bus.read_byte(0xF000), 5);
        bus.write_byte(0xC000, 0x77);
        assert_eq!(bus.read_byte(0xC000), 0x77);
    }

    #[test]
    fn test_vram_banking() {
        let mut bus = cgb_bus();
        bus.write_byte(0x8000, 0x11);
        bus.write_byte(0xFF4F, 1);
        assert_eq!(bus.read_byte(0xFF4F), 0xFF);
        assert_eq!(bus.read_byte(0x8000), 0x00);
        bus.write_byte(0x8000, 0x22);
        assert_eq!(bus.vram_bank(0)[0], 0x11);
        assert_eq!(bus.vram_bank(1)[0], 0x22);
        bus.write_byte(0xFF4F, 0);
        assert_eq!(bus.read_byte(0xFF4F), 0xFE);
    }

    #[test]
    fn test_palette_auto_increment() {
        let mut bus = cgb_bus();
        bus.write_byte(0xFF68, 0x80 | 0x3E);
        bus.write_byte(0xFF69, 0xAA);
        bus.write_byte(0xFF69, 0xBB);
        bus.write_byte(0xFF69, 0xCC);
        assert_eq!(bus.bg_palette_ram()[0x3E], 0xAA);
        assert_eq!(bus.bg_palette_ram()[0x3F], 0xBB);
        assert_eq!(bus.bg_palette_ram()[0x00], 0xCC);
        assert_eq!(bus.read_byte(0xFF68), 0xC1);

        bus.write_byte(0xFF6A, 0x05);
        bus.write_byte(0xFF6B, 0x12);
        bus.write_byte(0xFF6B, 0x34);
        assert_eq!(bus.obj_palette_ram()[5], 0x34);
        assert_eq!(bus.read_byte(0xFF6B), 0x34);
    }

    #[test]
    fn test_speed_switch() {
        let mut bus = cgb_bus();
        assert_eq!(bus.read_byte(0xFF4D), 0x7E);
        assert!(!bus.speed_switch());
        bus.write_byte(0xFF4D, 0x01);
        assert_eq!(bus.read_byte(0xFF4D), 0x7F);
        assert!(bus.speed_switch());
        assert!(bus.double_speed());
        assert_eq!(bus.read_byte(0xFF4D), 0xFE);
    }

    fn fill_source(bus: &mut GbBus, len: u16) {
        for i in 0..len {
            bus.write_byte(0xC000 + i, (i as u8).wrapping_add(1));
        }
        bus.write_byte(0xFF51, 0xC0);
        bus.write_byte(0xFF52, 0x0F);
        bus.write_byte(0xFF53, 0x81);
        bus.write_byte(0xFF54, 0x0F);
    }

    #[test]
    fn test_general_purpose_dma() {
        let mut bus = cgb_bus();
        fill_source(&mut bus, 0x40);
        bus.write_byte(0xFF55, 0x03);
        assert_eq!(bus.read_byte(0xFF55), 0xFF);
        assert_eq!(bus.read_byte(0x8100), 1);
        assert_eq!(bus.read_byte(0x813F), 0x40);
        assert_eq!(bus.read_byte(0x8140), 0);
    }

    #[test]
    fn test_hblank_dma_state_machine() {
        let mut bus = cgb_bus();
        fill_source(&mut bus, 0x30);
        bus.write_byte(0xFF55, 0x82);
        assert_eq!(bus.read_byte(0xFF55), 0x02);
        assert_eq!(bus.read_byte(0x8100), 0);

        assert!(bus.hblank_dma());
        assert_eq!(bus.read_byte(0x8100), 1);
        assert_eq!(bus.read_byte(0x8110), 0);
        assert_eq!(bus.read_byte(0xFF55), 0x01);

        assert!(bus.hblank_dma());
        assert!(bus.hblank_dma());
        assert_eq!(bus.read_byte(0x812F), 0x30);
        assert_eq!(bus.read_byte(0xFF55), 0xFF);
        assert!(!bus.hblank_dma());
    }

    #[test]
    fn test_hblank_dma_cancel() {
        let mut bus = cgb_bus();
        fill_source(&mut bus, 0x40);
        bus.write_byte(0xFF55, 0x83);
        assert!(bus.hblank_dma());
        bus.write_byte(0xFF55, 0x00);
        assert_eq!(bus.read_byte(0xFF55), 0x82);
        assert!(!bus.hblank_dma());
        assert_eq!(bus.read_byte(0x8110), 0);
    }

    #[test]
    fn test_sound_power_off_clears_and_blocks_registers() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF24, 0x55);
        assert_eq!(bus.read_byte(0xFF24), 0x55);
        bus.write_byte(0xFF30, 0x12);

        bus.write_byte(0xFF26, 0x00);
        assert_eq!(bus.read_byte(0xFF26), 0x70);
        assert_eq!(bus.read_byte(0xFF24), 0x00);
        bus.write_byte(0xFF24, 0x55);
        assert_eq!(bus.read_byte(0xFF24), 0x00);
        bus.write_byte(0xFF31, 0x34);
        assert_eq!(bus.read_byte(0xFF30), 0x12);
        assert_eq!(bus.read_byte(0xFF31), 0x34);

        bus.write_byte(0xFF26, 0x80);
        assert_eq!(bus.read_byte(0xFF26), 0xF0);
        bus.set_sound_status(0x03);
        assert_eq!(bus.read_byte(0xFF26), 0xF3);
    }

    #[test]
    fn test_sound_read_masks() {
        let bus = GbBus::new();
        assert_eq!(bus.read_byte(0xFF11), 0xBF);
        assert_eq!(bus.read_byte(0xFF13), 0xFF);
        assert_eq!(bus.read_byte(0xFF26), 0xF1);
        assert_eq!(bus.read_byte(0xFF27), 0xFF);
    }

    #[test]
    fn test_joypad_interrupt_on_press() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF0F, 0);
        bus.write_byte(0xFF00, 0x10);
        bus.set_joypad(JoypadState {
            start: true,
            ..Default::default()
        });
        assert_eq!(bus.read_byte(0xFF0F) & INT_JOYPAD, INT_JOYPAD);
        assert_eq!(bus.read_byte(0xFF00) & 0x0F, 0x07);
    }

    #[test]
    fn test_serial_interrupt_and_output() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF0F, 0);
        bus.write_byte(0xFF01, b'o');
        bus.write_byte(0xFF02, 0x81);
        bus.serial_step(4096);
        assert_eq!(bus.read_byte(0xFF0F) & INT_SERIAL, INT_SERIAL);
        assert_eq!(bus.take_serial_output(), b"o");
    }

    #[test]
    fn test_reset_restores_post_boot_values() {
        let mut bus = GbBus::new();
        bus.write_byte(0xFF40, 0x00);
        bus.write_byte(0xC000, 0x99);
        bus.reset();
        assert_eq!(bus.read_byte(0xFF40), 0x91);
        assert_eq!(bus.read_byte(0xFF47), 0xFC);
        assert_eq!(bus.read_byte(0xFF0F), 0xE1);
        assert_eq!(bus.read_byte(0xC000), 0x00);
    }
}
