//! Game Boy PPU (LCD controller)
//!
//! The PPU owns no registers on the bus. It reads LCDC, SCX/SCY, palettes and
//! friends straight from the I/O block, writes LY and the STAT mode bits only
//! through [`GbBus::update_ly`] / [`GbBus::update_stat`], and watches LCDC
//! writes through a bus observer.
//!
//! # Timing (single speed)
//!
//! ```text
//! Mode 2  OAM scan      80 cycles
//! Mode 3  transfer     172 cycles   (line rendered at the end)
//! Mode 0  HBlank       204 cycles   (one HDMA block per entry)
//! Mode 1  VBlank       10 lines x 456 cycles
//! ```
//!
//! 154 lines, 70224 cycles per frame.
//!
//! # Priority
//!
//! Background color indices are kept per pixel while a line is drawn, so
//! sprites with the behind-background attribute are hidden by the BG color
//! index (1-3), not by the palette-mapped color.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::{GbBus, ObserverId};
use sm83_core::cpu_sm83::{INT_LCD_STAT, INT_VBLANK};
use sm83_core::types::Frame;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

const OAM_SCAN_CYCLES: u32 = 80;
const TRANSFER_CYCLES: u32 = 172;
const HBLANK_CYCLES: u32 = 204;
const LINE_CYCLES: u32 = OAM_SCAN_CYCLES + TRANSFER_CYCLES + HBLANK_CYCLES;
const LINES_PER_FRAME: u8 = 154;
pub const FRAME_CYCLES: u32 = LINE_CYCLES * LINES_PER_FRAME as u32;

const MAX_SPRITES_PER_LINE: usize = 10;

const LCDC: u16 = 0xFF40;
const STAT: u16 = 0xFF41;
const SCY: u16 = 0xFF42;
const SCX: u16 = 0xFF43;
const LYC: u16 = 0xFF45;
const BGP: u16 = 0xFF47;
const OBP0: u16 = 0xFF48;
const OBP1: u16 = 0xFF49;
const WY: u16 = 0xFF4A;
const WX: u16 = 0xFF4B;

// LCDC bits
const LCDC_ENABLE: u8 = 0x80;
const LCDC_WIN_TILEMAP: u8 = 0x40;
const LCDC_WIN_ENABLE: u8 = 0x20;
const LCDC_BG_WIN_TILES: u8 = 0x10;
const LCDC_BG_TILEMAP: u8 = 0x08;
const LCDC_OBJ_SIZE: u8 = 0x04;
const LCDC_OBJ_ENABLE: u8 = 0x02;
const LCDC_BG_WIN_ENABLE: u8 = 0x01;

// STAT interrupt selects
const STAT_HBLANK: u8 = 0x08;
const STAT_VBLANK: u8 = 0x10;
const STAT_OAM: u8 = 0x20;
const STAT_LYC: u8 = 0x40;

// Tile map / OAM attribute bits
const ATTR_BANK: u8 = 0x08;
const ATTR_DMG_PALETTE: u8 = 0x10;
const ATTR_XFLIP: u8 = 0x20;
const ATTR_YFLIP: u8 = 0x40;
const ATTR_PRIORITY: u8 = 0x80;

/// DMG shades: white, light gray, dark gray, black
const DMG_SHADES: [u32; 4] = [0xFFFFFFFF, 0xFFAAAAAA, 0xFF555555, 0xFF000000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

impl Mode {
    fn cycles(self) -> u32 {
        match self {
            Mode::OamScan => OAM_SCAN_CYCLES,
            Mode::Transfer => TRANSFER_CYCLES,
            Mode::HBlank => HBLANK_CYCLES,
            Mode::VBlank => LINE_CYCLES,
        }
    }
}

/// 2-bit color index of one tile pixel
fn tile_pixel(vram: &[u8], tile_addr: usize, row: usize, col: usize) -> u8 {
    let lo = vram[tile_addr + row * 2];
    let hi = vram[tile_addr + row * 2 + 1];
    let bit = 7 - col;
    (((hi >> bit) & 1) << 1) | ((lo >> bit) & 1)
}

/// Offset of a BG/window tile inside a VRAM bank
fn bg_tile_addr(lcdc: u8, tile: u8) -> usize {
    if lcdc & LCDC_BG_WIN_TILES != 0 {
        tile as usize * 16
    } else {
        (0x1000 + tile as i8 as isize * 16) as usize
    }
}

/// RGB555 palette entry to ARGB8888
fn cgb_color(ram: &[u8; 64], palette: u8, index: u8) -> u32 {
    let offset = (palette as usize & 7) * 8 + index as usize * 2;
    let c = u16::from_le_bytes([ram[offset], ram[offset + 1]]) as u32;
    let scale = |v: u32| (v << 3) | (v >> 2);
    let r = scale(c & 0x1F);
    let g = scale((c >> 5) & 0x1F);
    let b = scale((c >> 10) & 0x1F);
    0xFF00_0000 | (r << 16) | (g << 8) | b
}

fn dmg_color(palette: u8, index: u8) -> u32 {
    DMG_SHADES[((palette >> (index * 2)) & 0x03) as usize]
}

pub struct Ppu {
    mode: Mode,
    /// Cycles spent in the current mode
    dots: u32,
    line: u8,
    /// Window's own line counter, only advanced on lines that draw it
    window_line: u8,
    /// Combined STAT interrupt line from the previous update
    stat_line: bool,
    lcd_on: bool,
    cgb_mode: bool,
    framebuffer: Vec<u32>,
    bg_index: Vec<u8>,
    bg_priority: Vec<bool>,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Ppu {
    pub fn new(cgb_mode: bool) -> Self {
        Self {
            mode: Mode::OamScan,
            dots: 0,
            line: 0,
            window_line: 0,
            stat_line: false,
            lcd_on: false,
            cgb_mode,
            framebuffer: vec![DMG_SHADES[0]; SCREEN_WIDTH * SCREEN_HEIGHT],
            bg_index: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT],
            bg_priority: vec![false; SCREEN_WIDTH * SCREEN_HEIGHT],
        }
    }

    pub fn reset(&mut self, cgb_mode: bool) {
        *self = Self::new(cgb_mode);
    }

    /// Register the LCDC observer
    pub fn connect(ppu: &Rc<RefCell<Ppu>>, bus: &mut GbBus) -> ObserverId {
        let ppu = Rc::clone(ppu);
        bus.observers_mut().register(LCDC, move |_, val| {
            if let Ok(mut ppu) = ppu.try_borrow_mut() {
                ppu.lcdc_written(val);
            }
        })
    }

    fn lcdc_written(&mut self, val: u8) {
        if val & LCDC_ENABLE == 0 && self.lcd_on {
            self.lcd_on = false;
            self.line = 0;
            self.dots = 0;
            self.mode = Mode::HBlank;
            self.window_line = 0;
            self.framebuffer.fill(DMG_SHADES[0]);
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn line(&self) -> u8 {
        self.line
    }

    pub fn lcd_on(&self) -> bool {
        self.lcd_on
    }

    /// Copy of the current framebuffer
    pub fn frame(&self) -> Frame {
        Frame {
            width: SCREEN_WIDTH as u32,
            height: SCREEN_HEIGHT as u32,
            pixels: self.framebuffer.clone(),
        }
    }

    /// Advance by `cycles` PPU cycles. Returns true on entering VBlank.
    pub fn step(&mut self, cycles: u32, bus: &mut GbBus) -> bool {
        if bus.io(LCDC) & LCDC_ENABLE == 0 {
            if self.lcd_on {
                self.lcdc_written(0);
            }
            bus.update_ly(0);
            bus.update_stat(Mode::HBlank as u8, bus.io(LYC) == 0);
            self.stat_line = false;
            return false;
        }

        if !self.lcd_on {
            self.lcd_on = true;
            self.line = 0;
            self.dots = 0;
            self.window_line = 0;
            self.mode = Mode::OamScan;
            self.publish(bus);
        }

        let mut frame_done = false;
        self.dots += cycles;
        while self.dots >= self.mode.cycles() {
            self.dots -= self.mode.cycles();
            match self.mode {
                Mode::OamScan => self.mode = Mode::Transfer,
                Mode::Transfer => {
                    self.render_line(bus);
                    self.mode = Mode::HBlank;
                    bus.hblank_dma();
                }
                Mode::HBlank => {
                    self.line += 1;
                    if self.line as usize == SCREEN_HEIGHT {
                        self.mode = Mode::VBlank;
                        bus.request_interrupt(INT_VBLANK);
                        frame_done = true;
                    } else {
                        self.mode = Mode::OamScan;
                    }
                }
                Mode::VBlank => {
                    self.line += 1;
                    if self.line == LINES_PER_FRAME {
                        self.line = 0;
                        self.window_line = 0;
                        self.mode = Mode::OamScan;
                    }
                }
            }
            self.publish(bus);
        }
        self.publish(bus);
        frame_done
    }

    /// Push LY/STAT to the bus and raise STAT on a rising interrupt line
    fn publish(&mut self, bus: &mut GbBus) {
        bus.update_ly(self.line);
        let coincidence = self.line == bus.io(LYC);
        bus.update_stat(self.mode as u8, coincidence);

        let stat = bus.io(STAT);
        let line = (stat & STAT_LYC != 0 && coincidence)
            || (stat & STAT_HBLANK != 0 && self.mode == Mode::HBlank)
            || (stat & STAT_VBLANK != 0 && self.mode == Mode::VBlank)
            || (stat & STAT_OAM != 0 && self.mode == Mode::OamScan);
        if line && !self.stat_line {
            bus.request_interrupt(INT_LCD_STAT);
        }
        self.stat_line = line;
    }

    fn render_line(&mut self, bus: &GbBus) {
        if self.line as usize >= SCREEN_HEIGHT {
            return;
        }
        let lcdc = bus.io(LCDC);
        self.render_background(bus, lcdc);
        if lcdc & LCDC_OBJ_ENABLE != 0 {
            self.render_sprites(bus, lcdc);
        }
    }

    fn render_background(&mut self, bus: &GbBus, lcdc: u8) {
        let ly = self.line as usize;
        let row = ly * SCREEN_WIDTH;

        // DMG: LCDC bit 0 blanks BG and window. CGB: it only drops BG priority.
        if !self.cgb_mode && lcdc & LCDC_BG_WIN_ENABLE == 0 {
            self.framebuffer[row..row + SCREEN_WIDTH].fill(DMG_SHADES[0]);
            self.bg_index[row..row + SCREEN_WIDTH].fill(0);
            self.bg_priority[row..row + SCREEN_WIDTH].fill(false);
            return;
        }

        let (scx, scy) = (bus.io(SCX) as usize, bus.io(SCY) as usize);
        let (wx, wy) = (bus.io(WX) as usize, bus.io(WY) as usize);
        let bgp = bus.io(BGP);
        let vram0 = bus.vram_bank(0);
        let vram1 = bus.vram_bank(1);

        let window_visible = lcdc & LCDC_WIN_ENABLE != 0 && ly >= wy && wx <= 166;
        let mut window_drawn = false;

        for x in 0..SCREEN_WIDTH {
            let in_window = window_visible && x + 7 >= wx;
            let (map_base, px, py) = if in_window {
                window_drawn = true;
                let base = if lcdc & LCDC_WIN_TILEMAP != 0 { 0x1C00 } else { 0x1800 };
                (base, x + 7 - wx, self.window_line as usize)
            } else {
                let base = if lcdc & LCDC_BG_TILEMAP != 0 { 0x1C00 } else { 0x1800 };
                (base, (x + scx) & 0xFF, (ly + scy) & 0xFF)
            };

            let map_addr = map_base + (py / 8) * 32 + px / 8;
            let tile = vram0[map_addr];
            let attr = if self.cgb_mode { vram1[map_addr] } else { 0 };

            let mut tile_row = py % 8;
            let mut tile_col = px % 8;
            if attr & ATTR_YFLIP != 0 {
                tile_row = 7 - tile_row;
            }
            if attr & ATTR_XFLIP != 0 {
                tile_col = 7 - tile_col;
            }
            let data = if attr & ATTR_BANK != 0 { vram1 } else { vram0 };
            let index = tile_pixel(data, bg_tile_addr(lcdc, tile), tile_row, tile_col);

            self.bg_index[row + x] = index;
            self.bg_priority[row + x] = attr & ATTR_PRIORITY != 0;
            self.framebuffer[row + x] = if self.cgb_mode {
                cgb_color(bus.bg_palette_ram(), attr, index)
            } else {
                dmg_color(bgp, index)
            };
        }

        if window_drawn {
            self.window_line = self.window_line.wrapping_add(1);
        }
    }

    fn render_sprites(&mut self, bus: &GbBus, lcdc: u8) {
        let ly = self.line as i16;
        let row = ly as usize * SCREEN_WIDTH;
        let height: i16 = if lcdc & LCDC_OBJ_SIZE != 0 { 16 } else { 8 };
        let (obp0, obp1) = (bus.io(OBP0), bus.io(OBP1));

        // (oam index, top, left, tile, attributes)
        let mut sprites: Vec<(usize, i16, i16, u8, u8)> = bus
            .oam()
            .chunks_exact(4)
            .enumerate()
            .map(|(i, s)| (i, s[0] as i16 - 16, s[1] as i16 - 8, s[2], s[3]))
            .filter(|&(_, top, ..)| ly >= top && ly < top + height)
            .take(MAX_SPRITES_PER_LINE)
            .collect();
        // DMG: smaller X wins, then OAM order. CGB: OAM order only.
        if !self.cgb_mode {
            sprites.sort_by_key(|&(i, _, left, ..)| (left, i));
        }

        let mut claimed = [false; SCREEN_WIDTH];
        for (_, top, left, tile, attr) in sprites {
            let mut line = (ly - top) as usize;
            if attr & ATTR_YFLIP != 0 {
                line = height as usize - 1 - line;
            }
            let tile = if height == 16 {
                (tile & 0xFE) as usize + line / 8
            } else {
                tile as usize
            };
            let bank = if self.cgb_mode && attr & ATTR_BANK != 0 { 1 } else { 0 };
            let data = bus.vram_bank(bank);

            for col in 0..8i16 {
                let sx = left + col;
                if !(0..SCREEN_WIDTH as i16).contains(&sx) {
                    continue;
                }
                let sx = sx as usize;
                let px = (if attr & ATTR_XFLIP != 0 { 7 - col } else { col }) as usize;
                let index = tile_pixel(data, tile * 16, line % 8, px);
                if index == 0 || claimed[sx] {
                    continue;
                }
                claimed[sx] = true;
                if self.sprite_hidden(lcdc, attr, row + sx) {
                    continue;
                }

                self.framebuffer[row + sx] = if self.cgb_mode {
                    cgb_color(bus.obj_palette_ram(), attr, index)
                } else {
                    let palette = if attr & ATTR_DMG_PALETTE != 0 { obp1 } else { obp0 };
                    dmg_color(palette, index)
                };
            }
        }
    }

    fn sprite_hidden(&self, lcdc: u8, attr: u8, pixel: usize) -> bool {
        if self.bg_index[pixel] == 0 {
            return false;
        }
        if self.cgb_mode {
            lcdc & LCDC_BG_WIN_ENABLE != 0
                && (attr & ATTR_PRIORITY != 0 || self.bg_priority[pixel])
        } else {
            attr & ATTR_PRIORITY != 0
        }
    }
}
