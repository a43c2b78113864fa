//! Battery RAM and RTC persistence through `GbSystem`

mod common;

use std::fs;
use std::path::Path;

use common::RomBuilder;
use sm83_core::System;
use sm83_gb::config::GbConfig;
use sm83_gb::mappers::rtc_path;
use sm83_gb::GbSystem;

fn boot(rom: &[u8]) -> GbSystem {
    let mut sys = GbSystem::new();
    sys.mount("Cartridge", rom).unwrap();
    sys
}

#[test]
fn test_mbc1_battery_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("game.sav");
    // MBC1+RAM+BATTERY, 64KB ROM, 8KB RAM
    let rom = RomBuilder::new(0x03, 1, 0x02).build();

    let mut sys = boot(&rom);
    sys.bus_mut().write_byte(0x0000, 0x0A);
    sys.bus_mut().write_byte(0xA000, 0x5A);
    sys.bus_mut().write_byte(0xBFFF, 0xA5);
    assert!(sys.save_battery(&save));
    assert_eq!(fs::metadata(&save).unwrap().len(), 0x2000);

    let mut sys = boot(&rom);
    assert!(sys.load_battery(&save));
    sys.bus_mut().write_byte(0x0000, 0x0A);
    assert_eq!(sys.bus().read_byte(0xA000), 0x5A);
    assert_eq!(sys.bus().read_byte(0xBFFF), 0xA5);
}

#[test]
fn test_no_battery_no_save() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("game.sav");
    // MBC1+RAM without battery
    let rom = RomBuilder::new(0x02, 1, 0x02).build();

    let mut sys = boot(&rom);
    assert!(!sys.save_battery(&save));
    assert!(!save.exists());
    assert!(!sys.load_battery(&save));
}

#[test]
fn test_missing_save_file_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let rom = RomBuilder::new(0x03, 1, 0x02).build();
    let mut sys = boot(&rom);
    assert!(!sys.load_battery(&dir.path().join("absent.sav")));
    assert!(sys.step_frame().is_ok());
}

#[test]
fn test_mbc2_builtin_ram_persists() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("mbc2.sav");
    // MBC2+BATTERY
    let rom = RomBuilder::new(0x06, 1, 0x00).build();

    let mut sys = boot(&rom);
    sys.bus_mut().write_byte(0x0000, 0x0A);
    sys.bus_mut().write_byte(0xA010, 0x07);
    assert!(sys.save_battery(&save));
    assert_eq!(fs::metadata(&save).unwrap().len(), 512);

    let mut sys = boot(&rom);
    assert!(sys.load_battery(&save));
    sys.bus_mut().write_byte(0x0000, 0x0A);
    assert_eq!(sys.bus().read_byte(0xA010) & 0x0F, 0x07);
}

#[test]
fn test_mbc3_rtc_persists() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("clock.sav");
    // MBC3+TIMER+RAM+BATTERY
    let rom = RomBuilder::new(0x10, 1, 0x03).build();

    let mut sys = boot(&rom);
    let bus = sys.bus_mut();
    bus.write_byte(0x0000, 0x0A);
    // Halt the clock so wall time cannot move it
    bus.write_byte(0x4000, 0x0C);
    bus.write_byte(0xA000, 0x40);
    bus.write_byte(0x4000, 0x0B);
    bus.write_byte(0xA000, 5);
    bus.write_byte(0x4000, 0x0A);
    bus.write_byte(0xA000, 7);
    bus.write_byte(0x4000, 0x00);
    bus.write_byte(0xA123, 0x99);
    assert!(sys.save_battery(&save));
    assert!(rtc_path(&save).exists());

    let mut sys = boot(&rom);
    assert!(sys.load_battery(&save));
    let rtc = sys.cartridge().unwrap().controller().rtc().unwrap();
    assert_eq!(rtc.days, 5);
    assert_eq!(rtc.hours, 7);
    assert!(rtc.halted);

    sys.bus_mut().write_byte(0x0000, 0x0A);
    assert_eq!(sys.bus().read_byte(0xA123), 0x99);
}

#[test]
fn test_mbc3_clock_without_ram_persists() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("rtc.sav");
    // MBC3+TIMER+BATTERY, no cartridge RAM
    let rom = RomBuilder::new(0x0F, 0, 0x00).build();

    let mut sys = boot(&rom);
    let bus = sys.bus_mut();
    bus.write_byte(0x0000, 0x0A);
    bus.write_byte(0x4000, 0x0C);
    bus.write_byte(0xA000, 0x40);
    bus.write_byte(0x4000, 0x08);
    bus.write_byte(0xA000, 42);
    assert!(sys.save_battery(&save));
    assert!(!save.exists());
    assert!(rtc_path(&save).exists());

    let mut sys = boot(&rom);
    assert!(sys.load_battery(&save));
    let rtc = sys.cartridge().unwrap().controller().rtc().unwrap();
    assert_eq!(rtc.seconds, 42);
    assert!(rtc.halted);

    let bus = sys.bus_mut();
    bus.write_byte(0x0000, 0x0A);
    bus.write_byte(0x6000, 0x00);
    bus.write_byte(0x6000, 0x01);
    bus.write_byte(0x4000, 0x08);
    assert_eq!(sys.bus().read_byte(0xA000), 42);
}

#[test]
fn test_mbc3_save_from_elsewhere_without_rtc_file() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("imported.sav");
    let mut image = vec![0; 0x2000];
    image[0x123] = 0x99;
    fs::write(&save, &image).unwrap();
    let rom = RomBuilder::new(0x10, 1, 0x02).build();

    let mut sys = boot(&rom);
    assert!(sys.load_battery(&save));
    assert!(!sys.cartridge().unwrap().controller().rtc().unwrap().halted);
    sys.bus_mut().write_byte(0x0000, 0x0A);
    assert_eq!(sys.bus().read_byte(0xA123), 0x99);
}

#[test]
fn test_save_path_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = GbConfig {
        save_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let save = cfg.save_path(Path::new("roms/zelda.gbc"));
    assert_eq!(save, dir.path().join("zelda.sav"));

    let loaded = GbConfig::load(&{
        let path = dir.path().join("sm83.json");
        fs::write(&path, r#"{ "model": "dmg", "battery_saves": false }"#).unwrap();
        path
    })
    .unwrap();
    assert!(!loaded.battery_saves);
}
