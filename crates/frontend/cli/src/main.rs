use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use sm83_core::logging::{LogCategory, LogConfig, LogLevel};
use sm83_core::System;
use sm83_gb::config::{GbConfig, Model};
use sm83_gb::mappers::rtc_path;
use sm83_gb::GbSystem;

#[derive(Parser)]
#[command(name = "sm83", about = "Headless Game Boy / Game Boy Color runner")]
struct Args {
    /// ROM image (.gb / .gbc)
    rom: PathBuf,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hardware model: auto, dmg or cgb
    #[arg(long)]
    model: Option<Model>,

    /// Stop on reserved opcodes instead of skipping them
    #[arg(long, default_value_t = false)]
    strict_opcodes: bool,

    /// Directory for battery saves
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Do not load or write battery saves
    #[arg(long, default_value_t = false)]
    no_battery: bool,

    /// Print bytes sent over the link port
    #[arg(long, default_value_t = false)]
    serial: bool,

    /// Dump the save state to this file as JSON
    #[arg(long)]
    state_out: Option<PathBuf>,

    /// Core log level (off, error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Per-category core log level, e.g. cpu=debug
    #[arg(long, value_parser = parse_category_level)]
    log_category: Vec<(LogCategory, LogLevel)>,

    /// Write core logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_category_level(s: &str) -> Result<(LogCategory, LogLevel), String> {
    let (category, level) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CATEGORY=LEVEL, got '{}'", s))?;
    Ok((category.parse()?, level.parse()?))
}

fn configure_logging(args: &Args) -> Result<()> {
    let cfg = LogConfig::global();
    if let Some(level) = args.log_level {
        cfg.set_global_level(level);
    }
    for &(category, level) in &args.log_category {
        cfg.set_level(category, level);
    }
    if let Some(path) = &args.log_file {
        cfg.set_log_file(path.clone())
            .with_context(|| format!("cannot open log file {}", path.display()))?;
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<GbConfig> {
    let mut config = match &args.config {
        Some(path) => GbConfig::load(path)?,
        None => GbConfig::default(),
    };
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.strict_opcodes {
        config.strict_opcodes = true;
    }
    if let Some(dir) = &args.save_dir {
        config.save_dir = Some(dir.clone());
    }
    if args.no_battery {
        config.battery_saves = false;
    }
    Ok(config)
}

/// Clock-only MBC3 carts persist just the `.rtc` sidecar
fn has_battery_save(save_path: &Path) -> bool {
    save_path.exists() || rtc_path(save_path).exists()
}

fn run_frames(sys: &mut GbSystem, args: &Args) -> Result<()> {
    let mut stdout = io::stdout();
    for _ in 0..args.frames {
        sys.step_frame()?;
        let out = sys.take_serial_output();
        if args.serial && !out.is_empty() {
            write!(stdout, "{}", String::from_utf8_lossy(&out))?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    configure_logging(&args)?;
    let config = load_config(&args)?;

    let data = fs::read(&args.rom)
        .with_context(|| format!("cannot read ROM {}", args.rom.display()))?;
    let mut sys = GbSystem::with_config(config.clone());
    sys.mount("Cartridge", &data)
        .with_context(|| format!("cannot load {}", args.rom.display()))?;

    let (title, battery) = match sys.cartridge() {
        Some(cart) => (cart.title().to_string(), cart.cart_type().battery),
        None => (String::new(), false),
    };
    info!(
        "Loaded \"{}\" in {} mode",
        title,
        if sys.cgb_mode() { "color" } else { "monochrome" }
    );

    let save_path = config.save_path(&args.rom);
    let persist = config.battery_saves && battery;
    if persist && has_battery_save(&save_path) && sys.load_battery(&save_path) {
        info!("Loaded battery save {}", save_path.display());
    }

    let result = run_frames(&mut sys, &args);

    if persist {
        if let Some(dir) = save_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create save directory {}", dir.display()))?;
        }
        if !sys.save_battery(&save_path) {
            warn!("Could not write battery save {}", save_path.display());
        }
    }
    result?;

    if let Some(path) = &args.state_out {
        let state = sys.save_state();
        let mut f = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    Ok(())
}
