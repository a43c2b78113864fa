//! Emulator configuration (JSON)
//!
//! ```json
//! { "model": "cgb", "strict_opcodes": true, "save_dir": "saves" }
//! ```
//!
//! Missing fields take their defaults; unknown fields are rejected.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cartridge::CgbSupport;
use crate::GbError;

/// Hardware model to emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Color mode when the cartridge declares color support
    #[default]
    Auto,
    Dmg,
    Cgb,
}

impl Model {
    /// Whether a cartridge with `support` runs in color mode
    pub fn cgb_mode(self, support: CgbSupport) -> bool {
        match self {
            Model::Auto => support != CgbSupport::None,
            Model::Dmg => false,
            Model::Cgb => true,
        }
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Model::Auto),
            "dmg" | "gb" => Ok(Model::Dmg),
            "cgb" | "gbc" => Ok(Model::Cgb),
            other => Err(format!("unknown model '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GbConfig {
    pub model: Model,
    /// Reserved opcodes stop emulation instead of running as no-ops
    pub strict_opcodes: bool,
    /// Load and store battery-backed RAM (and the RTC) around a run
    pub battery_saves: bool,
    /// Directory for save files; next to the ROM when unset
    pub save_dir: Option<PathBuf>,
}

impl Default for GbConfig {
    fn default() -> Self {
        Self {
            model: Model::Auto,
            strict_opcodes: false,
            battery_saves: true,
            save_dir: None,
        }
    }
}

impl GbConfig {
    pub fn load(path: &Path) -> Result<Self, GbError> {
        let text = fs::read_to_string(path).map_err(|source| GbError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, GbError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Battery save path for a ROM file
    pub fn save_path(&self, rom: &Path) -> PathBuf {
        let sav = rom.with_extension("sav");
        match (&self.save_dir, sav.file_name()) {
            (Some(dir), Some(name)) => dir.join(name),
            _ => sav,
        }
    }
}
