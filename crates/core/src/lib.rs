//! Shared primitives for the SM83 emulator: the CPU core, the system and CPU
//! traits the frontends drive, and the logging facility.

pub mod cpu_sm83;
pub mod logging;
pub mod types {
    use serde::{Deserialize, Serialize};

    /// Finished picture, row-major ARGB8888
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Frame {
        pub width: u32,
        pub height: u32,
        pub pixels: Vec<u32>,
    }

    impl Frame {
        pub fn new(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                pixels: vec![0; (width * height) as usize],
            }
        }
    }
}

use serde_json::Value;

/// Anything that executes one instruction per `step`
pub trait Cpu {
    type Error: std::error::Error + Send + Sync + 'static;

    fn reset(&mut self);

    /// Returns the cycles the instruction took
    fn step(&mut self) -> Result<u32, Self::Error>;
}

/// A media slot on a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Identifier passed to `mount`/`unmount`
    pub id: String,
    /// Display name
    pub name: String,
    /// Accepted file extensions, without the dot
    pub extensions: Vec<String>,
    pub required: bool,
}

/// A complete machine as seen by a frontend
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Back to the post-boot state; mounted media stays
    fn reset(&mut self);

    /// Run until the next picture is complete
    fn step_frame(&mut self) -> Result<types::Frame, Self::Error>;

    /// JSON snapshot of machine state. Never contains cartridge data.
    fn save_state(&self) -> Value;

    fn load_state(&mut self, v: &Value) -> Result<(), serde_json::Error>;

    fn supports_save_states(&self) -> bool {
        false
    }

    fn mount_points(&self) -> Vec<MountPointInfo>;

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error>;

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    fn is_mounted(&self, mount_point_id: &str) -> bool;
}
