//! Linux sysfs GPIO lines (`/sys/class/gpio`)
//!
//! Used for the relay output and the optional limit-switch inputs.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// An exported GPIO line
#[derive(Debug, Clone)]
pub struct GpioLine {
    pin: u32,
    value_path: PathBuf,
}

impl GpioLine {
    /// Export `pin` (if needed) and set its direction
    pub fn open(pin: u32, direction: Direction) -> anyhow::Result<Self> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, direction)
    }

    pub fn open_at(root: &Path, pin: u32, direction: Direction) -> anyhow::Result<Self> {
        let line_dir = root.join(format!("gpio{pin}"));
        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("Failed to export gpio{pin}"))?;
            // udev needs a moment to fix permissions on the new line
            std::thread::sleep(Duration::from_millis(100));
        }

        fs::write(line_dir.join("direction"), direction.as_str())
            .with_context(|| format!("Failed to set gpio{pin} direction"))?;

        Ok(Self { pin, value_path: line_dir.join("value") })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn read(&self) -> anyhow::Result<bool> {
        let raw = fs::read_to_string(&self.value_path)
            .with_context(|| format!("Failed to read gpio{}", self.pin))?;
        Ok(raw.trim() == "1")
    }

    pub fn write(&self, high: bool) -> anyhow::Result<()> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
            .with_context(|| format!("Failed to write gpio{}", self.pin))
    }
}
