//! Plate whitelist loaded once at startup

use anyhow::Context;
use rustc_hash::FxHashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Normalize plate text the way recognizers report it: upper case, no whitespace
pub fn normalize_plate(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_uppercase).collect()
}

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    plates: FxHashSet<String>,
}

impl Whitelist {
    pub fn from_lines(content: &str) -> Self {
        let plates = content
            .lines()
            .map(normalize_plate)
            .filter(|line| !line.is_empty())
            .collect();
        Self { plates }
    }

    /// Load from a file with one plate per line.
    ///
    /// A missing file is an empty whitelist; its parent directory is created
    /// so the operator can drop the file in place.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let whitelist = Self::from_lines(&content);
                info!(path = %path.display(), plates = %whitelist.len(), "whitelist_loaded");
                Ok(whitelist)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).with_context(|| {
                            format!("Failed to create whitelist directory {}", parent.display())
                        })?;
                    }
                }
                warn!(path = %path.display(), "whitelist_missing");
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read whitelist file {}", path.display())),
        }
    }

    pub fn contains(&self, plate: &str) -> bool {
        self.plates.contains(plate)
    }

    pub fn len(&self) -> usize {
        self.plates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plates.is_empty()
    }
}
