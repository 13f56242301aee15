use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SysError, SysResult};

/// Runtime configuration, read once at startup.
///
/// Every field has a usable default so tests and small programs can start
/// from `Config::default()` and override the couple of fields they care
/// about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of physical memory pages given to the simulated machine.
    pub num_phys_pages: usize,
    /// Size of a memory page in bytes. Kept equal to the disk sector size
    /// so a page travels to and from the swap disk in one request.
    pub page_size: usize,
    /// Backing host file for the file-system disk.
    pub disk_file: PathBuf,
    /// Backing host file for the swap disk.
    pub swap_file: PathBuf,
    /// Debug flags, one character per subsystem; '+' enables all.
    pub debug_flags: String,
    /// Drop into the single-step debugger while running user code.
    pub single_step: bool,
    /// Echo console input back to the output sink as it is consumed.
    pub console_echo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_phys_pages: 400,
            page_size: 128,
            disk_file: PathBuf::from("DISK"),
            swap_file: PathBuf::from("DISK_swap"),
            debug_flags: String::new(),
            single_step: false,
            console_echo: false,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn load(path: &Path) -> SysResult<Config> {
        let file = File::open(path).map_err(|_| SysError::IoError)?;
        serde_json::from_reader(file).map_err(|_| SysError::InvalidArgument)
    }

    /// Total bytes of simulated physical memory.
    pub fn memory_size(&self) -> usize {
        self.num_phys_pages * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_memory_size() {
        let cfg = Config::default();
        assert_eq!(cfg.memory_size(), 400 * 128);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"num_phys_pages": 64}"#).unwrap();
        assert_eq!(cfg.num_phys_pages, 64);
        assert_eq!(cfg.page_size, 128);
    }
}
