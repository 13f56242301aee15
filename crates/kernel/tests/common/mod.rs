//! Shared scaffolding for the kernel integration tests: a booted kernel
//! with scratch disks and a captured console.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use kernel::Kernel;
use machine::console::Console;
use types::Config;

/// A console sink that buffers everything for assertions.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Sim {
    pub kernel: Kernel,
    pub console: Capture,
    _dir: tempfile::TempDir,
}

pub fn boot() -> Sim {
    boot_with(Config::default())
}

pub fn boot_with(mut config: Config) -> Sim {
    let dir = tempfile::tempdir().expect("scratch dir");
    config.disk_file = dir.path().join("DISK");
    config.swap_file = dir.path().join("DISK_swap");
    let console = Capture::default();
    let kernel = Kernel::with_console(&config, Console::with_sink(Box::new(console.clone())))
        .expect("kernel boot");
    Sim {
        kernel,
        console,
        _dir: dir,
    }
}
