use crate::SimTime;

/// Aggregate performance counters for one simulation, printed at halt.
///
/// The interrupt scheduler owns the authoritative total tick count; this
/// struct only tracks how those ticks and the device traffic break down.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    /// Ticks spent executing user instructions.
    pub user_ticks: SimTime,
    /// Ticks spent in kernel critical sections.
    pub system_ticks: SimTime,
    /// Ticks skipped while the machine sat idle waiting for a device.
    pub idle_ticks: SimTime,
    /// User instructions executed.
    pub num_instructions: u64,
    /// Sectors read from and written to the disks.
    pub num_disk_reads: u64,
    pub num_disk_writes: u64,
    /// Characters moved through the console.
    pub num_console_chars_out: u64,
    pub num_console_chars_in: u64,
}

impl Statistics {
    pub fn new() -> Statistics {
        Statistics::default()
    }

    /// Print the counters in a fixed, grep-friendly layout.
    pub fn print(&self, total_ticks: SimTime) {
        println!(
            "Ticks: total {}, user {}, system {}, idle {}",
            total_ticks, self.user_ticks, self.system_ticks, self.idle_ticks
        );
        println!("Instructions: {}", self.num_instructions);
        println!(
            "Disk I/O: reads {}, writes {}",
            self.num_disk_reads, self.num_disk_writes
        );
        println!(
            "Console I/O: chars out {}, chars in {}",
            self.num_console_chars_out, self.num_console_chars_in
        );
    }
}
