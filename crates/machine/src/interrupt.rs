//! The simulated clock and its pending-interrupt queue.
//!
//! Devices do not call anything back directly: a completion is a tagged
//! [`IntHandler`] value sitting in the queue until its due time. The
//! kernel pops due entries and dispatches on the tag, so the machine
//! crate stays free of upward dependencies.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use types::{debugf, DiskId, SimTime, ThreadId};

/// What a pending interrupt does when it fires. Each variant names the
/// device or thread the kernel must service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntHandler {
    /// A disk finished its one outstanding request.
    DiskDone(DiskId),
    /// The console output register drained one character.
    ConsoleWriteDone,
    /// One input character became readable.
    ConsoleReadAvail,
    /// A timed wake-up for a sleeping thread.
    ThreadWake(ThreadId),
}

/// Whether interrupt dispatch is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    Off,
    On,
}

/// What kind of tick is advancing the clock, for the statistics split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    UserInstr,
    SystemInstr,
    Idle,
}

/// One scheduled interrupt. `seq` breaks due-time ties in insertion
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInterrupt {
    pub due: SimTime,
    pub seq: u64,
    pub handler: IntHandler,
}

impl Ord for PendingInterrupt {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the earliest entry first.
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for PendingInterrupt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The simulated clock plus everything scheduled against it.
#[derive(Debug)]
pub struct Interrupt {
    total_ticks: SimTime,
    level: IntLevel,
    pending: BinaryHeap<PendingInterrupt>,
    next_seq: u64,
    /// True while the kernel is inside a handler; wake-ups that happen
    /// then request a yield once the handler returns.
    pub in_handler: bool,
    pub yield_pending: bool,
    halt_status: Option<i32>,
}

impl Interrupt {
    pub fn new() -> Interrupt {
        Interrupt {
            total_ticks: 0,
            level: IntLevel::Off,
            pending: BinaryHeap::new(),
            next_seq: 0,
            in_handler: false,
            yield_pending: false,
            halt_status: None,
        }
    }

    pub fn total_ticks(&self) -> SimTime {
        self.total_ticks
    }

    pub fn level(&self) -> IntLevel {
        self.level
    }

    pub fn set_level(&mut self, level: IntLevel) -> IntLevel {
        std::mem::replace(&mut self.level, level)
    }

    /// Schedule `handler` to fire `delay` cycles from now. Entries
    /// scheduled for the same due time fire in the order they were
    /// scheduled.
    pub fn schedule(&mut self, handler: IntHandler, delay: SimTime) {
        let due = self.total_ticks + delay;
        debugf!('i', "schedule {:?} at {} (now {})", handler, due, self.total_ticks);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(PendingInterrupt { due, seq, handler });
    }

    /// Advance the clock by `cycles`. The caller drains due entries
    /// afterwards with [`Interrupt::pop_due`].
    pub fn advance(&mut self, cycles: SimTime) {
        self.total_ticks += cycles;
    }

    /// Jump the clock forward to `when` (used when the machine idles
    /// until the next event). Returns the cycles skipped.
    pub fn advance_to(&mut self, when: SimTime) -> SimTime {
        let skipped = when.saturating_sub(self.total_ticks);
        self.total_ticks = self.total_ticks.max(when);
        skipped
    }

    /// Due time of the earliest pending entry, if any.
    pub fn next_due(&self) -> Option<SimTime> {
        self.pending.peek().map(|p| p.due)
    }

    /// Remove and return the earliest entry whose due time has arrived.
    pub fn pop_due(&mut self) -> Option<IntHandler> {
        match self.pending.peek() {
            Some(p) if p.due <= self.total_ticks => Some(self.pending.pop().unwrap().handler),
            _ => None,
        }
    }

    pub fn request_halt(&mut self, status: i32) {
        if self.halt_status.is_none() {
            self.halt_status = Some(status);
        }
    }

    pub fn halt_status(&self) -> Option<i32> {
        self.halt_status
    }

    /// Drop everything still queued; used at shutdown so no completion
    /// outlives the machine.
    pub fn drain_all(&mut self) {
        self.pending.clear();
    }

    /// Print the pending queue, earliest first (single-step debugger).
    pub fn dump_state(&self) {
        println!(
            "Pending interrupts at cycle {} (level {:?}):",
            self.total_ticks, self.level
        );
        let mut entries: Vec<&PendingInterrupt> = self.pending.iter().collect();
        entries.sort_by_key(|p| (p.due, p.seq));
        for p in entries {
            println!("\tat {}: {:?}", p.due, p.handler);
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_due_time_order() {
        let mut int = Interrupt::new();
        int.schedule(IntHandler::ConsoleWriteDone, 300);
        int.schedule(IntHandler::DiskDone(DiskId(0)), 100);
        int.schedule(IntHandler::ThreadWake(ThreadId(1)), 200);

        int.advance(1000);
        assert_eq!(int.pop_due(), Some(IntHandler::DiskDone(DiskId(0))));
        assert_eq!(int.pop_due(), Some(IntHandler::ThreadWake(ThreadId(1))));
        assert_eq!(int.pop_due(), Some(IntHandler::ConsoleWriteDone));
        assert_eq!(int.pop_due(), None);
    }

    #[test]
    fn equal_due_times_fire_in_insertion_order() {
        let mut int = Interrupt::new();
        for i in 0..5 {
            int.schedule(IntHandler::ThreadWake(ThreadId(i)), 50);
        }
        int.advance(50);
        for i in 0..5 {
            assert_eq!(int.pop_due(), Some(IntHandler::ThreadWake(ThreadId(i))));
        }
    }

    #[test]
    fn nothing_fires_early() {
        let mut int = Interrupt::new();
        int.schedule(IntHandler::ConsoleReadAvail, 100);
        int.advance(99);
        assert_eq!(int.pop_due(), None);
        int.advance(1);
        assert_eq!(int.pop_due(), Some(IntHandler::ConsoleReadAvail));
    }

    #[test]
    fn advance_to_reports_skipped_cycles() {
        let mut int = Interrupt::new();
        int.advance(10);
        assert_eq!(int.advance_to(150), 140);
        assert_eq!(int.total_ticks(), 150);
        assert_eq!(int.advance_to(100), 0); // never moves backwards
        assert_eq!(int.total_ticks(), 150);
    }
}
