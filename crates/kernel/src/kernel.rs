//! The kernel proper: the thread arena, the ready list, the single
//! simulated-CPU discipline, and interrupt dispatch.
//!
//! Cooperative multitasking rides on host threads serialized by one core
//! mutex: holding the lock *is* "interrupts disabled", and exactly one
//! host thread at a time observes `current == self` and runs. A context
//! switch picks the next thread, signals the shared condvar, and waits
//! until the scheduler hands control back. Blocking primitives perform
//! the wait through the condvar so the lock is released atomically, which
//! is what makes each primitive look atomic to every other thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use machine::console::Console;
use machine::disk::DiskDevice;
use machine::interrupt::{IntHandler, IntLevel, Interrupt, TickKind};
use machine::Machine;
use once_cell::sync::OnceCell;
use types::{
    debugf, Config, DiskId, LockId, SemId, SimTime, Statistics, SysError, SysResult, ThreadId,
    FS_DISK, SWAP_DISK, SYSTEM_TICK,
};

use crate::fs::openfile::OpenFile;
use crate::fs::FileSystem;
use crate::sync::{self, Condition, Lock, Semaphore};
use crate::thread::{Thread, ThreadState};

/// Everything the "interrupts off" discipline protects.
pub(crate) struct Core {
    pub machine: Machine,
    pub interrupt: Interrupt,
    pub disks: Vec<DiskDevice>,
    pub console: Console,
    pub stats: Statistics,
    pub threads: Vec<Thread>,
    pub ready: VecDeque<ThreadId>,
    pub current: ThreadId,
    pub sems: Vec<Option<Semaphore>>,
    pub locks: Vec<Option<Lock>>,
    pub conds: Vec<Option<Condition>>,
}

/// A driver's rendezvous with its device: a lock serializing callers and
/// a semaphore the completion handler signals.
pub(crate) struct DriverChannel {
    pub lock: LockId,
    pub sem: SemId,
}

pub(crate) struct KernelInner {
    pub core: Mutex<Core>,
    pub resched: Condvar,
    pub disk_drivers: [DriverChannel; 2],
    pub console_write: DriverChannel,
    pub console_read: DriverChannel,
    /// Open-file table for the syscall layer; fd = index + 2.
    pub files: Mutex<Vec<Option<OpenFile>>>,
    pub fs: OnceCell<FileSystem>,
}

/// Handle to one running simulation. Cheap to clone; every simulated
/// thread owns one.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
}

pub(crate) type CoreGuard<'a> = MutexGuard<'a, Core>;

impl Kernel {
    /// Boot a machine and kernel from `config`, console on stdout. The
    /// calling host thread becomes the initial simulated thread.
    pub fn new(config: &Config) -> SysResult<Kernel> {
        Kernel::with_console(config, Console::stdout())
    }

    /// Like [`Kernel::new`] but with a caller-supplied console device
    /// (tests capture output through this).
    pub fn with_console(config: &Config, mut console: Console) -> SysResult<Kernel> {
        types::debug::init(&config.debug_flags);
        console.set_echo(config.console_echo);
        let machine = Machine::new(config);
        let mut interrupt = Interrupt::new();
        interrupt.set_level(IntLevel::On);

        let disks = vec![
            DiskDevice::new(&config.disk_file, FS_DISK).map_err(|_| SysError::IoError)?,
            DiskDevice::new(&config.swap_file, SWAP_DISK).map_err(|_| SysError::IoError)?,
        ];

        let mut core = Core {
            machine,
            interrupt,
            disks,
            console,
            stats: Statistics::new(),
            threads: vec![{
                let mut t = Thread::new("main");
                t.state = ThreadState::Running;
                t
            }],
            ready: VecDeque::new(),
            current: ThreadId(0),
            sems: Vec::new(),
            locks: Vec::new(),
            conds: Vec::new(),
        };

        let channel = |core: &mut Core, name: &str| DriverChannel {
            lock: sync::alloc_lock(core, &format!("{name} lock")),
            sem: sync::alloc_sem(core, &format!("{name} sem"), 0),
        };
        let disk_drivers = [
            channel(&mut core, "disk driver"),
            channel(&mut core, "swap disk driver"),
        ];
        let console_write = channel(&mut core, "console write");
        let console_read = channel(&mut core, "console read");

        Ok(Kernel {
            inner: Arc::new(KernelInner {
                core: Mutex::new(core),
                resched: Condvar::new(),
                disk_drivers,
                console_write,
                console_read,
                files: Mutex::new(Vec::new()),
                fs: OnceCell::new(),
            }),
        })
    }

    /// Acquire the core lock. A sibling host thread that panicked while
    /// holding it must not mask the original failure, so poison is
    /// stripped.
    pub(crate) fn lock(&self) -> CoreGuard<'_> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin a critical section: lock the core and turn interrupts off.
    pub(crate) fn enter(&self) -> CoreGuard<'_> {
        let mut g = self.lock();
        g.interrupt.set_level(IntLevel::Off);
        g
    }

    /// End a critical section: charge the system tick, fire anything
    /// that came due while interrupts were off, honor a requested yield,
    /// and re-enable.
    pub(crate) fn leave(&self, g: CoreGuard<'_>) {
        let mut g = self.tick(g, SYSTEM_TICK, TickKind::SystemInstr);
        g.interrupt.set_level(IntLevel::On);
        drop(g);
    }

    /// Advance the clock and dispatch everything that became due. May
    /// context-switch on the way out if a handler woke somebody.
    pub(crate) fn tick<'a>(
        &'a self,
        mut g: CoreGuard<'a>,
        cycles: SimTime,
        kind: TickKind,
    ) -> CoreGuard<'a> {
        g.interrupt.advance(cycles);
        match kind {
            TickKind::UserInstr => g.stats.user_ticks += cycles,
            TickKind::SystemInstr => g.stats.system_ticks += cycles,
            TickKind::Idle => g.stats.idle_ticks += cycles,
        }
        self.drain_due(&mut g);
        self.maybe_yield(g)
    }

    /// Fire every pending interrupt whose due time has arrived, one at a
    /// time. A handler that schedules with delay 0 lands behind the
    /// current handler, never inside it.
    fn drain_due(&self, g: &mut Core) {
        let old = g.interrupt.set_level(IntLevel::Off);
        while let Some(handler) = g.interrupt.pop_due() {
            debugf!('i', "dispatch {:?} at {}", handler, g.interrupt.total_ticks());
            g.interrupt.in_handler = true;
            self.dispatch(g, handler);
            g.interrupt.in_handler = false;
        }
        g.interrupt.set_level(old);
    }

    fn dispatch(&self, g: &mut Core, handler: IntHandler) {
        match handler {
            IntHandler::ThreadWake(tid) => wake(g, tid),
            IntHandler::DiskDone(disk) => {
                g.disks[disk.0].handle_interrupt();
                let sem = self.inner.disk_drivers[disk.0].sem;
                sync::sem_v_in(g, sem).expect("disk driver semaphore destroyed");
            }
            IntHandler::ConsoleWriteDone => {
                g.console.write_done();
                g.stats.num_console_chars_out += 1;
                sync::sem_v_in(g, self.inner.console_write.sem)
                    .expect("console write semaphore destroyed");
            }
            IntHandler::ConsoleReadAvail => {
                g.console.read_avail();
                sync::sem_v_in(g, self.inner.console_read.sem)
                    .expect("console read semaphore destroyed");
            }
        }
    }

    /// If a handler woke somebody while the current thread kept running,
    /// give the ready list a turn.
    fn maybe_yield<'a>(&'a self, mut g: CoreGuard<'a>) -> CoreGuard<'a> {
        if g.interrupt.yield_pending {
            g.interrupt.yield_pending = false;
            let me = g.current;
            if g.threads[me.0].state == ThreadState::Running {
                if let Some(next) = g.ready.pop_front() {
                    g.threads[me.0].state = ThreadState::Ready;
                    g.ready.push_back(me);
                    self.switch_to(&mut g, next);
                    g = self.wait_for_turn(g, me);
                }
            }
        }
        g
    }

    /// Hand the CPU to `next`. The caller then waits for its own turn if
    /// it intends to keep running.
    pub(crate) fn switch_to(&self, g: &mut Core, next: ThreadId) {
        let prev = g.current;
        if prev != next {
            let Core {
                threads, machine, ..
            } = g;
            // the user register file travels with its thread
            if let Some(ctx) = threads[prev.0].user_ctx.as_mut() {
                machine.save_user_context(ctx);
            }
            if let Some(ctx) = threads[next.0].user_ctx.as_deref() {
                machine.restore_user_context(ctx);
            }
        }
        debugf!('t', "switch {:?} -> {:?}", prev, next);
        g.threads[next.0].state = ThreadState::Running;
        g.current = next;
        self.inner.resched.notify_all();
    }

    /// Park until the scheduler makes `me` current again.
    pub(crate) fn wait_for_turn<'a>(
        &'a self,
        mut g: CoreGuard<'a>,
        me: ThreadId,
    ) -> CoreGuard<'a> {
        while g.current != me {
            g = self
                .inner
                .resched
                .wait(g)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        g
    }

    /// Block the current thread and run somebody else. The caller must
    /// already have queued `me` wherever its wake-up will come from.
    pub(crate) fn sleep_in<'a>(&'a self, mut g: CoreGuard<'a>, me: ThreadId) -> CoreGuard<'a> {
        debug_assert_eq!(g.current, me);
        debugf!('t', "sleep {:?}", me);
        g.threads[me.0].state = ThreadState::Blocked;
        loop {
            if let Some(next) = g.ready.pop_front() {
                self.switch_to(&mut g, next);
                break;
            }
            self.idle_in(&mut g);
        }
        self.wait_for_turn(g, me)
    }

    /// Nothing is runnable: jump the clock to the next event and service
    /// it. If nothing is pending either, no wake-up can ever arrive.
    fn idle_in(&self, g: &mut Core) {
        match g.interrupt.next_due() {
            Some(due) => {
                debugf!('i', "idle until {}", due);
                let skipped = g.interrupt.advance_to(due);
                g.stats.idle_ticks += skipped;
                self.drain_due(g);
            }
            None => {
                let total = g.interrupt.total_ticks();
                g.stats.print(total);
                panic!("no threads ready or runnable, and no pending interrupts - machine wedged");
            }
        }
    }

    // ---- thread operations ------------------------------------------

    /// Create a READY thread running `entry` on its own host thread.
    /// Returns its stable id.
    pub fn fork(&self, name: &str, entry: impl FnOnce(Kernel) + Send + 'static) -> ThreadId {
        let mut g = self.enter();
        let tid = ThreadId(g.threads.len());
        g.threads.push(Thread::new(name));
        debugf!('t', "fork {:?} \"{}\"", tid, name);

        let k = self.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // wait to be scheduled for the first time
                let g = k.lock();
                let g = k.wait_for_turn(g, tid);
                drop(g);
                entry(k.clone());
                k.finish();
            })
            .expect("host thread spawn failed");

        g.threads[tid.0].state = ThreadState::Ready;
        g.ready.push_back(tid);
        self.leave(g);
        tid
    }

    /// Give the CPU away if anybody else is ready.
    pub fn yield_now(&self) {
        let mut g = self.enter();
        let me = g.current;
        if let Some(next) = g.ready.pop_front() {
            g.threads[me.0].state = ThreadState::Ready;
            g.ready.push_back(me);
            self.switch_to(&mut g, next);
            g = self.wait_for_turn(g, me);
        }
        self.leave(g);
    }

    /// Sleep for `delay` simulated cycles.
    pub fn sleep_for(&self, delay: SimTime) {
        let mut g = self.enter();
        let me = g.current;
        g.interrupt.schedule(IntHandler::ThreadWake(me), delay);
        g = self.sleep_in(g, me);
        self.leave(g);
    }

    /// Wait until `target` terminates. Immediate if it already has.
    pub fn join(&self, target: ThreadId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let state = g.threads.get(target.0).map(|t| t.state);
        let result = match state {
            None => Err(SysError::NotFound),
            Some(ThreadState::Zombie) => Ok(()),
            _ if target == me => Err(SysError::InvalidArgument),
            Some(_) => {
                g.threads[target.0].join_waiters.push(me);
                g = self.sleep_in(g, me);
                Ok(())
            }
        };
        self.leave(g);
        result
    }

    /// Terminate the current thread. Join-waiters wake; the record stays
    /// in the arena as a ZOMBIE with its heavyweight state dropped.
    pub fn finish(&self) {
        let mut g = self.enter();
        let me = g.current;
        debugf!('t', "finish {:?} \"{}\"", me, g.threads[me.0].name);
        let waiters = std::mem::take(&mut g.threads[me.0].join_waiters);
        for w in waiters {
            wake(&mut g, w);
        }
        g.threads[me.0].state = ThreadState::Zombie;
        g.threads[me.0].user_ctx = None;
        loop {
            if let Some(next) = g.ready.pop_front() {
                self.switch_to(&mut g, next);
                break;
            }
            self.idle_in(&mut g);
        }
        // this host thread never takes a turn again
        g.interrupt.set_level(IntLevel::On);
    }

    /// Shut the simulation down: cancel whatever is still scheduled and
    /// report the statistics.
    pub fn halt(&self, status: i32) {
        let mut g = self.enter();
        debugf!('t', "halt({})", status);
        g.interrupt.request_halt(status);
        g.interrupt.drain_all();
        let total = g.interrupt.total_ticks();
        let stats = g.stats.clone();
        g.interrupt.set_level(IntLevel::On);
        drop(g);
        stats.print(total);
    }

    // ---- introspection ----------------------------------------------

    pub fn current(&self) -> ThreadId {
        self.lock().current
    }

    pub fn thread_name(&self, tid: ThreadId) -> Option<String> {
        self.lock().threads.get(tid.0).map(|t| t.name.clone())
    }

    pub fn thread_state(&self, tid: ThreadId) -> Option<ThreadState> {
        self.lock().threads.get(tid.0).map(|t| t.state)
    }

    pub fn last_error(&self) -> Option<SysError> {
        let g = self.lock();
        g.threads[g.current.0].last_error
    }

    pub fn set_last_error(&self, e: SysError) {
        let mut g = self.lock();
        let me = g.current;
        g.threads[me.0].last_error = Some(e);
    }

    /// Report the current thread's last error on stderr, `perror` style.
    pub fn perror(&self, msg: &str) {
        match self.last_error() {
            Some(e) => eprintln!("{}: {}", msg, e),
            None => eprintln!("{}: no error", msg),
        }
    }

    pub fn total_ticks(&self) -> SimTime {
        self.lock().interrupt.total_ticks()
    }

    pub fn statistics(&self) -> Statistics {
        self.lock().stats.clone()
    }

    pub fn halted(&self) -> Option<i32> {
        self.lock().interrupt.halt_status()
    }

    /// Direct machine access for loaders and tests. Runs under the core
    /// lock; do not block inside `f`.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        let mut g = self.lock();
        f(&mut g.machine)
    }

    /// Type characters at the simulated console.
    pub fn feed_console_input(&self, bytes: &[u8]) {
        let mut g = self.enter();
        let Core {
            console, interrupt, ..
        } = &mut *g;
        console.feed_input(bytes, interrupt);
        self.leave(g);
    }

    /// Mount the file system on the main disk, formatting it first when
    /// asked.
    pub fn mount_fs(&self, format: bool) -> SysResult<()> {
        let fs = FileSystem::new(self, FS_DISK, format)?;
        self.inner
            .fs
            .set(fs)
            .map_err(|_| SysError::AlreadyExists)
    }

    pub fn fs(&self) -> SysResult<&FileSystem> {
        self.inner.fs.get().ok_or(SysError::InvalidArgument)
    }

    /// Cross-checks of the structural invariants, for tests: a lock is
    /// never owned by a zombie, and a semaphore with permits has no
    /// waiters.
    pub fn assert_consistent(&self) {
        let g = self.lock();
        let mut running = 0;
        for t in &g.threads {
            if t.state == ThreadState::Running {
                running += 1;
            }
        }
        assert_eq!(running, 1, "exactly one thread must be RUNNING");
        for l in g.locks.iter().flatten() {
            if let Some(owner) = l.owner {
                assert!(
                    g.threads[owner.0].state != ThreadState::Zombie,
                    "lock {:?} owned by a zombie",
                    l.name
                );
            }
        }
        for s in g.sems.iter().flatten() {
            assert!(
                s.counter <= 0 || s.queue.is_empty(),
                "semaphore {:?} has permits and waiters",
                s.name
            );
        }
    }
}

/// Move a blocked thread to the ready list. Runs with interrupts off
/// (the core lock held); from inside a handler it also requests a yield
/// so the wake-up is acted on promptly.
pub(crate) fn wake(g: &mut Core, tid: ThreadId) {
    debug_assert_eq!(g.threads[tid.0].state, ThreadState::Blocked);
    debugf!('t', "wake {:?}", tid);
    g.threads[tid.0].state = ThreadState::Ready;
    g.ready.push_back(tid);
    if g.interrupt.in_handler {
        g.interrupt.yield_pending = true;
    }
}
