//! The boundary between user programs and the kernel: the run loop that
//! drives the interpreter, the exception handler, and syscall dispatch.
//!
//! Call numbers travel in x17 (a7), arguments in x10..x13 (a0..a3), the
//! result in x10. A failing call returns -1 and records the error as the
//! calling thread's last error, which `PError` reports. The interpreter
//! has already advanced the pc past the `ecall` by the time the handler
//! runs, so user execution resumes at the next instruction.

use machine::interrupt::TickKind;
use machine::machine::reg;
use machine::{interp, ExceptionKind, MachineStatus, UserContext};
use types::{
    debugf, CondId, LockId, OpenFileId, SemId, SysError, SysResult, ThreadId,
};

use crate::fs::openfile::OpenFile;
use crate::kernel::Kernel;

/// Syscall numbers. The user-side library mirrors this table.
pub mod sc {
    pub const HALT: u64 = 0;
    pub const EXIT: u64 = 1;
    pub const YIELD: u64 = 2;
    pub const JOIN: u64 = 3;
    pub const CREATE: u64 = 4;
    pub const OPEN: u64 = 5;
    pub const READ: u64 = 6;
    pub const WRITE: u64 = 7;
    pub const CLOSE: u64 = 8;
    pub const REMOVE: u64 = 9;
    pub const MKDIR: u64 = 10;
    pub const RMDIR: u64 = 11;
    pub const PERROR: u64 = 12;

    pub const SEM_CREATE: u64 = 20;
    pub const SEM_P: u64 = 21;
    pub const SEM_V: u64 = 22;
    pub const SEM_DESTROY: u64 = 23;
    pub const LOCK_CREATE: u64 = 24;
    pub const LOCK_ACQUIRE: u64 = 25;
    pub const LOCK_RELEASE: u64 = 26;
    pub const LOCK_DESTROY: u64 = 27;
    pub const COND_CREATE: u64 = 28;
    pub const COND_WAIT: u64 = 29;
    pub const COND_SIGNAL: u64 = 30;
    pub const COND_BROADCAST: u64 = 31;
    pub const COND_DESTROY: u64 = 32;

    pub const PUT_CHAR: u64 = 40;
    pub const PUT_STRING: u64 = 41;
    pub const GET_CHAR: u64 = 42;
}

/// File descriptors 0 and 1 are the console; files start at 2.
const FD_CONSOLE_INPUT: i64 = 0;
const FD_CONSOLE_OUTPUT: i64 = 1;
const FD_FILE_BASE: usize = 2;

const MAX_STRING_ARG: usize = 256;

impl Kernel {
    /// Point the machine at a user program's entry and mark the current
    /// thread as carrying user context. The loader (external to this
    /// crate) has already placed the code in memory.
    pub fn setup_user(&self, entry: u64) {
        let mut g = self.lock();
        let me = g.current;
        let sp = (g.machine.memory.len() as u64) & !0xf;
        g.machine.pc = entry;
        g.machine.write_int_reg(reg::SP, sp as i64);
        g.threads[me.0].user_ctx = Some(Box::new(UserContext::new()));
    }

    /// Execute user instructions until something halts the machine.
    /// Returns the halt status.
    pub fn run(&self) -> i32 {
        loop {
            let mut g = self.lock();
            if let Some(status) = g.interrupt.halt_status() {
                return status;
            }
            g.machine.status = MachineStatus::User;
            let cycles = interp::one_instruction(&mut g.machine);
            let trap = g.machine.take_exception();
            if cycles > 0 {
                g.stats.num_instructions += 1;
                g = self.tick(g, cycles, TickKind::UserInstr);
            }
            if g.machine.single_step && g.machine.run_until <= g.interrupt.total_ticks() {
                self.debugger(&mut g);
            }
            drop(g);
            if let Some((kind, bad_vaddr)) = trap {
                self.exception_handler(kind, bad_vaddr);
            }
        }
    }

    /// Transfer from user mode into the kernel and back. Runs in SYSTEM
    /// mode; user mode is restored on the way out.
    pub fn exception_handler(&self, kind: ExceptionKind, bad_vaddr: u64) {
        self.lock().machine.status = MachineStatus::System;
        debugf!('m', "exception: {} (bad vaddr {:#x})", kind.name(), bad_vaddr);
        match kind {
            ExceptionKind::Syscall => self.do_syscall(),
            ExceptionKind::NoException => {}
            _ => {
                // no fault recovery is wired in; treat as a crashed program
                eprintln!(
                    "unexpected user exception: {} (bad vaddr {:#x})",
                    kind.name(),
                    bad_vaddr
                );
                self.halt(1);
            }
        }
        self.lock().machine.status = MachineStatus::User;
    }

    fn do_syscall(&self) {
        let (num, args) = {
            let g = self.lock();
            let m = &g.machine;
            (
                m.read_int_reg(reg::A7) as u64,
                [
                    m.read_int_reg(reg::A0),
                    m.read_int_reg(reg::A1),
                    m.read_int_reg(reg::A2),
                    m.read_int_reg(reg::A3),
                ],
            )
        };
        debugf!('m', "📜 syscall {} ({:?})", num, args);

        let result = self.dispatch_syscall(num, args);
        let ret = match result {
            Ok(v) => v,
            Err(e) => {
                self.set_last_error(e);
                -1
            }
        };
        self.lock().machine.write_int_reg(reg::A0, ret);
    }

    fn dispatch_syscall(&self, num: u64, args: [i64; 4]) -> SysResult<i64> {
        match num {
            sc::HALT => {
                self.halt(0);
                Ok(0)
            }
            sc::EXIT => {
                self.halt(args[0] as i32);
                Ok(0)
            }
            sc::YIELD => {
                self.yield_now();
                Ok(0)
            }
            sc::JOIN => self.join(ThreadId(args[0] as usize)).map(|_| 0),
            sc::PERROR => {
                let msg = self.read_user_string(args[0])?;
                self.perror(&msg);
                Ok(0)
            }

            sc::SEM_CREATE => {
                let name = self.read_user_string(args[0])?;
                Ok(self.sem_create(&name, args[1]).0 as i64)
            }
            sc::SEM_P => self.sem_p(SemId(args[0] as usize)).map(|_| 0),
            sc::SEM_V => self.sem_v(SemId(args[0] as usize)).map(|_| 0),
            sc::SEM_DESTROY => self.sem_destroy(SemId(args[0] as usize)).map(|_| 0),
            sc::LOCK_CREATE => {
                let name = self.read_user_string(args[0])?;
                Ok(self.lock_create(&name).0 as i64)
            }
            sc::LOCK_ACQUIRE => self.lock_acquire(LockId(args[0] as usize)).map(|_| 0),
            sc::LOCK_RELEASE => self.lock_release(LockId(args[0] as usize)).map(|_| 0),
            sc::LOCK_DESTROY => self.lock_destroy(LockId(args[0] as usize)).map(|_| 0),
            sc::COND_CREATE => {
                let name = self.read_user_string(args[0])?;
                Ok(self.cond_create(&name).0 as i64)
            }
            sc::COND_WAIT => self
                .cond_wait(CondId(args[0] as usize), LockId(args[1] as usize))
                .map(|_| 0),
            sc::COND_SIGNAL => self
                .cond_signal(CondId(args[0] as usize), LockId(args[1] as usize))
                .map(|_| 0),
            sc::COND_BROADCAST => self
                .cond_broadcast(CondId(args[0] as usize), LockId(args[1] as usize))
                .map(|_| 0),
            sc::COND_DESTROY => self.cond_destroy(CondId(args[0] as usize)).map(|_| 0),

            sc::CREATE => {
                let name = self.read_user_string(args[0])?;
                self.fs()?.create(self, &name, args[1] as u32).map(|_| 0)
            }
            sc::OPEN => {
                let name = self.read_user_string(args[0])?;
                let file = self.fs()?.open(self, &name)?;
                Ok(self.alloc_fd(file).0 as i64 + FD_FILE_BASE as i64)
            }
            sc::CLOSE => self.close_fd(args[0]).map(|_| 0),
            sc::READ => self.sys_read(args[0] as u64, args[1] as usize, args[2]),
            sc::WRITE => self.sys_write(args[0] as u64, args[1] as usize, args[2]),
            sc::REMOVE => {
                let name = self.read_user_string(args[0])?;
                self.fs()?.remove(self, &name).map(|_| 0)
            }
            sc::MKDIR => {
                let name = self.read_user_string(args[0])?;
                self.fs()?.mkdir(self, &name).map(|_| 0)
            }
            sc::RMDIR => {
                let name = self.read_user_string(args[0])?;
                self.fs()?.rmdir(self, &name).map(|_| 0)
            }

            sc::PUT_CHAR => {
                self.console_put_char(args[0] as u8);
                Ok(0)
            }
            sc::PUT_STRING => {
                let s = self.read_user_string(args[0])?;
                self.console_put_string(&s);
                Ok(0)
            }
            sc::GET_CHAR => Ok(self.console_get_char() as i64),

            _ => Err(SysError::InvalidArgument),
        }
    }

    /// Fetch a NUL-terminated string argument from user memory. A bad
    /// pointer is an argument error, not a user-visible fault.
    fn read_user_string(&self, addr: i64) -> SysResult<String> {
        let mut g = self.lock();
        match g.machine.read_mem_string(addr as u64, MAX_STRING_ARG) {
            Some(s) => Ok(s),
            None => {
                g.machine.take_exception();
                Err(SysError::InvalidArgument)
            }
        }
    }

    // ---- open-file table --------------------------------------------

    fn alloc_fd(&self, file: OpenFile) -> OpenFileId {
        let mut files = self.inner.files.lock().unwrap_or_else(|p| p.into_inner());
        let id = OpenFileId(files.len());
        files.push(Some(file));
        id
    }

    fn close_fd(&self, fd: i64) -> SysResult<()> {
        let index = (fd as usize).checked_sub(FD_FILE_BASE).ok_or(SysError::InvalidArgument)?;
        let mut files = self.inner.files.lock().unwrap_or_else(|p| p.into_inner());
        match files.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(SysError::NotFound),
        }
    }

    /// Borrow an open file out of the table for the duration of an I/O;
    /// the file must go back with `put_fd` so the descriptor stays live.
    fn take_fd(&self, fd: i64) -> SysResult<(usize, OpenFile)> {
        let index = (fd as usize).checked_sub(FD_FILE_BASE).ok_or(SysError::InvalidArgument)?;
        let mut files = self.inner.files.lock().unwrap_or_else(|p| p.into_inner());
        match files.get_mut(index).and_then(|slot| slot.take()) {
            Some(file) => Ok((index, file)),
            None => Err(SysError::NotFound),
        }
    }

    fn put_fd(&self, index: usize, file: OpenFile) {
        let mut files = self.inner.files.lock().unwrap_or_else(|p| p.into_inner());
        files[index] = Some(file);
    }

    fn sys_read(&self, addr: u64, size: usize, fd: i64) -> SysResult<i64> {
        if fd == FD_CONSOLE_INPUT {
            for i in 0..size {
                let ch = self.console_get_char();
                self.write_user_byte(addr + i as u64, ch)?;
            }
            return Ok(size as i64);
        }
        if fd == FD_CONSOLE_OUTPUT {
            return Err(SysError::InvalidArgument);
        }
        let (index, mut file) = self.take_fd(fd)?;
        let mut buf = vec![0u8; size];
        let n = file.read(self, &mut buf);
        self.put_fd(index, file);
        for (i, &b) in buf[..n].iter().enumerate() {
            self.write_user_byte(addr + i as u64, b)?;
        }
        Ok(n as i64)
    }

    fn sys_write(&self, addr: u64, size: usize, fd: i64) -> SysResult<i64> {
        let mut buf = vec![0u8; size];
        {
            let mut g = self.lock();
            for (i, slot) in buf.iter_mut().enumerate() {
                match g.machine.read_mem(addr + i as u64, 1) {
                    Some(b) => *slot = b as u8,
                    None => {
                        g.machine.take_exception();
                        return Err(SysError::InvalidArgument);
                    }
                }
            }
        }
        if fd == FD_CONSOLE_OUTPUT {
            for &b in &buf {
                self.console_put_char(b);
            }
            return Ok(size as i64);
        }
        if fd == FD_CONSOLE_INPUT {
            return Err(SysError::InvalidArgument);
        }
        let (index, mut file) = self.take_fd(fd)?;
        let n = file.write(self, &buf);
        self.put_fd(index, file);
        Ok(n as i64)
    }

    fn write_user_byte(&self, addr: u64, value: u8) -> SysResult<()> {
        let mut g = self.lock();
        if g.machine.write_mem(addr, 1, value as u64) {
            Ok(())
        } else {
            g.machine.take_exception();
            Err(SysError::InvalidArgument)
        }
    }

    /// The single-step debugger: dump state, then read one command from
    /// stdin. Blank steps once, a number runs to that cycle, `c` turns
    /// single-stepping off, `?` prints help.
    fn debugger(&self, g: &mut crate::kernel::Core) {
        g.interrupt.dump_state();
        g.machine.dump_state();
        println!("At cycle {}", g.interrupt.total_ticks());

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            g.machine.single_step = false;
            return;
        }
        let trimmed = line.trim();
        if let Ok(cycle) = trimmed.parse::<u64>() {
            g.machine.run_until = cycle;
            return;
        }
        g.machine.run_until = 0;
        match trimmed {
            "" => {}
            "c" => g.machine.single_step = false,
            "?" => {
                println!("Machine commands:");
                println!("    <return>  execute one instruction");
                println!("    <number>  run until the given clock cycle");
                println!("    c         run until completion");
                println!("    ?         print this help message");
            }
            _ => {}
        }
    }
}
