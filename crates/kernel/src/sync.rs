//! Semaphores, locks and condition variables.
//!
//! Each operation is one critical section: interrupts off on entry, the
//! minimal state change plus a queue move, interrupts back on, sleeping
//! in between when the calling thread must wait. Wait queues hold thread
//! ids and wake in FIFO order. All failures come back as error codes;
//! nothing here unwinds.

use std::collections::VecDeque;

use types::{debugf, CondId, LockId, SemId, SysError, SysResult, ThreadId};

use crate::kernel::{wake, Core, CoreGuard, Kernel};

#[derive(Debug)]
pub(crate) struct Semaphore {
    pub name: String,
    pub counter: i64,
    pub queue: VecDeque<ThreadId>,
}

#[derive(Debug)]
pub(crate) struct Lock {
    pub name: String,
    pub owner: Option<ThreadId>,
    pub queue: VecDeque<ThreadId>,
}

#[derive(Debug)]
pub(crate) struct Condition {
    pub name: String,
    pub queue: VecDeque<ThreadId>,
}

// Arena allocation used both by the public create calls and by kernel
// construction (driver channels exist before any thread can run).

pub(crate) fn alloc_sem(g: &mut Core, name: &str, initial: i64) -> SemId {
    let id = SemId(g.sems.len());
    g.sems.push(Some(Semaphore {
        name: name.to_string(),
        counter: initial,
        queue: VecDeque::new(),
    }));
    id
}

pub(crate) fn alloc_lock(g: &mut Core, name: &str) -> LockId {
    let id = LockId(g.locks.len());
    g.locks.push(Some(Lock {
        name: name.to_string(),
        owner: None,
        queue: VecDeque::new(),
    }));
    id
}

pub(crate) fn alloc_cond(g: &mut Core, name: &str) -> CondId {
    let id = CondId(g.conds.len());
    g.conds.push(Some(Condition {
        name: name.to_string(),
        queue: VecDeque::new(),
    }));
    id
}

/// Non-blocking V, usable from interrupt handlers (interrupts already
/// off). Increments and wakes the head waiter if one is queued.
pub(crate) fn sem_v_in(g: &mut Core, id: SemId) -> SysResult<()> {
    let woken = match g.sems.get_mut(id.0).and_then(|s| s.as_mut()) {
        None => return Err(SysError::NotFound),
        Some(sem) => {
            sem.counter += 1;
            sem.queue.pop_front()
        }
    };
    if let Some(tid) = woken {
        wake(g, tid);
    }
    Ok(())
}

/// Release `id` on behalf of `me`, handing ownership to the head waiter
/// if there is one. Returns the thread to wake, which the caller does
/// once the lock-table borrow has ended.
fn lock_release_in(g: &mut Core, me: ThreadId, id: LockId) -> SysResult<Option<ThreadId>> {
    match g.locks.get_mut(id.0).and_then(|l| l.as_mut()) {
        None => Err(SysError::NotFound),
        Some(lock) if lock.owner != Some(me) => Err(SysError::NotOwner),
        Some(lock) => match lock.queue.pop_front() {
            Some(next) => {
                lock.owner = Some(next);
                Ok(Some(next))
            }
            None => {
                lock.owner = None;
                Ok(None)
            }
        },
    }
}

enum AcquireStep {
    Acquired,
    AlreadyOwner,
    Queued,
    Gone,
}

impl Kernel {
    // ---- semaphores -------------------------------------------------

    pub fn sem_create(&self, name: &str, initial: i64) -> SemId {
        let mut g = self.enter();
        let id = alloc_sem(&mut g, name, initial);
        debugf!('s', "sem_create {:?} \"{}\" = {}", id, name, initial);
        self.leave(g);
        id
    }

    /// P: wait until a permit is available, then take it. A waiter that
    /// is woken re-checks, so a semaphore created with a negative
    /// counter needs enough V's to climb above zero before any P
    /// completes.
    pub fn sem_p(&self, id: SemId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let result = loop {
            let taken = match g.sems.get_mut(id.0).and_then(|s| s.as_mut()) {
                None => break Err(SysError::NotFound),
                Some(sem) => {
                    if sem.counter > 0 {
                        sem.counter -= 1;
                        true
                    } else {
                        sem.queue.push_back(me);
                        false
                    }
                }
            };
            if taken {
                break Ok(());
            }
            g = self.sleep_in(g, me);
        };
        self.leave(g);
        result
    }

    /// V: return a permit and wake the head waiter if one is queued.
    pub fn sem_v(&self, id: SemId) -> SysResult<()> {
        let mut g = self.enter();
        let result = sem_v_in(&mut g, id);
        self.leave(g);
        result
    }

    /// Destroying a semaphore with waiters is an error.
    pub fn sem_destroy(&self, id: SemId) -> SysResult<()> {
        let mut g = self.enter();
        let result = match g.sems.get_mut(id.0) {
            None | Some(None) => Err(SysError::NotFound),
            Some(slot) => {
                if slot.as_ref().is_some_and(|s| !s.queue.is_empty()) {
                    Err(SysError::Busy)
                } else {
                    *slot = None;
                    Ok(())
                }
            }
        };
        self.leave(g);
        result
    }

    // ---- locks ------------------------------------------------------

    pub fn lock_create(&self, name: &str) -> LockId {
        let mut g = self.enter();
        let id = alloc_lock(&mut g, name);
        debugf!('s', "lock_create {:?} \"{}\"", id, name);
        self.leave(g);
        id
    }

    /// Acquire, blocking on contention. Re-acquiring a lock the caller
    /// already owns fails: these locks are deliberately not reentrant.
    pub fn lock_acquire(&self, id: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let (g2, result) = self.lock_acquire_in(g, me, id);
        g = g2;
        self.leave(g);
        result
    }

    pub(crate) fn lock_acquire_in<'a>(
        &'a self,
        mut g: CoreGuard<'a>,
        me: ThreadId,
        id: LockId,
    ) -> (CoreGuard<'a>, SysResult<()>) {
        let step = match g.locks.get_mut(id.0).and_then(|l| l.as_mut()) {
            None => AcquireStep::Gone,
            Some(lock) => {
                if lock.owner == Some(me) {
                    AcquireStep::AlreadyOwner
                } else if lock.owner.is_none() {
                    lock.owner = Some(me);
                    AcquireStep::Acquired
                } else {
                    lock.queue.push_back(me);
                    AcquireStep::Queued
                }
            }
        };
        match step {
            AcquireStep::Gone => (g, Err(SysError::NotFound)),
            AcquireStep::AlreadyOwner => (g, Err(SysError::Busy)),
            AcquireStep::Acquired => (g, Ok(())),
            AcquireStep::Queued => {
                // ownership is handed to us directly by the release
                let g = self.sleep_in(g, me);
                (g, Ok(()))
            }
        }
    }

    /// Release. Only the owner may release; with waiters, ownership has
    /// transferred before this returns.
    pub fn lock_release(&self, id: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let result = match lock_release_in(&mut g, me, id) {
            Ok(Some(next)) => {
                wake(&mut g, next);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.leave(g);
        result
    }

    pub fn lock_destroy(&self, id: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let result = match g.locks.get_mut(id.0) {
            None | Some(None) => Err(SysError::NotFound),
            Some(slot) => {
                if slot.as_ref().is_some_and(|l| !l.queue.is_empty()) {
                    Err(SysError::Busy)
                } else {
                    *slot = None;
                    Ok(())
                }
            }
        };
        self.leave(g);
        result
    }

    // ---- condition variables ----------------------------------------

    pub fn cond_create(&self, name: &str) -> CondId {
        let mut g = self.enter();
        let id = alloc_cond(&mut g, name);
        debugf!('s', "cond_create {:?} \"{}\"", id, name);
        self.leave(g);
        id
    }

    /// Atomically release `lock`, wait for a signal, and re-acquire the
    /// lock before returning. The caller must hold `lock`.
    pub fn cond_wait(&self, cond: CondId, lock: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;

        let valid = match g.conds.get_mut(cond.0).and_then(|c| c.as_mut()) {
            None => Err(SysError::NotFound),
            Some(_) => Ok(()),
        };
        let result = match valid {
            Err(e) => Err(e),
            Ok(()) => match lock_release_in(&mut g, me, lock) {
                Err(e) => Err(e),
                Ok(handoff) => {
                    g.conds[cond.0]
                        .as_mut()
                        .expect("condition vanished inside critical section")
                        .queue
                        .push_back(me);
                    if let Some(next) = handoff {
                        wake(&mut g, next);
                    }
                    g = self.sleep_in(g, me);
                    let (g2, reacquire) = self.lock_acquire_in(g, me, lock);
                    g = g2;
                    reacquire
                }
            },
        };
        self.leave(g);
        result
    }

    /// Wake one waiter. The caller must hold `lock`; the waiter
    /// re-acquires it before its `cond_wait` returns.
    pub fn cond_signal(&self, cond: CondId, lock: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let result = self.signal_in(&mut g, me, cond, lock, false);
        self.leave(g);
        result
    }

    /// Wake every waiter.
    pub fn cond_broadcast(&self, cond: CondId, lock: LockId) -> SysResult<()> {
        let mut g = self.enter();
        let me = g.current;
        let result = self.signal_in(&mut g, me, cond, lock, true);
        self.leave(g);
        result
    }

    fn signal_in(
        &self,
        g: &mut Core,
        me: ThreadId,
        cond: CondId,
        lock: LockId,
        all: bool,
    ) -> SysResult<()> {
        match g.locks.get(lock.0).and_then(|l| l.as_ref()) {
            None => return Err(SysError::NotFound),
            Some(l) if l.owner != Some(me) => return Err(SysError::NotOwner),
            Some(_) => {}
        }
        let woken: Vec<ThreadId> = match g.conds.get_mut(cond.0).and_then(|c| c.as_mut()) {
            None => return Err(SysError::NotFound),
            Some(c) => {
                if all {
                    c.queue.drain(..).collect()
                } else {
                    c.queue.pop_front().into_iter().collect()
                }
            }
        };
        for tid in woken {
            wake(g, tid);
        }
        Ok(())
    }

    pub fn cond_destroy(&self, id: CondId) -> SysResult<()> {
        let mut g = self.enter();
        let result = match g.conds.get_mut(id.0) {
            None | Some(None) => Err(SysError::NotFound),
            Some(slot) => {
                if slot.as_ref().is_some_and(|c| !c.queue.is_empty()) {
                    Err(SysError::Busy)
                } else {
                    *slot = None;
                    Ok(())
                }
            }
        };
        self.leave(g);
        result
    }
}
