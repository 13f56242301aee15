use machine::UserContext;
use types::{SysError, ThreadId};

/// Lifecycle of a simulated thread. Transitions are driven only by the
/// thread system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    JustCreated,
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// One simulated thread. Threads live in the kernel arena for the
/// lifetime of the simulation; a finished thread stays behind as a
/// `Zombie` record so late `join`s still resolve, with its bulky state
/// (the user register snapshot) dropped at finish time.
#[derive(Debug)]
pub struct Thread {
    pub name: String,
    pub state: ThreadState,
    /// Threads sleeping in `join` on this thread.
    pub join_waiters: Vec<ThreadId>,
    /// Last failed operation, reported through `perror`.
    pub last_error: Option<SysError>,
    /// Saved user CPU state for threads that execute user code; `None`
    /// for pure kernel threads.
    pub user_ctx: Option<Box<UserContext>>,
}

impl Thread {
    pub fn new(name: &str) -> Thread {
        Thread {
            name: name.to_string(),
            state: ThreadState::JustCreated,
            join_waiters: Vec::new(),
            last_error: None,
            user_ctx: None,
        }
    }
}
