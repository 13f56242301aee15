//! Blocking console I/O on top of the character-at-a-time device, with
//! the same lock-plus-semaphore shape as the disk driver: one channel
//! for output, one for input.

use crate::kernel::{Core, Kernel};

impl Kernel {
    /// Emit one character, returning once the device has drained it.
    pub fn console_put_char(&self, ch: u8) {
        let channel = &self.inner.console_write;
        self.lock_acquire(channel.lock)
            .expect("console write lock unusable");
        {
            let mut g = self.enter();
            let Core {
                console, interrupt, ..
            } = &mut *g;
            console.put_char(ch, interrupt);
            self.leave(g);
        }
        self.sem_p(channel.sem)
            .expect("console write semaphore unusable");
        self.lock_release(channel.lock)
            .expect("console write lock unusable");
    }

    /// Emit a whole string, one simulated character time apiece.
    pub fn console_put_string(&self, s: &str) {
        for b in s.bytes() {
            self.console_put_char(b);
        }
    }

    /// Take the next input character, blocking until one has arrived.
    pub fn console_get_char(&self) -> u8 {
        let channel = &self.inner.console_read;
        self.lock_acquire(channel.lock)
            .expect("console read lock unusable");
        self.sem_p(channel.sem)
            .expect("console read semaphore unusable");
        let ch = {
            let mut g = self.enter();
            let ch = g
                .console
                .get_char()
                .expect("console read signalled with no data");
            g.stats.num_console_chars_in += 1;
            self.leave(g);
            ch
        };
        self.lock_release(channel.lock)
            .expect("console read lock unusable");
        ch
    }
}
