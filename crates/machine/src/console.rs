//! The console device.
//!
//! Output: one character at a time into an output register that drains
//! into a pluggable sink after `CONSOLE_TIME` cycles, announced by a
//! [`IntHandler::ConsoleWriteDone`]. Input: characters fed to the device
//! become readable one `CONSOLE_TIME` apart, each announced by a
//! [`IntHandler::ConsoleReadAvail`]. The blocking discipline on top of
//! these events lives in the kernel's console driver.

use std::collections::VecDeque;
use std::io::Write;

use types::CONSOLE_TIME;

use crate::interrupt::{IntHandler, Interrupt};

pub struct Console {
    sink: Box<dyn Write + Send>,
    /// Character sitting in the output register, not yet drained.
    out_char: Option<u8>,
    /// Fed but not yet announced input.
    incoming: VecDeque<u8>,
    /// Announced input, readable now.
    readable: VecDeque<u8>,
    /// Echo consumed input back to the sink, terminal style.
    echo: bool,
}

impl Console {
    /// A console draining to the host's stdout.
    pub fn stdout() -> Console {
        Console::with_sink(Box::new(std::io::stdout()))
    }

    /// A console draining to an arbitrary sink (tests capture output
    /// this way).
    pub fn with_sink(sink: Box<dyn Write + Send>) -> Console {
        Console {
            sink,
            out_char: None,
            incoming: VecDeque::new(),
            readable: VecDeque::new(),
            echo: false,
        }
    }

    /// Turn input echo on or off.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn busy(&self) -> bool {
        self.out_char.is_some()
    }

    /// Load the output register. The device must be idle; the driver
    /// serializes callers.
    pub fn put_char(&mut self, ch: u8, interrupt: &mut Interrupt) {
        assert!(self.out_char.is_none(), "console: put_char while busy");
        self.out_char = Some(ch);
        interrupt.schedule(IntHandler::ConsoleWriteDone, CONSOLE_TIME);
    }

    /// The write completion: drain the register into the sink.
    pub fn write_done(&mut self) {
        let ch = self.out_char.take().expect("console: write-done with empty register");
        self.sink
            .write_all(&[ch])
            .and_then(|_| self.sink.flush())
            .expect("console: sink write failed");
    }

    /// Feed bytes into the input side. Each becomes readable one
    /// `CONSOLE_TIME` after the previous one.
    pub fn feed_input(&mut self, bytes: &[u8], interrupt: &mut Interrupt) {
        for (i, &b) in bytes.iter().enumerate() {
            self.incoming.push_back(b);
            interrupt.schedule(IntHandler::ConsoleReadAvail, (i as u64 + 1) * CONSOLE_TIME);
        }
    }

    /// The read-avail completion: one fed character becomes readable.
    pub fn read_avail(&mut self) {
        if let Some(b) = self.incoming.pop_front() {
            self.readable.push_back(b);
        }
    }

    /// Take the next readable character, if any. With echo enabled the
    /// character also appears on the sink, the way a terminal shows
    /// what was typed.
    pub fn get_char(&mut self) -> Option<u8> {
        let ch = self.readable.pop_front();
        if self.echo {
            if let Some(b) = ch {
                self.sink
                    .write_all(&[b])
                    .and_then(|_| self.sink.flush())
                    .expect("console: sink write failed");
            }
        }
        ch
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("busy", &self.busy())
            .field("incoming", &self.incoming.len())
            .field("readable", &self.readable.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_drains_on_completion() {
        let capture = Capture::default();
        let mut console = Console::with_sink(Box::new(capture.clone()));
        let mut interrupt = Interrupt::new();

        console.put_char(b'h', &mut interrupt);
        assert!(console.busy());
        assert!(capture.0.lock().unwrap().is_empty());

        interrupt.advance(CONSOLE_TIME);
        assert_eq!(interrupt.pop_due(), Some(IntHandler::ConsoleWriteDone));
        console.write_done();
        assert!(!console.busy());
        assert_eq!(&*capture.0.lock().unwrap(), b"h");
    }

    #[test]
    fn echo_repeats_consumed_input_on_the_sink() {
        let capture = Capture::default();
        let mut console = Console::with_sink(Box::new(capture.clone()));
        let mut interrupt = Interrupt::new();
        console.set_echo(true);

        console.feed_input(b"a", &mut interrupt);
        interrupt.advance(CONSOLE_TIME);
        assert_eq!(interrupt.pop_due(), Some(IntHandler::ConsoleReadAvail));
        console.read_avail();
        // nothing echoes until the character is actually consumed
        assert!(capture.0.lock().unwrap().is_empty());
        assert_eq!(console.get_char(), Some(b'a'));
        assert_eq!(&*capture.0.lock().unwrap(), b"a");
    }

    #[test]
    fn input_becomes_readable_in_order() {
        let mut console = Console::with_sink(Box::new(std::io::sink()));
        let mut interrupt = Interrupt::new();

        console.feed_input(b"ab", &mut interrupt);
        assert_eq!(console.get_char(), None);

        interrupt.advance(CONSOLE_TIME);
        assert_eq!(interrupt.pop_due(), Some(IntHandler::ConsoleReadAvail));
        console.read_avail();
        assert_eq!(console.get_char(), Some(b'a'));

        interrupt.advance(CONSOLE_TIME);
        assert_eq!(interrupt.pop_due(), Some(IntHandler::ConsoleReadAvail));
        console.read_avail();
        assert_eq!(console.get_char(), Some(b'b'));
        assert_eq!(console.get_char(), None);
    }
}
