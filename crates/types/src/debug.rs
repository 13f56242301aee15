//! Flag-gated debug output.
//!
//! Each subsystem owns one single-character flag:
//!
//! - `'t'` thread system
//! - `'s'` semaphores, locks and conditions
//! - `'i'` interrupt emulation
//! - `'m'` machine emulation
//! - `'d'` disk emulation
//! - `'f'` file system
//! - `'a'` address spaces
//! - `'x'` virtual memory
//!
//! `'+'` enables everything. The flag set is installed once at startup and
//! read-only afterwards, so checking a flag is cheap enough to leave in
//! hot paths.

use once_cell::sync::OnceCell;

const KNOWN_FLAGS: &[char] = &['t', 's', 'i', 'm', 'd', 'f', 'a', 'x'];

static FLAGS: OnceCell<u16> = OnceCell::new();

fn bit(flag: char) -> Option<u16> {
    KNOWN_FLAGS
        .iter()
        .position(|&f| f == flag)
        .map(|i| 1u16 << i)
}

/// Install the debug flag set. Later calls are ignored, so concurrent
/// simulations in one process share whichever set was installed first.
pub fn init(flags: &str) {
    let mut mask = 0u16;
    for ch in flags.chars() {
        if ch == '+' {
            mask = u16::MAX;
        } else if let Some(b) = bit(ch) {
            mask |= b;
        }
    }
    let _ = FLAGS.set(mask);
}

/// Is the given debug flag enabled?
pub fn enabled(flag: char) -> bool {
    let mask = FLAGS.get().copied().unwrap_or(0);
    match bit(flag) {
        Some(b) => mask & b != 0,
        None => false,
    }
}

/// Print a message on stderr when the given debug flag is enabled.
#[macro_export]
macro_rules! debugf {
    ($flag:expr, $($arg:tt)*) => {
        if $crate::debug::enabled($flag) {
            eprintln!("[{}] {}", $flag, format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flags_are_never_enabled() {
        assert!(!enabled('q'));
        assert!(!enabled('+'));
    }
}
