//! Terminal-side plumbing: raw mode as a scoped resource, keystroke
//! decoding, and the production readiness wait for the interactive session.

use std::io::{self, stdout};
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};
use log::debug;

use crate::channel::{ChannelError, SerialChannel};
use crate::interactive::{Console, InterruptFlag, Keystroke, Wake};

/// How long one readiness poll on the terminal may block. Keystrokes wake
/// the wait immediately; serial data waits at most this long to be noticed.
const POLL_SLICE: Duration = Duration::from_millis(25);

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Holds the terminal in raw mode; restores it when dropped. Every exit path
/// out of an interactive session runs through this drop.
pub(crate) struct RawModeGuard {
    _private: (),
}
impl RawModeGuard {
    pub(crate) fn engage() -> Result<RawModeGuard> {
        enable_raw_mode()?;
        Ok(RawModeGuard { _private: () })
    }
}
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Nothing sensible to do with a failure here; the terminal is on its
        // own at this point.
        let _ = disable_raw_mode();
    }
}

/// The production [`Console`]: the real terminal, in raw mode for as long as
/// this value lives, and the real serial channel readiness probe.
pub(crate) struct InteractiveConsole {
    interrupted: InterruptFlag,
    _raw: RawModeGuard,
}
impl InteractiveConsole {
    /// Take over the terminal for an interactive session. Raw mode is held
    /// until the console is dropped.
    pub(crate) fn engage(interrupted: InterruptFlag) -> Result<InteractiveConsole> {
        let raw = RawModeGuard::engage()?;
        Ok(InteractiveConsole {
            interrupted,
            _raw: raw,
        })
    }
}
impl Console for InteractiveConsole {
    /// A `Box<dyn SerialPort>` has no handle a `select()` could wait on, so
    /// the wait alternates between the channel's readiness probe and a short
    /// terminal poll. Input wakes immediately; serial data waits at most one
    /// poll slice.
    fn wait(&mut self, channel: &mut SerialChannel) -> std::result::Result<Wake, ChannelError> {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(Wake::Interrupt);
            }
            if channel.bytes_to_read()? > 0 {
                return Ok(Wake::Serial);
            }
            if poll(POLL_SLICE).map_err(terminal_error)? {
                return Ok(Wake::Input);
            }
        }
    }

    fn read_keystroke(&mut self) -> std::result::Result<Keystroke, ChannelError> {
        let event = read().map_err(terminal_error)?;
        Ok(keystroke_bytes(event))
    }
}

/// Decode one terminal event to what it puts on the wire.
///
/// Printable ASCII goes through as itself; Enter, Tab, Backspace and Esc map
/// to their control bytes; Ctrl+letter maps to the corresponding C0 byte,
/// except Ctrl+C which is the session interrupt. Anything without a byte
/// representation on this wire is swallowed.
pub(crate) fn keystroke_bytes(event: Event) -> Keystroke {
    match event {
        Event::Key(KeyEvent {
            code: KeyCode::Char('c'),
            modifiers: KeyModifiers::CONTROL,
        }) => Keystroke::Interrupt,
        Event::Key(KeyEvent {
            code: KeyCode::Char(c),
            modifiers,
        }) if modifiers.contains(KeyModifiers::CONTROL) => {
            if c.is_ascii_alphabetic() {
                Keystroke::Bytes(vec![(c.to_ascii_uppercase() as u8) & 0x1F])
            } else {
                Keystroke::Ignored
            }
        }
        Event::Key(KeyEvent {
            code: KeyCode::Char(c),
            ..
        }) => {
            if c.is_ascii() {
                Keystroke::Bytes(vec![c as u8])
            } else {
                debug!("dropping non-ASCII key {:?}", c);
                Keystroke::Ignored
            }
        }
        Event::Key(KeyEvent {
            code: KeyCode::Enter,
            ..
        }) => Keystroke::Bytes(vec![b'\n']),
        Event::Key(KeyEvent {
            code: KeyCode::Tab, ..
        }) => Keystroke::Bytes(vec![b'\t']),
        Event::Key(KeyEvent {
            code: KeyCode::Backspace,
            ..
        }) => Keystroke::Bytes(vec![0x7F]),
        Event::Key(KeyEvent {
            code: KeyCode::Esc, ..
        }) => Keystroke::Bytes(vec![0x1B]),
        _ => Keystroke::Ignored,
    }
}

/// Wait up to half a second for a keypress, with the terminal in raw mode
/// for the duration of the wait. Returns `true` when the surrounding wait
/// should be cancelled: Esc cancels it, and Ctrl+C cancels it after latching
/// the interrupt flag so the whole session winds down in order.
pub(crate) fn poll_escape(interrupted: &InterruptFlag) -> Result<bool> {
    let pending;
    {
        let _raw = RawModeGuard::engage()?;
        execute!(stdout(), Hide)?;
        pending = poll(Duration::from_millis(500))?;
        execute!(stdout(), MoveToColumn(0), Show)?;
    }

    if pending {
        // It's guaranteed that read() wont block if `poll` returns `Ok(true)`
        let event = read()?;

        if event == Event::Key(KeyCode::Esc.into()) {
            return Ok(true);
        }
        if event
            == Event::Key(KeyEvent {
                modifiers: KeyModifiers::CONTROL,
                code: KeyCode::Char('c'),
            })
        {
            // As we are in raw mode, Ctrl+C arrives as a key event instead
            // of a signal.
            interrupted.store(true, Ordering::SeqCst);
            return Ok(true);
        }
    }

    Ok(false)
}

// =============================================================================
// Private stuff
// =============================================================================

fn terminal_error(error: crossterm::ErrorKind) -> ChannelError {
    ChannelError::Transport(io::Error::new(io::ErrorKind::Other, error))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> Event {
        Event::Key(code.into())
    }

    fn ctrl(c: char) -> Event {
        Event::Key(KeyEvent {
            code: KeyCode::Char(c),
            modifiers: KeyModifiers::CONTROL,
        })
    }

    #[test]
    fn printable_ascii_goes_through() {
        assert_eq!(
            keystroke_bytes(key(KeyCode::Char('a'))),
            Keystroke::Bytes(vec![b'a'])
        );
        assert_eq!(
            keystroke_bytes(key(KeyCode::Char('Z'))),
            Keystroke::Bytes(vec![b'Z'])
        );
        assert_eq!(
            keystroke_bytes(key(KeyCode::Char(' '))),
            Keystroke::Bytes(vec![b' '])
        );
    }

    #[test]
    fn ctrl_c_is_the_interrupt() {
        assert_eq!(keystroke_bytes(ctrl('c')), Keystroke::Interrupt);
    }

    #[test]
    fn ctrl_letter_is_a_control_byte() {
        assert_eq!(keystroke_bytes(ctrl('d')), Keystroke::Bytes(vec![0x04]));
        assert_eq!(keystroke_bytes(ctrl('z')), Keystroke::Bytes(vec![0x1A]));
    }

    #[test]
    fn editing_keys_map_to_control_bytes() {
        assert_eq!(
            keystroke_bytes(key(KeyCode::Enter)),
            Keystroke::Bytes(vec![b'\n'])
        );
        assert_eq!(
            keystroke_bytes(key(KeyCode::Tab)),
            Keystroke::Bytes(vec![b'\t'])
        );
        assert_eq!(
            keystroke_bytes(key(KeyCode::Backspace)),
            Keystroke::Bytes(vec![0x7F])
        );
        assert_eq!(
            keystroke_bytes(key(KeyCode::Esc)),
            Keystroke::Bytes(vec![0x1B])
        );
    }

    #[test]
    fn keys_with_no_wire_bytes_are_ignored() {
        assert_eq!(keystroke_bytes(key(KeyCode::F(5))), Keystroke::Ignored);
        assert_eq!(keystroke_bytes(key(KeyCode::Up)), Keystroke::Ignored);
        assert_eq!(keystroke_bytes(key(KeyCode::Char('é'))), Keystroke::Ignored);
        assert_eq!(keystroke_bytes(Event::Resize(80, 24)), Keystroke::Ignored);
    }
}
