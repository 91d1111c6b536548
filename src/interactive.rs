//! Full-duplex bridge between the serial channel and the local terminal.
//!
//! Once a kernel is pushed (or right away, when there is nothing to push)
//! the channel turns into a plain console line to the device: everything the
//! device prints shows up on the local terminal, every local keystroke goes
//! to the device, raw and unbuffered.
//!
//! The relay is one single-threaded loop over a readiness wait. The wait
//! itself lives behind the [`Console`] trait: production code waits on the
//! real terminal and the real port, unit tests script the wakes and drive
//! the loop deterministically.
//!
//! Two things end a session, and both end it cleanly: the operator pressing
//! Ctrl+C, and the serial transport going away (device unplugged, port
//! closed). Neither is an error worth a non-zero exit; an interactive
//! session that ends is a session that is over.

use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info};

use crate::channel::{ChannelError, SerialChannel};

// =============================================================================
// Public Interface
// =============================================================================

/// Process-wide interrupt latch. The Ctrl+C handler sets it; the bridge
/// checks it at the top of every wait, and the session between states.
pub type InterruptFlag = Arc<AtomicBool>;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// What a readiness wait woke up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The device sent something; the channel has buffered bytes.
    Serial,
    /// The operator typed something; one keystroke is pending.
    Input,
    /// The operator asked to stop the session.
    Interrupt,
}

/// One keystroke, decoded to what it means on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Keystroke {
    /// Bytes to forward to the device verbatim.
    Bytes(Vec<u8>),
    /// The interrupt combination (Ctrl+C under raw mode).
    Interrupt,
    /// A key with no byte representation on this wire (function keys,
    /// non-ASCII input). Swallowed.
    Ignored,
}

/// How the relay loop ended. Both ends are clean exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelayEnd {
    /// The operator ended the session.
    Interrupt,
    /// The transport went away under the session.
    ChannelClosed,
}

/// The local side of an interactive session: a readiness wait over the
/// serial channel and the terminal, plus single-keystroke reads.
///
/// The production implementation is
/// [`InteractiveConsole`](crate::utils::keyboard::InteractiveConsole), which
/// holds the terminal in raw mode for as long as it lives.
pub(crate) trait Console {
    /// Block until the channel has bytes, the terminal has a keystroke, or
    /// an interrupt was raised. Interrupts win over pending data.
    fn wait(&mut self, channel: &mut SerialChannel) -> Result<Wake, ChannelError>;

    /// Read exactly one pending keystroke. Only called after a
    /// [`Wake::Input`].
    fn read_keystroke(&mut self) -> Result<Keystroke, ChannelError>;
}

/// The relay loop. Wakes are handled one at a time, in arrival order: a
/// serial wake drains the channel and prints it, an input wake forwards one
/// keystroke. Runs until the operator interrupts or the transport dies;
/// the caller keeps the channel and drops it afterwards on every path.
pub(crate) fn relay(
    channel: &mut SerialChannel,
    console: &mut dyn Console,
    output: &mut dyn Write,
) -> RelayEnd {
    loop {
        match console.wait(channel) {
            Ok(Wake::Interrupt) => {
                info!("operator interrupt, ending the session");
                return RelayEnd::Interrupt;
            }
            Ok(Wake::Serial) => {
                let text = match channel.read_buffer() {
                    Ok(text) => text,
                    Err(error) => {
                        info!("serial channel lost: {}", error);
                        return RelayEnd::ChannelClosed;
                    }
                };
                if text.is_empty() {
                    // A wake with nothing behind it; happens, harmless.
                    continue;
                }
                if let Err(error) = output.write_all(text.as_bytes()).and_then(|_| output.flush())
                {
                    info!("local output lost: {}", error);
                    return RelayEnd::ChannelClosed;
                }
            }
            Ok(Wake::Input) => match console.read_keystroke() {
                Ok(Keystroke::Bytes(bytes)) => {
                    debug!("forwarding {} key byte(s)", bytes.len());
                    if let Err(error) = channel.send_bytes(&bytes) {
                        info!("serial channel lost: {}", error);
                        return RelayEnd::ChannelClosed;
                    }
                }
                Ok(Keystroke::Interrupt) => {
                    info!("operator interrupt, ending the session");
                    return RelayEnd::Interrupt;
                }
                Ok(Keystroke::Ignored) => {}
                Err(error) => {
                    info!("terminal input lost: {}", error);
                    return RelayEnd::ChannelClosed;
                }
            },
            Err(error) => {
                info!("readiness wait failed: {}", error);
                return RelayEnd::ChannelClosed;
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;
    use crate::channel::MockSerialLink;

    /// A console whose wakes and keystrokes follow a fixed script. An
    /// exhausted script behaves like the operator pressing Ctrl+C.
    struct ScriptedConsole {
        wakes: VecDeque<Wake>,
        keys: VecDeque<Keystroke>,
    }
    impl ScriptedConsole {
        fn new(wakes: Vec<Wake>, keys: Vec<Keystroke>) -> Self {
            ScriptedConsole {
                wakes: wakes.into(),
                keys: keys.into(),
            }
        }
    }
    impl Console for ScriptedConsole {
        fn wait(&mut self, _channel: &mut SerialChannel) -> Result<Wake, ChannelError> {
            Ok(self.wakes.pop_front().unwrap_or(Wake::Interrupt))
        }

        fn read_keystroke(&mut self) -> Result<Keystroke, ChannelError> {
            Ok(self.keys.pop_front().unwrap_or(Keystroke::Interrupt))
        }
    }

    fn mock_channel(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> SerialChannel {
        SerialChannel::with_link(Box::new(MockSerialLink::new(reads, expected_writes)))
    }

    #[test]
    fn relays_in_arrival_order() {
        let mut channel = mock_channel(
            vec![
                Some(b"one".to_vec()),
                Some(b"two".to_vec()),
                Some(b"three".to_vec()),
            ],
            b"ab".to_vec(),
        );
        let mut console = ScriptedConsole::new(
            vec![
                Wake::Serial,
                Wake::Input,
                Wake::Serial,
                Wake::Input,
                Wake::Serial,
            ],
            vec![
                Keystroke::Bytes(b"a".to_vec()),
                Keystroke::Bytes(b"b".to_vec()),
            ],
        );
        let mut output = Vec::new();

        let end = relay(&mut channel, &mut console, &mut output);

        // Exhausted script reads as an operator interrupt.
        assert_eq!(end, RelayEnd::Interrupt);
        // Each serial wake was drained exactly once, in order; the write log
        // (checked on drop) proves the keystrokes went out in order too.
        assert_eq!(output, b"onetwothree");
    }

    #[test]
    fn interrupt_key_ends_the_session() {
        let mut channel = mock_channel(vec![], vec![]);
        let mut console =
            ScriptedConsole::new(vec![Wake::Input], vec![Keystroke::Interrupt]);
        let mut output = Vec::new();

        let end = relay(&mut channel, &mut console, &mut output);

        assert_eq!(end, RelayEnd::Interrupt);
        assert!(output.is_empty());
    }

    #[test]
    fn ignored_keys_produce_nothing() {
        let mut channel = mock_channel(vec![], vec![]);
        let mut console = ScriptedConsole::new(
            vec![Wake::Input, Wake::Input],
            vec![Keystroke::Ignored, Keystroke::Interrupt],
        );
        let mut output = Vec::new();

        let end = relay(&mut channel, &mut console, &mut output);

        assert_eq!(end, RelayEnd::Interrupt);
        assert!(output.is_empty());
    }

    #[test]
    fn lost_transport_ends_cleanly() {
        let mut channel = mock_channel(
            vec![Some(b"boot: ".to_vec()), None], // then the port goes away
            vec![],
        );
        let mut console = ScriptedConsole::new(vec![Wake::Serial, Wake::Serial], vec![]);
        let mut output = Vec::new();

        let end = relay(&mut channel, &mut console, &mut output);

        assert_eq!(end, RelayEnd::ChannelClosed);
        assert_eq!(output, b"boot: ");
    }

    #[test]
    fn spurious_serial_wake_is_harmless() {
        let mut channel = mock_channel(vec![], vec![]);
        let mut console = ScriptedConsole::new(vec![Wake::Serial], vec![]);
        let mut output = Vec::new();

        let end = relay(&mut channel, &mut console, &mut output);

        assert_eq!(end, RelayEnd::Interrupt);
        assert!(output.is_empty());
    }

    #[test]
    fn broken_output_sink_ends_cleanly() {
        struct BrokenSink;
        impl io::Write for BrokenSink {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut channel = mock_channel(vec![Some(b"x".to_vec())], vec![]);
        let mut console = ScriptedConsole::new(vec![Wake::Serial], vec![]);

        let end = relay(&mut channel, &mut console, &mut BrokenSink);

        assert_eq!(end, RelayEnd::ChannelClosed);
    }
}
