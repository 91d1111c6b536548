//! Framing primitives over the serial link.
//!
//! [`SerialChannel`](crate::channel::SerialChannel) owns the port handle and
//! is the only place in the crate that touches it. Everything the boot
//! protocol and the interactive session need goes through its line, integer
//! and raw-byte operations.
//!
//! The channel is seamed over the narrow [`SerialLink`] trait so that the
//! protocol state machine and the relay loop can be driven against a scripted
//! link in unit tests, with no hardware on the other end.
//!
//! Wire conventions, fixed by the device firmware:
//!
//! - integers are exactly 4 bytes, big-endian, unsigned;
//! - text lines are ASCII and end with a newline;
//! - outbound text must be ASCII, inbound text is decoded leniently (a
//!   half-booted board spewing garbage renders as U+FFFD instead of taking
//!   the session down).

use std::cmp::min;
use std::fmt;
use std::io;

use hexplay::HexViewBuilder;
use log::{log_enabled, trace, Level::Debug};
use thiserror::Error;

use crate::settings::Settings;
use crate::utils::ports;

/// Upper bound on the bytes drained from the port in one call.
const DRAIN_CAP: usize = 4096;

// =============================================================================
// Public Interface
// =============================================================================

/// Errors produced by the channel primitives.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying serial transport failed. Not recoverable within a
    /// session; whoever sees this tears the session down.
    #[error("serial transport failure: {0}")]
    Transport(#[from] io::Error),

    /// Caller asked to transmit text outside the ASCII range the wire format
    /// mandates.
    #[error("text is not ASCII and cannot go on the wire: {text:?}")]
    Encoding { text: String },

    /// Caller asked to encode an integer that does not fit in the 4-byte
    /// unsigned wire representation.
    #[error("value {value} does not fit in an unsigned 32-bit wire integer")]
    Range { value: u64 },
}

impl From<serialport::Error> for ChannelError {
    fn from(err: serialport::Error) -> Self {
        ChannelError::Transport(io::Error::new(io::ErrorKind::Other, err))
    }
}

/// The serial channel to the device being bootstrapped.
///
/// Created with [`SerialChannel::open`] from the [`Settings`]; moved between
/// the protocol states and the interactive session, and dropped to release
/// the port.
pub struct SerialChannel {
    path: String,
    baud_rate: u32,
    link: Box<dyn SerialLink>,
}

impl SerialChannel {
    /// Open and configure the serial port described by the settings, retrying
    /// a few times while the device enumerates, and wrap it in a channel.
    pub fn open(settings: &Settings) -> Result<SerialChannel, ChannelError> {
        let port = ports::open_port(settings)?;
        Ok(SerialChannel {
            path: settings.path.clone().unwrap_or_default(),
            baud_rate: settings.baud_rate,
            link: Box::new(SystemSerialLink { port }),
        })
    }

    /// Write all of `data` to the device and flush it out. Returns the number
    /// of bytes written.
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        self.link.write_all(data)?;
        trace!("{} bytes written to the channel", data.len());
        Ok(data.len())
    }

    /// Send an ASCII text line, appending the terminating newline if `text`
    /// does not already end with one.
    pub fn send_line(&mut self, text: &str) -> Result<usize, ChannelError> {
        if !text.is_ascii() {
            return Err(ChannelError::Encoding { text: text.to_owned() });
        }
        if text.ends_with('\n') {
            self.send_bytes(text.as_bytes())
        } else {
            let mut line = String::with_capacity(text.len() + 1);
            line.push_str(text);
            line.push('\n');
            self.send_bytes(line.as_bytes())
        }
    }

    /// Encode `value` as the 4-byte big-endian unsigned wire integer and send
    /// it. Values above `u32::MAX` do not fit and are rejected; negative
    /// values are unrepresentable by type.
    pub fn send_int(&mut self, value: u64) -> Result<usize, ChannelError> {
        if value > u64::from(u32::MAX) {
            return Err(ChannelError::Range { value });
        }
        self.send_bytes(&(value as u32).to_be_bytes())
    }

    /// One blocking read of up to `max_len` bytes, bounded by the configured
    /// read timeout. Returns as soon as any data arrives, so the result may
    /// be shorter than `max_len`.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0_u8; max_len];
        let n = self.link.read(&mut buf)?;
        if n == 0 {
            return Err(closed_channel().into());
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Drain whatever the device has already sent, without blocking, and
    /// decode it leniently as text.
    pub fn read_buffer(&mut self) -> Result<String, ChannelError> {
        let raw = self.drain()?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Blocking read up to and including the next newline, decoded leniently
    /// as text.
    pub fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_exact(1)?[0];
            line.push(byte);
            if byte == b'\n' {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Blocking read of exactly 4 bytes, decoded as the big-endian unsigned
    /// wire integer.
    pub fn read_int(&mut self) -> Result<u32, ChannelError> {
        let word = self.read_exact(4)?;
        Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
    }

    // =========================================================================
    // Crate-Public Interface
    // =========================================================================

    /// How many bytes the device has sent that we have not read yet. The
    /// readiness probe for the interactive session.
    pub(crate) fn bytes_to_read(&mut self) -> Result<usize, ChannelError> {
        Ok(self.link.bytes_to_read()?)
    }

    /// Drain the currently buffered bytes, raw. Capped at 4 KiB per call; a
    /// caller that polls readiness will immediately come back for the rest.
    pub(crate) fn drain(&mut self) -> Result<Vec<u8>, ChannelError> {
        let available = min(self.link.bytes_to_read()?, DRAIN_CAP);
        if available == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0_u8; available];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.link.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        trace!("{} bytes drained from the channel", filled);
        if log_enabled!(Debug) {
            let view = HexViewBuilder::new(&buf)
                .address_offset(0)
                .row_width(16)
                .finish();
            println!("{}", view);
        }
        Ok(buf)
    }

    /// Blocking read of exactly `n` bytes, looping over partial arrivals. A
    /// read that yields nothing before the timeout is a transport failure.
    pub(crate) fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ChannelError> {
        let mut buf = vec![0_u8; n];
        let mut filled = 0;
        while filled < n {
            let got = self.link.read(&mut buf[filled..])?;
            if got == 0 {
                return Err(closed_channel().into());
            }
            filled += got;
        }
        Ok(buf)
    }

    #[cfg(test)]
    pub(crate) fn with_link(link: Box<dyn SerialLink>) -> SerialChannel {
        SerialChannel {
            path: "mock".to_owned(),
            baud_rate: 0,
            link,
        }
    }
}

impl fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialChannel")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .finish()
    }
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The few port operations the channel actually needs. Production code wraps
/// the real port; tests substitute a scripted link.
pub(crate) trait SerialLink: Send {
    /// Write the whole buffer and flush it to the wire.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read into `buf`, blocking up to the port's configured timeout.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes already received and waiting in the port's input buffer.
    fn bytes_to_read(&mut self) -> io::Result<usize>;
}

// =============================================================================
// Private stuff
// =============================================================================

fn closed_channel() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "serial channel closed")
}

struct SystemSerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SystemSerialLink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) use mock::MockSerialLink;

#[cfg(test)]
mod mock {
    use super::SerialLink;
    use std::collections::VecDeque;
    use std::io;

    /// Scripted serial link. Each entry in `reads` is one batch of bytes
    /// "arriving" from the device; a `None` entry is a scripted transport
    /// fault, reported (and consumed) by the next read or readiness probe.
    /// An exhausted script times out, like a silent device.
    ///
    /// On drop the mock asserts that the whole script was consumed and that
    /// everything written to it matches `expected_writes` byte for byte.
    pub(crate) struct MockSerialLink {
        reads: VecDeque<Option<Vec<u8>>>,
        write_log: Vec<u8>,
        expected_writes: Vec<u8>,
    }

    impl MockSerialLink {
        pub(crate) fn new(
            reads: Vec<Option<Vec<u8>>>,
            expected_writes: Vec<u8>,
        ) -> Self {
            MockSerialLink {
                reads: reads.into(),
                write_log: Vec::new(),
                expected_writes,
            }
        }
    }

    impl SerialLink for MockSerialLink {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.write_log.extend_from_slice(data);
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.front_mut() {
                None => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "scripted link has nothing more to say",
                )),
                Some(None) => {
                    self.reads.pop_front();
                    Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "scripted transport fault",
                    ))
                }
                Some(Some(chunk)) => {
                    // One batch per read call: partial arrivals stay modeled.
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        self.reads.pop_front();
                    }
                    Ok(n)
                }
            }
        }

        fn bytes_to_read(&mut self) -> io::Result<usize> {
            match self.reads.front() {
                None => Ok(0),
                Some(None) => {
                    self.reads.pop_front();
                    Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "scripted transport fault",
                    ))
                }
                Some(Some(chunk)) => Ok(chunk.len()),
            }
        }
    }

    impl Drop for MockSerialLink {
        fn drop(&mut self) {
            assert!(
                self.reads.is_empty(),
                "MockSerialLink dropped with {} unconsumed scripted reads",
                self.reads.len()
            );
            assert_eq!(
                &self.write_log, &self.expected_writes,
                "MockSerialLink write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
                self.expected_writes.len(),
                self.expected_writes,
                self.write_log.len(),
                self.write_log
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> SerialChannel {
        SerialChannel::with_link(Box::new(MockSerialLink::new(reads, expected_writes)))
    }

    #[test]
    fn send_line_appends_newline() {
        let mut ch = channel(vec![], b"hello\n".to_vec());
        let written = ch.send_line("hello").unwrap();
        assert_eq!(written, 6);
    }

    #[test]
    fn send_line_keeps_existing_newline() {
        let mut ch = channel(vec![], b"hello\n".to_vec());
        let written = ch.send_line("hello\n").unwrap();
        assert_eq!(written, 6);
    }

    #[test]
    fn send_line_rejects_non_ascii() {
        let mut ch = channel(vec![], vec![]);
        match ch.send_line("héllo") {
            Err(ChannelError::Encoding { text }) => assert_eq!(text, "héllo"),
            other => panic!("expected an encoding error, got {:?}", other),
        }
    }

    #[test]
    fn send_int_encodes_big_endian() {
        let mut ch = channel(
            vec![],
            vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00, 0x00, 0x00],
        );
        ch.send_int(0xDEAD_BEEF).unwrap();
        ch.send_int(0).unwrap();
    }

    #[test]
    fn send_int_rejects_values_above_u32() {
        let mut ch = channel(vec![], vec![]);
        let too_big = u64::from(u32::MAX) + 1;
        match ch.send_int(too_big) {
            Err(ChannelError::Range { value }) => assert_eq!(value, too_big),
            other => panic!("expected a range error, got {:?}", other),
        }
    }

    #[test]
    fn int_round_trip() {
        for &value in &[0_u32, 1, 255, 256, 0x1234_5678, u32::MAX] {
            let encoded = value.to_be_bytes().to_vec();

            let mut tx = channel(vec![], encoded.clone());
            tx.send_int(u64::from(value)).unwrap();

            let mut rx = channel(vec![Some(encoded)], vec![]);
            assert_eq!(rx.read_int().unwrap(), value);
        }
    }

    #[test]
    fn read_int_collects_partial_arrivals() {
        // The 4 bytes arrive in two batches.
        let mut ch = channel(
            vec![Some(vec![0x00, 0x01]), Some(vec![0x02, 0x03])],
            vec![],
        );
        assert_eq!(ch.read_int().unwrap(), 0x0001_0203);
    }

    #[test]
    fn read_int_fails_when_the_device_goes_silent() {
        let mut ch = channel(vec![Some(vec![0x00, 0x01])], vec![]);
        match ch.read_int() {
            Err(ChannelError::Transport(_)) => {}
            other => panic!("expected a transport error, got {:?}", other),
        }
    }

    #[test]
    fn read_line_reads_through_newline() {
        let mut ch = channel(vec![Some(b"Done copying kernel\r\n".to_vec())], vec![]);
        let line = ch.read_line().unwrap();
        assert_eq!(line, "Done copying kernel\r\n");
        assert!(line.starts_with("Done"));
    }

    #[test]
    fn read_buffer_drains_available_bytes() {
        let mut ch = channel(vec![Some(b"boot: hello".to_vec())], vec![]);
        assert_eq!(ch.read_buffer().unwrap(), "boot: hello");
        // Nothing buffered any more: an empty drain, not a blocking read.
        assert_eq!(ch.read_buffer().unwrap(), "");
    }

    #[test]
    fn read_buffer_decodes_leniently() {
        let mut ch = channel(vec![Some(vec![b'H', 0xFF, b'i'])], vec![]);
        assert_eq!(ch.read_buffer().unwrap(), "H\u{FFFD}i");
    }

    #[test]
    fn read_returns_what_has_arrived() {
        let mut ch = channel(vec![Some(vec![1, 2])], vec![]);
        assert_eq!(ch.read(4).unwrap(), vec![1, 2]);
    }
}
