//! States for the kernel transfer protocol state machine.
//!
//! This modules is private and restricted to the
//! [`boot_protocol`](crate::boot_protocol) scope. The public interface of the
//! transfer state machine is provided by
//! [`boot_protocol`](crate::boot_protocol).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::thread;

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, trace};

use super::errors::{ProtocolViolation, TransferError};
use super::events::*;

use crate::channel::SerialChannel;
use crate::settings::Settings;
use crate::utils::kernel::KernelImage;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// First word of the conversation: announces to the bootloader that a kernel
/// push follows.
pub(super) const HANDSHAKE_LINE: &str = "kernel";

/// Wire encodings of the two transfer modes.
pub(super) const MODE_BULK: u64 = 0;
pub(super) const MODE_DEBUG: u64 = 1;

/// Prefix of the confirmation line the bootloader prints after a good copy.
pub(super) const CONFIRMATION_PREFIX: &str = "Done";

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests a transition to a `new state` by returning the
    /// appropriate `event`. The `state` and the `event` are consumed to create
    /// the `new state` using the corresponding [`From`] trait implementation
    /// (provided such implementation exists).
    fn run(&mut self, settings: &Settings) -> Event;
}

// Idle State ==================================================================

/// The initial state of the transfer machine: the channel is open, nothing is
/// on the wire yet.
///
/// From the `IdleState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`HandshakeSentEvent`] => [`HandshakeSentState`]** after the `kernel`
///    handshake line went out and the settle delay elapsed,
///  * **[`FailEvent`] => `Failed`** when the channel refuses the handshake.
#[derive(Debug)]
pub(crate) struct IdleState {
    /// The serial channel, already open. Consumed and moved with the events.
    pub channel: Option<SerialChannel>,
    /// The kernel image to push. Consumed and moved with the events.
    pub image: Option<KernelImage>,
}
impl Runnable for IdleState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> Idle");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            if let Err(error) = channel.send_line(HANDSHAKE_LINE) {
                return fail(settings, error);
            }
            settle(settings);

            return Event::HandshakeSent(HandshakeSentEvent {
                settings: settings.clone(),
                channel,
                image,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// HandshakeSent State =========================================================

/// The handshake is out; the device expects the image size next.
///
///  * **[`SizeSentEvent`] => [`SizeSentState`]** after the size went out as a
///    4-byte wire integer and the settle delay elapsed,
///  * **[`FailEvent`] => `Failed`** on a channel failure (an image larger
///    than the wire integer allows surfaces here as a range error).
#[derive(Debug)]
pub(crate) struct HandshakeSentState {
    pub channel: Option<SerialChannel>,
    pub image: Option<KernelImage>,
}
impl Runnable for HandshakeSentState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> HandshakeSent");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            if let Err(error) = channel.send_int(image.size()) {
                return fail(settings, error);
            }
            settle(settings);

            return Event::SizeSent(SizeSentEvent {
                settings: settings.clone(),
                channel,
                image,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// SizeSent State ==============================================================

/// The size announcement is out; the device proves it heard the right number
/// by echoing it back.
///
///  * **[`SizeConfirmedEvent`] => [`SizeConfirmedState`]** when the echoed
///    size matches the announced one,
///  * **[`FailEvent`] => `Failed`** with
///    [`ProtocolViolation::SizeMismatch`] on a different echo (nothing more
///    is sent), or on a channel failure.
#[derive(Debug)]
pub(crate) struct SizeSentState {
    pub channel: Option<SerialChannel>,
    pub image: Option<KernelImage>,
}
impl Runnable for SizeSentState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> SizeSent");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            let expected = image.size() as u32;
            let actual = match channel.read_int() {
                Ok(value) => value,
                Err(error) => return fail(settings, error),
            };
            if actual != expected {
                return fail(
                    settings,
                    ProtocolViolation::SizeMismatch { expected, actual },
                );
            }
            trace!("device confirmed kernel size {}", actual);

            return Event::SizeConfirmed(SizeConfirmedEvent {
                settings: settings.clone(),
                channel,
                image,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// SizeConfirmed State =========================================================

/// Both sides agree on the size; the device is told how the body will come.
///
///  * **[`ModeSentEvent`] => [`ModeSentState`]** after the mode word (bulk or
///    debug) went out,
///  * **[`FailEvent`] => `Failed`** on a channel failure.
#[derive(Debug)]
pub(crate) struct SizeConfirmedState {
    pub channel: Option<SerialChannel>,
    pub image: Option<KernelImage>,
}
impl Runnable for SizeConfirmedState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> SizeConfirmed");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            let mode = if settings.debug_mode {
                MODE_DEBUG
            } else {
                MODE_BULK
            };
            if let Err(error) = channel.send_int(mode) {
                return fail(settings, error);
            }

            return Event::ModeSent(ModeSentEvent {
                settings: settings.clone(),
                channel,
                image,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// ModeSent State ==============================================================

/// The device knows what is coming; push the image body.
///
/// In bulk mode the whole image goes out in a single channel call. In debug
/// mode each byte goes out alone and must come back as an echo before the
/// next one is sent, with a progress bar tracking the byte index.
///
///  * **[`BodySentEvent`] => [`BodySentState`]** when the complete body is
///    out (and echo-verified in debug mode),
///  * **[`FailEvent`] => `Failed`** with
///    [`ProtocolViolation::ByteMismatch`] on a wrong echo (no byte past the
///    failing index is sent), or on a channel failure.
#[derive(Debug)]
pub(crate) struct ModeSentState {
    pub channel: Option<SerialChannel>,
    pub image: Option<KernelImage>,
}
impl Runnable for ModeSentState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> ModeSent");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            if settings.debug_mode {
                if let Err(event) = push_debug(&mut channel, &image, settings) {
                    return event;
                }
            } else if let Err(error) = channel.send_bytes(image.bytes()) {
                return fail(settings, error);
            }
            settle(settings);

            return Event::BodySent(BodySentEvent {
                settings: settings.clone(),
                channel,
                image,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// BodySent State ==============================================================

/// The body is on the wire; the device reports the checksum it computed over
/// what it received.
///
///  * **[`ChecksumVerifiedEvent`] => [`ChecksumVerifiedState`]** when the
///    device checksum matches the locally computed one,
///  * **[`FailEvent`] => `Failed`** with
///    [`ProtocolViolation::ChecksumMismatch`] otherwise (decided before any
///    confirmation line is read), or on a channel failure.
#[derive(Debug)]
pub(crate) struct BodySentState {
    pub channel: Option<SerialChannel>,
    pub image: Option<KernelImage>,
}
impl Runnable for BodySentState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> BodySent");

        if let (Some(mut channel), Some(image)) = (self.channel.take(), self.image.take()) {
            let expected = image.checksum();
            let actual = match channel.read_int() {
                Ok(value) => value,
                Err(error) => return fail(settings, error),
            };
            if actual != expected {
                return fail(
                    settings,
                    ProtocolViolation::ChecksumMismatch { expected, actual },
                );
            }
            trace!("device checksum {} matches", actual);

            return Event::ChecksumVerified(ChecksumVerifiedEvent {
                settings: settings.clone(),
                channel,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// ChecksumVerified State ======================================================

/// The checksums agree; all that is left is the bootloader's own word that it
/// copied the kernel where it belongs.
///
///  * **[`DoneEvent`] => `Done`** when the device line starts with `Done`,
///  * **[`FailEvent`] => `Failed`** with
///    [`ProtocolViolation::ConfirmationMissing`] on any other line, or on a
///    channel failure.
#[derive(Debug)]
pub(crate) struct ChecksumVerifiedState {
    pub channel: Option<SerialChannel>,
}
impl Runnable for ChecksumVerifiedState {
    fn run(&mut self, settings: &Settings) -> Event {
        info!("=> ChecksumVerified");

        if let Some(mut channel) = self.channel.take() {
            let line = match channel.read_line() {
                Ok(line) => line,
                Err(error) => return fail(settings, error),
            };
            if !line.starts_with(CONFIRMATION_PREFIX) {
                return fail(settings, ProtocolViolation::ConfirmationMissing(line));
            }
            info!("device confirmed: {}", line.trim_end());

            return Event::Done(DoneEvent {
                settings: settings.clone(),
                channel,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// Done State ==================================================================

/// Terminal state of a successful transfer. Holds the channel so the caller
/// can reclaim it for the interactive session.
#[derive(Debug)]
pub(crate) struct DoneState {
    pub channel: Option<SerialChannel>,
}

// Failed State ================================================================

/// Terminal state of a failed transfer. The channel died with the failing
/// state; only the error is kept, for the caller to report.
#[derive(Debug)]
pub(crate) struct FailedState {
    pub error: Option<TransferError>,
}

// =============================================================================
// Private stuff
// =============================================================================

/// Blind wait between protocol steps. The bootloader offers no ready signal
/// to poll for, so the delay is a fixed settings value.
fn settle(settings: &Settings) {
    thread::sleep(settings.settle_delay);
}

fn fail(settings: &Settings, error: impl Into<TransferError>) -> Event {
    Event::Fail(FailEvent {
        settings: settings.clone(),
        error: error.into(),
    })
}

/// Byte-by-byte push with echo verification. `Err` carries the ready-made
/// `Fail` event so the caller can return it as-is.
fn push_debug(
    channel: &mut SerialChannel,
    image: &KernelImage,
    settings: &Settings,
) -> Result<(), Event> {
    let pb = ProgressBar::new(image.size());
    pb.set_style(ProgressStyle::default_bar()
        .template("[UB] ⏩ Pushing [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .progress_chars("=>-"));

    for (index, &byte) in image.bytes().iter().enumerate() {
        if let Err(error) = channel.send_bytes(&[byte]) {
            pb.abandon();
            return Err(fail(settings, error));
        }
        let received = match channel.read(1) {
            Ok(echo) => echo[0],
            Err(error) => {
                pb.abandon();
                return Err(fail(settings, error));
            }
        };
        if received != byte {
            pb.abandon();
            return Err(fail(
                settings,
                ProtocolViolation::ByteMismatch {
                    index,
                    sent: byte,
                    received,
                },
            ));
        }
        trace!("byte {} echoed back correctly", index);
        pb.set_position(index as u64 + 1);
    }
    pb.finish_with_message("[UB] Kernel pushed");

    Ok(())
}
