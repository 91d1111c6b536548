//! The kernel transfer protocol state machine.
//!
//! One successful push walks the states in a straight line; the first thing
//! that goes wrong ends the session in `Failed` from wherever it happened:
//!
//! ```text
//! Idle -> HandshakeSent -> SizeSent -> SizeConfirmed -> ModeSent
//!                                                          |
//!              Done <- ChecksumVerified <- BodySent <------+
//!
//!   (any state) --Fail--> Failed
//! ```
//!
//! The machine owns the serial channel and the kernel image for the duration
//! of the push; the channel comes back out of a successful run so the caller
//! can keep talking to the freshly booted kernel.

use super::errors::TransferError;
use super::events::*;
use super::states::*;
use crate::channel::SerialChannel;
use crate::settings::Settings;
use crate::utils::kernel::KernelImage;

// =============================================================================
// Public Interface
// =============================================================================

/// Represents one kernel transfer over an open serial channel. Use the
/// `factory()` function to get an instance then run it by calling its `run()`
/// method.
pub struct KernelTransfer {
    sm: TransferStates,
}
impl KernelTransfer {
    /// The transfer state machine event loop runs until a terminal state is
    /// reached: `Done` hands the serial channel back for further use,
    /// `Failed` reports why the push was aborted. A transfer is single-shot;
    /// the machine cannot be run again.
    pub fn run(&mut self) -> Result<SerialChannel, TransferError> {
        loop {
            self.sm = self.sm.step();
            match &mut self.sm {
                TransferStates::Done(sm) => {
                    return match sm.state.channel.take() {
                        Some(channel) => Ok(channel),
                        None => unreachable!("the Done state always holds the channel"),
                    };
                }
                TransferStates::Failed(sm) => {
                    return match sm.state.error.take() {
                        Some(error) => Err(error),
                        None => unreachable!("the Failed state always holds the error"),
                    };
                }
                _ => {}
            }
        }
    }
}

/// Factory function for the kernel transfer state machine. The channel must
/// already be open and settled; the image is fully loaded, its checksum
/// computed before the first byte goes out.
pub fn factory(settings: Settings, channel: SerialChannel, image: KernelImage) -> KernelTransfer {
    KernelTransfer {
        // The machine naturally starts in the `Idle` state.
        sm: TransferStates::Idle(TransferSM::new(settings, channel, image)),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw state machine implementing the kernel transfer protocol.
///
/// This is a private interface, abstracted for a simpler and more intuitive
/// use in the public `KernelTransfer` interface.
///
/// Note that using a generic type that holds the current state serves two
/// purposes. It allows for also having shared data by all states that is not
/// really part of state data (e.g. state machine parameters, statistics,
/// etc...). Additionally, it's nicer when debugging to see the state machine
/// and the current state it is holding at any time.
// No `Runnable` bound here: the terminal `Done` and `Failed` states are
// only ever unwrapped, never stepped.
#[derive(Debug)]
struct TransferSM<S> {
    settings: Settings,
    state: S,
}
impl<S: Runnable> TransferSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings)
    }
}

/// The state machine starts in the `IdleState`, owning the channel and the
/// image.
impl TransferSM<IdleState> {
    fn new(settings: Settings, channel: SerialChannel, image: KernelImage) -> Self {
        TransferSM {
            settings,
            state: IdleState {
                channel: Some(channel),
                image: Some(image),
            },
        }
    }
}

/// An enum wrapper around the states of the transfer state machine. It
/// provides a simpler and more intuitive model for manipulating states and
/// their transitions.
enum TransferStates {
    Idle(TransferSM<IdleState>),
    HandshakeSent(TransferSM<HandshakeSentState>),
    SizeSent(TransferSM<SizeSentState>),
    SizeConfirmed(TransferSM<SizeConfirmedState>),
    ModeSent(TransferSM<ModeSentState>),
    BodySent(TransferSM<BodySentState>),
    ChecksumVerified(TransferSM<ChecksumVerifiedState>),
    Done(TransferSM<DoneState>),
    Failed(TransferSM<FailedState>),
}
impl TransferStates {
    /// The unit of work in the state machine event loop. It checks the current
    /// state and the current event and decides the next transition. State
    /// transitions from events are implemented using the rust `From`/`Into`
    /// pattern. Most of the potential errors of state/event/transition
    /// mismatches can be caught at compile time.
    fn step(&mut self) -> Self {
        match self {
            TransferStates::Idle(sm) => {
                let event = sm.run();
                match event {
                    Event::HandshakeSent(ev) => TransferStates::HandshakeSent(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::HandshakeSent(sm) => {
                let event = sm.run();
                match event {
                    Event::SizeSent(ev) => TransferStates::SizeSent(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::SizeSent(sm) => {
                let event = sm.run();
                match event {
                    Event::SizeConfirmed(ev) => TransferStates::SizeConfirmed(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::SizeConfirmed(sm) => {
                let event = sm.run();
                match event {
                    Event::ModeSent(ev) => TransferStates::ModeSent(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::ModeSent(sm) => {
                let event = sm.run();
                match event {
                    Event::BodySent(ev) => TransferStates::BodySent(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::BodySent(sm) => {
                let event = sm.run();
                match event {
                    Event::ChecksumVerified(ev) => TransferStates::ChecksumVerified(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::ChecksumVerified(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => TransferStates::Done(ev.into()),
                    Event::Fail(ev) => TransferStates::Failed(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            TransferStates::Done(_) | TransferStates::Failed(_) => {
                unreachable!("stepping a transfer that has already completed")
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<HandshakeSentEvent> for TransferSM<HandshakeSentState> {
    fn from(event: HandshakeSentEvent) -> TransferSM<HandshakeSentState> {
        TransferSM {
            settings: event.settings,
            state: HandshakeSentState {
                channel: Some(event.channel),
                image: Some(event.image),
            },
        }
    }
}

impl From<SizeSentEvent> for TransferSM<SizeSentState> {
    fn from(event: SizeSentEvent) -> TransferSM<SizeSentState> {
        TransferSM {
            settings: event.settings,
            state: SizeSentState {
                channel: Some(event.channel),
                image: Some(event.image),
            },
        }
    }
}

impl From<SizeConfirmedEvent> for TransferSM<SizeConfirmedState> {
    fn from(event: SizeConfirmedEvent) -> TransferSM<SizeConfirmedState> {
        TransferSM {
            settings: event.settings,
            state: SizeConfirmedState {
                channel: Some(event.channel),
                image: Some(event.image),
            },
        }
    }
}

impl From<ModeSentEvent> for TransferSM<ModeSentState> {
    fn from(event: ModeSentEvent) -> TransferSM<ModeSentState> {
        TransferSM {
            settings: event.settings,
            state: ModeSentState {
                channel: Some(event.channel),
                image: Some(event.image),
            },
        }
    }
}

impl From<BodySentEvent> for TransferSM<BodySentState> {
    fn from(event: BodySentEvent) -> TransferSM<BodySentState> {
        TransferSM {
            settings: event.settings,
            state: BodySentState {
                channel: Some(event.channel),
                image: Some(event.image),
            },
        }
    }
}

impl From<ChecksumVerifiedEvent> for TransferSM<ChecksumVerifiedState> {
    fn from(event: ChecksumVerifiedEvent) -> TransferSM<ChecksumVerifiedState> {
        TransferSM {
            settings: event.settings,
            state: ChecksumVerifiedState {
                channel: Some(event.channel),
            },
        }
    }
}

impl From<DoneEvent> for TransferSM<DoneState> {
    fn from(event: DoneEvent) -> TransferSM<DoneState> {
        TransferSM {
            settings: event.settings,
            state: DoneState {
                channel: Some(event.channel),
            },
        }
    }
}

impl From<FailEvent> for TransferSM<FailedState> {
    fn from(event: FailEvent) -> TransferSM<FailedState> {
        TransferSM {
            settings: event.settings,
            state: FailedState {
                error: Some(event.error),
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::errors::ProtocolViolation;
    use super::*;
    use crate::channel::{ChannelError, MockSerialLink};
    use crate::settings::SettingsBuilder;

    fn test_settings(debug_mode: bool) -> Settings {
        SettingsBuilder::new()
            .settle_delay(Duration::from_millis(0))
            .debug_mode(debug_mode)
            .finalize()
    }

    /// Glue the expected wire fragments into one write log.
    fn wire(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    /// Run a full transfer of `image` against a scripted device. The mock
    /// panics on drop if the script was not fully consumed or anything
    /// unexpected was written.
    fn run_transfer(
        image: Vec<u8>,
        debug_mode: bool,
        reads: Vec<Option<Vec<u8>>>,
        expected_writes: Vec<u8>,
    ) -> Result<SerialChannel, TransferError> {
        let channel = SerialChannel::with_link(Box::new(MockSerialLink::new(
            reads,
            expected_writes,
        )));
        let image = KernelImage::from_bytes(image);
        let mut transfer = factory(test_settings(debug_mode), channel, image);
        transfer.run()
    }

    #[test]
    fn bulk_push_happy_path() {
        let reads = vec![
            Some(vec![0, 0, 0, 4]),                    // size echo
            Some(vec![0, 0, 0, 10]),                   // checksum of 1+2+3+4
            Some(b"Done copying kernel\r\n".to_vec()), // confirmation
        ];
        let expected_writes = wire(&[
            b"kernel\n",
            &[0, 0, 0, 4], // size
            &[0, 0, 0, 0], // bulk mode
            &[1, 2, 3, 4], // the image, in one block
        ]);

        let channel = run_transfer(vec![1, 2, 3, 4], false, reads, expected_writes)
            .expect("the push should succeed");
        // Dropping the channel makes the mock verify the full exchange.
        drop(channel);
    }

    #[test]
    fn debug_push_happy_path() {
        let reads = vec![
            Some(vec![0, 0, 0, 3]), // size echo
            Some(vec![1]),          // per-byte echoes
            Some(vec![2]),
            Some(vec![3]),
            Some(vec![0, 0, 0, 6]), // checksum of 1+2+3
            Some(b"Done copying kernel\r\n".to_vec()),
        ];
        let expected_writes = wire(&[
            b"kernel\n",
            &[0, 0, 0, 3], // size
            &[0, 0, 0, 1], // debug mode
            &[1, 2, 3],    // the image, byte by byte
        ]);

        run_transfer(vec![1, 2, 3], true, reads, expected_writes)
            .expect("the push should succeed");
    }

    #[test]
    fn empty_image_push() {
        let reads = vec![
            Some(vec![0, 0, 0, 0]),
            Some(vec![0, 0, 0, 0]),
            Some(b"Done copying kernel\r\n".to_vec()),
        ];
        let expected_writes = wire(&[b"kernel\n", &[0, 0, 0, 0], &[0, 0, 0, 0]]);

        run_transfer(Vec::new(), false, reads, expected_writes)
            .expect("an empty push should succeed");
    }

    #[test]
    fn size_mismatch_stops_the_push() {
        let reads = vec![Some(vec![0, 0, 0, 3])]; // wrong size echo
        // Nothing goes on the wire past the size announcement.
        let expected_writes = wire(&[b"kernel\n", &[0, 0, 0, 4]]);

        match run_transfer(vec![1, 2, 3, 4], false, reads, expected_writes) {
            Err(TransferError::Protocol(ProtocolViolation::SizeMismatch {
                expected,
                actual,
            })) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 3);
            }
            other => panic!("expected a size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn checksum_mismatch_fails_without_waiting_for_a_confirmation() {
        let reads = vec![
            Some(vec![0, 0, 0, 4]),
            Some(vec![0, 0, 0, 9]), // wrong checksum; no Done line scripted
        ];
        let expected_writes = wire(&[
            b"kernel\n",
            &[0, 0, 0, 4],
            &[0, 0, 0, 0],
            &[1, 2, 3, 4],
        ]);

        match run_transfer(vec![1, 2, 3, 4], false, reads, expected_writes) {
            Err(TransferError::Protocol(ProtocolViolation::ChecksumMismatch {
                expected,
                actual,
            })) => {
                assert_eq!(expected, 10);
                assert_eq!(actual, 9);
            }
            other => panic!("expected a checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn byte_echo_mismatch_stops_immediately() {
        let reads = vec![
            Some(vec![0, 0, 0, 4]),
            Some(vec![0x41]), // byte 0 echoes fine
            Some(vec![0x41]), // byte 1 echoes fine
            Some(vec![0x42]), // byte 2 comes back wrong
        ];
        // Bytes past the failing index never go on the wire.
        let expected_writes = wire(&[
            b"kernel\n",
            &[0, 0, 0, 4],
            &[0, 0, 0, 1],
            &[0x41, 0x41, 0x41],
        ]);

        match run_transfer(vec![0x41, 0x41, 0x41, 0x41], true, reads, expected_writes) {
            Err(TransferError::Protocol(ProtocolViolation::ByteMismatch {
                index,
                sent,
                received,
            })) => {
                assert_eq!(index, 2);
                assert_eq!(sent, 0x41);
                assert_eq!(received, 0x42);
            }
            other => panic!("expected a byte mismatch, got {:?}", other),
        }
    }

    #[test]
    fn missing_done_confirmation() {
        let reads = vec![
            Some(vec![0, 0, 0, 4]),
            Some(vec![0, 0, 0, 10]),
            Some(b"Error: copy failed\n".to_vec()),
        ];
        let expected_writes = wire(&[
            b"kernel\n",
            &[0, 0, 0, 4],
            &[0, 0, 0, 0],
            &[1, 2, 3, 4],
        ]);

        match run_transfer(vec![1, 2, 3, 4], false, reads, expected_writes) {
            Err(TransferError::Protocol(ProtocolViolation::ConfirmationMissing(line))) => {
                assert_eq!(line, "Error: copy failed\n");
            }
            other => panic!("expected a missing confirmation, got {:?}", other),
        }
    }

    #[test]
    fn silent_device_is_a_transport_failure() {
        // The device never echoes the size; the read times out.
        let reads = vec![];
        let expected_writes = wire(&[b"kernel\n", &[0, 0, 0, 4]]);

        match run_transfer(vec![1, 2, 3, 4], false, reads, expected_writes) {
            Err(TransferError::Channel(ChannelError::Transport(_))) => {}
            other => panic!("expected a transport failure, got {:?}", other),
        }
    }
}
