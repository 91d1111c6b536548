//! Events for the kernel transfer protocol state machine.
//!
//! This modules is private and restricted to the
//! [`boot_protocol`](crate::boot_protocol) scope. The public interface of the
//! transfer state machine is provided by
//! [`boot_protocol`](crate::boot_protocol).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.
//!
//! Advancing events own the serial channel and the kernel image: the origin
//! state gives them up and the target state receives them, so exactly one
//! state holds the port at any time.

use crate::channel::SerialChannel;
use crate::settings::Settings;
use crate::utils::kernel::KernelImage;

use super::errors::TransferError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// HandshakeSentEvent ==========================================================

/// Fired by the `Idle` state once the `kernel` handshake line is on the wire
/// and the settle delay has elapsed. Transitions to [`HandshakeSentState`].
///
/// [`HandshakeSentState`]: super::states::HandshakeSentState
#[derive(Debug)]
pub(crate) struct HandshakeSentEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
    pub image: KernelImage,
}

// SizeSentEvent ===============================================================

/// Fired once the image size has been announced as a wire integer.
/// Transitions to [`SizeSentState`], which waits for the device to echo it.
///
/// [`SizeSentState`]: super::states::SizeSentState
#[derive(Debug)]
pub(crate) struct SizeSentEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
    pub image: KernelImage,
}

// SizeConfirmedEvent ==========================================================

/// Fired when the device echoed exactly the announced size. Transitions to
/// [`SizeConfirmedState`].
///
/// [`SizeConfirmedState`]: super::states::SizeConfirmedState
#[derive(Debug)]
pub(crate) struct SizeConfirmedEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
    pub image: KernelImage,
}

// ModeSentEvent ===============================================================

/// Fired once the transfer mode word (bulk or debug) is on the wire.
/// Transitions to [`ModeSentState`], which pushes the image body.
///
/// [`ModeSentState`]: super::states::ModeSentState
#[derive(Debug)]
pub(crate) struct ModeSentEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
    pub image: KernelImage,
}

// BodySentEvent ===============================================================

/// Fired when the complete image body has been pushed (and, in debug mode,
/// every byte echo verified). Transitions to [`BodySentState`], which waits
/// for the device checksum.
///
/// [`BodySentState`]: super::states::BodySentState
#[derive(Debug)]
pub(crate) struct BodySentEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
    pub image: KernelImage,
}

// ChecksumVerifiedEvent =======================================================

/// Fired when the checksum reported by the device matches the one computed
/// locally before the push. The image has served its purpose and stays
/// behind; only the channel moves on. Transitions to
/// [`ChecksumVerifiedState`], which waits for the final confirmation line.
///
/// [`ChecksumVerifiedState`]: super::states::ChecksumVerifiedState
#[derive(Debug)]
pub(crate) struct ChecksumVerifiedEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
}

// DoneEvent ===================================================================

/// Fired when the device confirmed the copy with its `Done` line. The
/// channel is handed back to the caller through the terminal `Done` state.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    pub channel: SerialChannel,
}

// FailEvent ===================================================================

/// Fired from any state when the transfer cannot continue: a transport
/// failure, or a device answer that violates the protocol. The channel is
/// dropped with the origin state; only the error survives.
#[derive(Debug)]
pub(crate) struct FailEvent {
    pub settings: Settings,
    pub error: TransferError,
}

// Events enum =================================================================

/// Events that can be triggered within the kernel transfer protocol state
/// machine.
///
/// Each possible value holds an `event`, which in turn may hold additional
/// data for the state transition. Such data is passed by the origin state for
/// potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    HandshakeSent(HandshakeSentEvent),
    SizeSent(SizeSentEvent),
    SizeConfirmed(SizeConfirmedEvent),
    ModeSent(ModeSentEvent),
    BodySent(BodySentEvent),
    ChecksumVerified(ChecksumVerifiedEvent),
    Done(DoneEvent),
    Fail(FailEvent),
}
