//! Failure taxonomy for the kernel transfer.
//!
//! This modules is private and restricted to the
//! [`boot_protocol`](crate::boot_protocol) scope; the error types themselves
//! are re-exported from there.

use thiserror::Error;

use crate::channel::ChannelError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// The device answered, but with something the boot protocol does not allow.
///
/// Every variant carries both sides of the disagreement, so the report names
/// what was expected and what actually arrived.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// The size echoed by the device differs from the size announced.
    #[error("announced a {expected} byte kernel but the device confirmed {actual}")]
    SizeMismatch { expected: u32, actual: u32 },

    /// In the byte-by-byte debug mode, the device echoed a different byte
    /// than the one just sent.
    #[error("sent {sent:#04x} as byte {index} but the device echoed {received:#04x}")]
    ByteMismatch {
        index: usize,
        sent: u8,
        received: u8,
    },

    /// The checksum the device computed over the received image differs from
    /// the one computed locally before the push.
    #[error("kernel checksum is {expected} but the device computed {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The final line from the device did not carry the `Done` confirmation.
    /// The offending line is kept verbatim for the report.
    #[error("expected a `Done` confirmation but the device sent {0:?}")]
    ConfirmationMissing(String),
}

/// Why a kernel transfer failed.
///
/// Transfers are fail-fast: the first error of either kind aborts the session
/// and no retry is attempted at this level.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The serial channel itself failed, or refused the data it was given.
    #[error("channel failure during transfer: {0}")]
    Channel(#[from] ChannelError),

    /// The channel worked but the device broke the protocol contract.
    #[error("boot protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}
