//! The kernel transfer protocol state machine.
//!
//! Drives one push of a kernel image over an already opened
//! [`SerialChannel`](crate::channel::SerialChannel): handshake, size
//! announcement and confirmation, transfer mode, image body, checksum
//! verification and the final confirmation line from the bootloader. The
//! protocol is fail-fast; the first violation or transport failure aborts the
//! session with a typed [`TransferError`].
//!
//! **Example** - Importing the public interfaces through boot_protocol:
//! ```ignore
//! use crate::{
//!     boot_protocol::{self as bpsm},
//!     settings::Settings,
//! };
//! ```
//!
//! **Example** - Pushing a kernel:
//! ```ignore
//! let mut transfer = bpsm::factory(settings, channel, image);
//! match transfer.run() {
//!     Ok(channel) => { /* channel handed back for the interactive session */ }
//!     Err(error) => { /* fail-fast, the channel is gone */ }
//! }
//! ```

mod errors;
mod events;
mod state_machine;
mod states;

pub use errors::{ProtocolViolation, TransferError};
pub use state_machine::{factory, KernelTransfer};
