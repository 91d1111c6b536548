//! Events for the `uartboot` session state machine.
//!
//! This modules is private and restricted to the
//! [`session`](crate::session) scope. The public interface of the state
//! machine is provided by [`session`](crate::session).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.
//!
//! Every event carries the settings and the shared interrupt flag so the next
//! state machine instance can be rebuilt from the event alone. Events fired
//! after a successful connection additionally own the open serial channel.

use crate::channel::SerialChannel;
use crate::interactive::InterruptFlag;
use crate::settings::Settings;

// =============================================================================
// Crate-Public Interface
// =============================================================================

// WaitForPortEvent ============================================================

/// Event fired to trigger a transition to the `WaitForPort` state.
///
/// This event happens when a specific device path was provided in the
/// settings. Port selection is skipped and we just hold on until the port is
/// created (meaning the device is plugged).
#[derive(Debug)]
pub(crate) struct WaitForPortEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
}

// SelectPortEvent =============================================================

/// Event fired to trigger the transition to the `SelectPort` state.
///
/// This event can happen under one of the following circumstances:
///
///  1. If the program is started with no specific device path provided. In
///     such case, `uartboot` will immediately transition into the port
///     selection state from the initial state.
///  2. If the program was started with a specific device path provided, but
///     the device is not ready and `uartboot` is waiting for it, and the user
///     cancels the wait by pressing the `ESC` key. In such case, `uartboot`
///     transitions into the port selection state for the user to select a
///     device out of the available ones.
///  3. If the program is in the port selection state and the user decides to
///     not select any device (by hitting the `ESC` key) to refresh the list
///     and be presented with an updated list of connected devices.
#[derive(Debug)]
pub(crate) struct SelectPortEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
}

// PortReadyEvent ==============================================================

/// Event fired when we have a serial port with a valid device path on the
/// system. This would be the result of either the port we were waiting on has
/// come up or a port was selected from the list of detected ports.
///
/// This event can be fired from the `WaitForPort` or `SelectPort` states and
/// triggers a transition to the `Connect` state.
#[derive(Debug)]
pub(crate) struct PortReadyEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
}

// SendKernelEvent =============================================================

/// Event fired from the `Connect` state once the port is open and a kernel
/// image was named in the settings. Owns the channel the transfer will run
/// on and triggers a transition to the `Transfer` state.
#[derive(Debug)]
pub(crate) struct SendKernelEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
    pub channel: Option<SerialChannel>,
}

// InteractiveEvent ============================================================

/// Event fired when the session is ready to bridge the serial link to the
/// local terminal. It comes out of the `Connect` state when no kernel image
/// was requested, or out of the `Transfer` state after a verified push with
/// the `interactive` flag set.
#[derive(Debug)]
pub(crate) struct InteractiveEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
    pub channel: Option<SerialChannel>,
}

// DoneEvent ===================================================================

/// Event fired when the session completes and is about to terminate, whether
/// cleanly or because a phase failed. It triggers a transition to the `Done`
/// state.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
    pub with_errors: bool,
}

// ExitEvent ===================================================================

/// The last event that can be triggered in `uartboot` and will result in the
/// event loop terminating with an `exit status`, handing back the control to
/// the original caller that started the event loop.
///
/// The returned `status code` can be used as an exit code from the `main`
/// function.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub settings: Settings,
    pub interrupted: InterruptFlag,
    pub with_error: bool,
}

// Events enum =================================================================

/// Events that can be triggered within the session state machine of
/// `uartboot`.
///
/// Each possible value holds an `event`, which in turn may hold additional
/// data for the state transition. Such data is passed by the origin state for
/// potential use by the target state.
#[derive(Debug)]
pub(crate) enum Event {
    WaitForPort(WaitForPortEvent),
    SelectPort(SelectPortEvent),
    PortReady(PortReadyEvent),
    SendKernel(SendKernelEvent),
    Interactive(InteractiveEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
