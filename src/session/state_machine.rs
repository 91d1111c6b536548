//! Serial port device selection and session state management.
//!
//! `uartboot` operates over a serial port which can be specified at the
//! command line or can be selected out of the list of available ports on the
//! system. Due to the transient nature of the serial connection when devices
//! are plugged in or out, we need some flexibility in handling cases where
//! the port is not ready. Additionally, as multiple USB serial controllers
//! can be used (e.g. UART and JTAG) and can be removed and inserted in
//! different orders, the port names may change and we need flexibility to
//! re-select the port for `uartboot`.
//!
//! Once the port is open, the session runs its phases in a straight line:
//! push the kernel image when one was named, then bridge the serial link to
//! the local terminal when asked to. Each phase that cannot do its work sends
//! the session to `Done` with the error flag set; a Ctrl+C observed at a
//! phase boundary sends it to `Done` cleanly.
//!
//! The following state diagram summarizes the different states and
//! transitions the session goes through:
//!
//! ```text
//!                            START
//!                              |
//!                              v
//!                          .-------.
//!                          | Init  |
//!                          '-------'
//!                              |
//!                              v
//!                    no  .----------.  yes
//!                  .----( port path? )----.
//!      .-----.     |     '----------'     |
//!      |     |     v                      v
//!      |    .------------.    ESC   .-------------.
//!      '--->| SelectPort |<---------| WaitForPort |
//!           '------------'          '-------------'
//!                  |                      |
//!                  |      port ready      |
//!                  '-------.    .---------'
//!                          v    v
//!                       .---------.
//!                       | Connect |
//!                       '---------'
//!                  kernel |     | no kernel,
//!                         v     | interactive
//!                  .----------. |
//!                  | Transfer | |
//!                  '----------' |
//!                    |    |     v
//!                    |   .-------------.
//!                    |   | Interactive |
//!                    |   '-------------'
//!                    |          |
//!                    v          v
//!                  .--------------.
//!                  |     Done     |
//!                  '--------------'
//!                          |
//!                          v
//!                         END
//! ```

use super::events::*;
use super::states::*;
use crate::interactive::InterruptFlag;
use crate::settings::Settings;

// =============================================================================
// Public Interface
// =============================================================================

/// Represents one `uartboot` session, from port discovery to the end of the
/// interactive bridge. Use the `factory()` function to get an instance then
/// run it by calling its `run()` method.
pub struct BootSession {
    sm: SessionStates,
}
impl BootSession {
    /// The session event loop runs until the `Done` state is reached and its
    /// `should_exit` flag is set. At such point, the event loop terminates
    /// and returns an exit code indicating no errors when equal to **`0`**;
    /// otherwise a termination with error.
    ///
    /// The returned status code could be used as an exit code from `uartboot`.
    pub fn run(&mut self) -> i8 {
        loop {
            self.sm = self.sm.step();
            if let SessionStates::Done(sm) = &self.sm {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }
}

/// Factory function for the session state machine. The `interrupted` flag is
/// shared with the Ctrl+C handler; the session checks it at state boundaries
/// and hands it to the blocking phases so they can end early.
pub fn factory(settings: Settings, interrupted: InterruptFlag) -> BootSession {
    BootSession {
        // The session naturally starts in the `Init` state.
        sm: SessionStates::Init(SessionSM::new(settings, interrupted)),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The state machine implementing the `uartboot` session lifecycle.
///
/// Note that using a generic type that holds the current state serves two
/// purposes. It allows for also having shared data by all states that is not
/// really part of state data (e.g. state machine parameters, statistics,
/// etc...). Additionally, it's nicer when debugging to see the state machine
/// and the current state it is holding at any time.
#[derive(Debug)]
struct SessionSM<S: Runnable> {
    settings: Settings,
    interrupted: InterruptFlag,
    state: S,
}
impl<S: Runnable> SessionSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.settings, &self.interrupted)
    }
}

/// The session state machine starts in the `InitState`.
impl SessionSM<InitState> {
    fn new(settings: Settings, interrupted: InterruptFlag) -> Self {
        SessionSM {
            settings,
            interrupted,
            state: InitState {},
        }
    }
}

/// Wraps the state machine and its various states into a simple enum, which
/// can also be used for pattern matching during state transitions.
enum SessionStates {
    Init(SessionSM<InitState>),
    WaitForPort(SessionSM<WaitForPortState>),
    SelectPort(SessionSM<SelectPortState>),
    Connect(SessionSM<ConnectState>),
    Transfer(SessionSM<TransferState>),
    Interactive(SessionSM<InteractiveState>),
    Done(SessionSM<DoneState>),
}
impl SessionStates {
    fn step(&mut self) -> Self {
        match self {
            SessionStates::Init(sm) => {
                let event = sm.run();
                match event {
                    Event::WaitForPort(ev) => SessionStates::WaitForPort(ev.into()),
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::WaitForPort(sm) => {
                let event = sm.run();
                match event {
                    Event::PortReady(ev) => SessionStates::Connect(ev.into()),
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::SelectPort(sm) => {
                let event = sm.run();
                match event {
                    Event::SelectPort(ev) => SessionStates::SelectPort(ev.into()),
                    Event::PortReady(ev) => SessionStates::Connect(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Connect(sm) => {
                let event = sm.run();
                match event {
                    Event::SendKernel(ev) => SessionStates::Transfer(ev.into()),
                    Event::Interactive(ev) => SessionStates::Interactive(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Transfer(sm) => {
                let event = sm.run();
                match event {
                    Event::Interactive(ev) => SessionStates::Interactive(ev.into()),
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Interactive(sm) => {
                let event = sm.run();
                match event {
                    Event::Done(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            SessionStates::Done(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => SessionStates::Done(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<WaitForPortEvent> for SessionSM<WaitForPortState> {
    fn from(event: WaitForPortEvent) -> SessionSM<WaitForPortState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: WaitForPortState {},
        }
    }
}

impl From<SelectPortEvent> for SessionSM<SelectPortState> {
    fn from(event: SelectPortEvent) -> SessionSM<SelectPortState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: SelectPortState {},
        }
    }
}

impl From<PortReadyEvent> for SessionSM<ConnectState> {
    fn from(event: PortReadyEvent) -> SessionSM<ConnectState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: ConnectState {},
        }
    }
}

impl From<SendKernelEvent> for SessionSM<TransferState> {
    fn from(event: SendKernelEvent) -> SessionSM<TransferState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: TransferState {
                channel: event.channel,
            },
        }
    }
}

impl From<InteractiveEvent> for SessionSM<InteractiveState> {
    fn from(event: InteractiveEvent) -> SessionSM<InteractiveState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: InteractiveState {
                channel: event.channel,
            },
        }
    }
}

impl From<DoneEvent> for SessionSM<DoneState> {
    fn from(event: DoneEvent) -> SessionSM<DoneState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: DoneState {
                with_error: event.with_errors,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for SessionSM<DoneState> {
    fn from(event: ExitEvent) -> SessionSM<DoneState> {
        SessionSM {
            settings: event.settings,
            interrupted: event.interrupted,
            state: DoneState {
                with_error: event.with_error,
                should_exit: true,
            },
        }
    }
}
