//! `uartboot` session orchestration, from port discovery to the interactive
//! bridge.
//!
//! **Example** - Executing the state machine event loop:
//! ```no_run
//! use uartboot as ub;
//!
//! let settings = ub::SettingsBuilder::default().finalize();
//! let interrupted = ub::InterruptFlag::default();
//! let mut session = ub::factory(settings, interrupted);
//! let status = session.run(); // status code returned after the `Exit` event
//! std::process::exit(status.into());
//! ```

mod events;
mod state_machine;
mod states;

pub use state_machine::{factory, BootSession};
