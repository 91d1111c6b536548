//! States for the `uartboot` session state machine.
//!
//! This modules is private and restricted to the
//! [`session`](crate::session) scope. The public interface of the state
//! machine is provided by [`session`](crate::session).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::io;
use std::sync::atomic::Ordering;
use std::thread;

use console::style;
use log::info;

use crate::boot_protocol;
use crate::channel::SerialChannel;
use crate::interactive::{self, InterruptFlag, RelayEnd};
use crate::settings::Settings;
use crate::utils::kernel::KernelImage;
use crate::utils::keyboard::InteractiveConsole;
use crate::utils::ports;

use super::events::*;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state can do any work that needs to be done and
    /// when finished, requests transition to a new state by returning the
    /// appropriate `event`. The `event` is then consumed to create the new
    /// `state` using the corresponding `From` trait implementation if
    /// available. The shared `interrupted` flag is latched by the Ctrl+C
    /// handler and checked at state boundaries.
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event;
}

// Init State ==================================================================

/// Represents the initial state of the session state machine.
///
/// From the `InitState`, the state machine can evolve via the following
/// transitions:
///
///  * **[`WaitForPortEvent`] => [`WaitForPortState`]** when a specific device
///    path was provided in the settings,
///  * **[`SelectPortEvent`] => [`SelectPortState`]** when no device path was
///    provided in the settings.
#[derive(Debug)]
pub(crate) struct InitState {}
impl Runnable for InitState {
    /// At the `Init` state, check if the provided `settings` have a device
    /// path, and if yes, transition to the `WaitForPort` state; otherwise
    /// transition to the `SelectPort` state.
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> Init");
        match settings.path {
            Some(_) => Event::WaitForPort(WaitForPortEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
            }),
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
            }),
        }
    }
}

// WaitForPort State ===========================================================

/// Holds the session until the device path named in the settings shows up on
/// the system.
///
///  * **[`PortReadyEvent`] => [`ConnectState`]** when the device is there,
///  * **[`SelectPortEvent`] => [`SelectPortState`]** when the user cancels
///    the wait with `ESC` to pick another device,
///  * **[`DoneEvent`] => [`DoneState`]** when Ctrl+C ends the session while
///    still waiting.
#[derive(Debug)]
pub(crate) struct WaitForPortState {}
impl Runnable for WaitForPortState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> WaitForPort");
        let path = settings.path.as_ref().unwrap();
        let canceled = ports::wait_for_port(path, interrupted);
        if interrupted.load(Ordering::SeqCst) {
            // Nothing touched the device yet; this is a clean exit.
            return done(settings, interrupted, false);
        }
        if canceled {
            Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
            })
        } else {
            // The wait for port to be ready completed without cancellation.
            // Fire the `PortReady` event to trigger the transition to the next
            // state.
            Event::PortReady(PortReadyEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
            })
        }
    }
}

// SelectPort State ============================================================

/// Interactive selection of one of the USB serial devices connected to the
/// system.
///
///  * **[`PortReadyEvent`] => [`ConnectState`]** with the selected path
///    patched into the settings,
///  * **[`SelectPortEvent`] => [`SelectPortState`]** again when the user
///    declines the list to get a refreshed one,
///  * **[`DoneEvent`] => [`DoneState`]** when Ctrl+C ends the session during
///    the selection.
#[derive(Debug)]
pub(crate) struct SelectPortState {}
impl Runnable for SelectPortState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> SelectPort");
        let selection = ports::select_port(interrupted);
        match selection {
            // We have a serial port device path that we now need to update in
            // the settings and then trigger the transition via the `PortReady`
            // event.
            Some(path) => {
                let mut cloned_settings = settings.clone();
                cloned_settings.path = Some(path);
                Event::PortReady(PortReadyEvent {
                    settings: cloned_settings,
                    interrupted: interrupted.clone(),
                })
            }
            None if interrupted.load(Ordering::SeqCst) => done(settings, interrupted, false),
            None => Event::SelectPort(SelectPortEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
            }),
        }
    }
}

// Connect State ===============================================================

/// Opens the serial channel on the ready port and decides what the session is
/// here for.
///
///  * **[`SendKernelEvent`] => [`TransferState`]** when the settings name a
///    kernel image to push,
///  * **[`InteractiveEvent`] => [`InteractiveState`]** when there is no
///    kernel but an interactive session was requested,
///  * **[`DoneEvent`] => [`DoneState`]** when the port cannot be opened, when
///    there is nothing to do, or on an interrupt.
#[derive(Debug)]
pub(crate) struct ConnectState {}
impl Runnable for ConnectState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> Connect");

        if interrupted.load(Ordering::SeqCst) {
            return done(settings, interrupted, false);
        }

        let channel = match SerialChannel::open(settings) {
            Ok(channel) => channel,
            Err(error) => {
                eprintln!(
                    "{}",
                    style(format!("[UB] 💥 Could not open the serial port: {}", error)).red()
                );
                return done(settings, interrupted, true);
            }
        };

        // Give the adapter and the bootloader a moment before the first byte.
        thread::sleep(settings.settle_delay);

        if settings.kernel_image.is_some() {
            Event::SendKernel(SendKernelEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
                channel: Some(channel),
            })
        } else if settings.interactive {
            Event::Interactive(InteractiveEvent {
                settings: settings.clone(),
                interrupted: interrupted.clone(),
                channel: Some(channel),
            })
        } else {
            eprintln!(
                "{}",
                style("[UB] Nothing to do: no kernel image and no interactive session requested")
                    .yellow()
            );
            done(settings, interrupted, true)
        }
    }
}

// Transfer State ==============================================================

/// Loads the kernel image and runs the transfer protocol state machine over
/// the open channel.
///
///  * **[`InteractiveEvent`] => [`InteractiveState`]** after a verified push
///    when the settings also ask for an interactive session,
///  * **[`DoneEvent`] => [`DoneState`]** after a verified push without an
///    interactive session, or with the error flag set when the image cannot
///    be loaded, does not fit the wire size announcement, or the push fails.
#[derive(Debug)]
pub(crate) struct TransferState {
    pub channel: Option<SerialChannel>,
}
impl Runnable for TransferState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> Transfer");

        if let Some(channel) = self.channel.take() {
            if interrupted.load(Ordering::SeqCst) {
                return done(settings, interrupted, false);
            }

            let path = settings.kernel_image.as_ref().unwrap();
            let image = match KernelImage::load(path) {
                Ok(image) => image,
                Err(error) => {
                    eprintln!(
                        "{}",
                        style(format!(
                            "[UB] 🙁 Could not read the kernel image `{}`: {}",
                            path, error
                        ))
                        .red()
                    );
                    return done(settings, interrupted, true);
                }
            };
            if image.size() > u32::MAX as u64 {
                eprintln!(
                    "{}",
                    style(format!(
                        "[UB] 🙁 The kernel image `{}` is too big: {} bytes do not fit the \
                         4-byte size announcement",
                        path,
                        image.size()
                    ))
                    .red()
                );
                return done(settings, interrupted, true);
            }

            println!(
                "{}",
                style(format!(
                    "[UB] ⏩ Pushing `{}` ({} bytes, checksum {:#010x})...",
                    path,
                    image.size(),
                    image.checksum()
                ))
                .cyan()
            );

            let mut transfer = boot_protocol::factory(settings.clone(), channel, image);
            return match transfer.run() {
                Ok(channel) => {
                    println!("{}", style("[UB] ✅ Kernel pushed and verified").green());
                    // Let the pushed kernel take over the line before we do.
                    thread::sleep(settings.settle_delay);
                    if settings.interactive && !interrupted.load(Ordering::SeqCst) {
                        Event::Interactive(InteractiveEvent {
                            settings: settings.clone(),
                            interrupted: interrupted.clone(),
                            channel: Some(channel),
                        })
                    } else {
                        done(settings, interrupted, false)
                    }
                }
                Err(error) => {
                    eprintln!("{}", style(format!("[UB] 💥 {}", error)).red());
                    done(settings, interrupted, true)
                }
            };
        }

        // We should never reach here!
        unreachable!()
    }
}

// Interactive State ===========================================================

/// Bridges the serial channel to the local terminal until the user ends the
/// session or the link goes away.
///
///  * **[`DoneEvent`] => [`DoneState`]**, with the error flag set only when
///    the terminal cannot be put into raw mode.
#[derive(Debug)]
pub(crate) struct InteractiveState {
    pub channel: Option<SerialChannel>,
}
impl Runnable for InteractiveState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!("=> Interactive");

        if let Some(mut channel) = self.channel.take() {
            if interrupted.load(Ordering::SeqCst) {
                return done(settings, interrupted, false);
            }

            println!(
                "{}",
                style("[UB] 🖥  Interactive session, Ctrl+C to end it").cyan()
            );

            let mut console = match InteractiveConsole::engage(interrupted.clone()) {
                Ok(console) => console,
                Err(error) => {
                    eprintln!(
                        "{}",
                        style(format!(
                            "[UB] 💥 Could not take over the terminal: {}",
                            error
                        ))
                        .red()
                    );
                    return done(settings, interrupted, true);
                }
            };

            let end = interactive::relay(&mut channel, &mut console, &mut io::stdout());
            // Leave raw mode before printing the epilogue.
            drop(console);
            match end {
                RelayEnd::Interrupt => {
                    println!("\n{}", style("[UB] 👋 Session ended").cyan());
                }
                RelayEnd::ChannelClosed => {
                    println!("\n{}", style("[UB] 🔌 Serial link closed").yellow());
                }
            }
            return done(settings, interrupted, false);
        }

        // We should never reach here!
        unreachable!()
    }
}

// Done State ==================================================================

#[derive(Debug, Copy, Clone)]
pub(crate) struct DoneState {
    pub with_error: bool,
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, settings: &Settings, interrupted: &InterruptFlag) -> Event {
        info!(
            "=> Done with{}errors",
            if self.with_error { " " } else { " no " }
        );
        Event::Exit(ExitEvent {
            settings: settings.clone(),
            interrupted: interrupted.clone(),
            with_error: self.with_error,
        })
    }
}

// =============================================================================
// Private stuff
// =============================================================================

fn done(settings: &Settings, interrupted: &InterruptFlag, with_errors: bool) -> Event {
    Event::Done(DoneEvent {
        settings: settings.clone(),
        interrupted: interrupted.clone(),
        with_errors,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;

    #[test]
    fn init_waits_when_a_path_is_given() {
        let settings = SettingsBuilder::new().path("/dev/ttyUSB7").finalize();
        let interrupted = InterruptFlag::default();
        let event = InitState {}.run(&settings, &interrupted);
        match event {
            Event::WaitForPort(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn init_selects_when_no_path_is_given() {
        let settings = SettingsBuilder::new().finalize();
        let interrupted = InterruptFlag::default();
        let event = InitState {}.run(&settings, &interrupted);
        match event {
            Event::SelectPort(_) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn done_fires_exit_and_keeps_the_error_flag() {
        let settings = SettingsBuilder::new().finalize();
        let interrupted = InterruptFlag::default();
        let mut state = DoneState {
            with_error: true,
            should_exit: false,
        };
        match state.run(&settings, &interrupted) {
            Event::Exit(ev) => assert!(ev.with_error),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
