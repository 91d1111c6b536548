//! Serial port device discovery, selection and opening.

use std::sync::atomic::Ordering;
use std::{thread, time::Duration};

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serialport::{available_ports, SerialPort, SerialPortType};

use crate::interactive::InterruptFlag;
use crate::settings::Settings;
use crate::utils::keyboard::poll_escape;

//==============================================================================
// Crate-Public Interface
//==============================================================================

/// Present the list of connected USB serial devices to the user to
/// interactively select one. The user may cancel the selection to request
/// another refresh of connected devices, probably waiting for a specific
/// device to be plugged in. Returns `None` on a cancelled selection and on
/// an interrupt; the caller tells the two apart through the flag.
pub(crate) fn select_port(interrupted: &InterruptFlag) -> Option<String> {
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = status_spinner();

    // Avoid cursor flicker during the waiting
    let _ = Term::stdout().hide_cursor();
    // Enumerate connected USB serial devices until we have some.
    loop {
        if interrupted.load(Ordering::SeqCst) {
            pb.finish_with_message("🛑 Interrupted while waiting for devices");
            let _ = Term::stdout().show_cursor();
            return None;
        }

        found_ports = enumerate_usb_serial_ports();
        let num_ports = found_ports.len();
        if num_ports > 0 {
            pb.finish_with_message("Select a port to be used:");
            break;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s {}] ⌛ Waiting for a USB serial controller to be connected...",
            style(waited).dim(),
            num_ports
        ));
        attempt += 1;

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    let _ = Term::stdout().show_cursor();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    selection
}

/// Check for a device with the given path in the system. If not immediately
/// found, enter into a waiting loop, checking every period of time whether
/// the device has been created or not. While waiting, the user can
/// interactively cancel waiting by pressing the `ESC` key (or Ctrl+C, which
/// also latches the interrupt flag).
///
/// The function will return `true` when the wait was cancelled.
pub(crate) fn wait_for_port(path: &str, interrupted: &InterruptFlag) -> bool {
    let pb = status_spinner();

    let mut attempt: usize = 1;
    let waiting_period: usize = 2;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            pb.finish_with_message(format!(
                "🛑 Interrupted while waiting for port {}",
                style(path).cyan()
            ));
            return true;
        }

        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            return false;
        }

        let waited = attempt * waiting_period;
        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be ready (ESC to cancel)...",
            style(waited).dim(),
            found_ports.len(),
            style(path).cyan()
        ));

        // The Esc poll doubles as the pacing wait between enumerations: four
        // half-second slices per attempt, each one interruptible.
        for _ in 0..(waiting_period * 2) {
            match poll_escape(interrupted) {
                Ok(true) => {
                    pb.finish_with_message(format!(
                        "❌ Waiting on port {} canceled after {} seconds",
                        style(path).cyan(),
                        style(waited).dim()
                    ));
                    return true;
                }
                Ok(false) => {}
                Err(error) => {
                    // No terminal to poll; fall back to plain pacing.
                    debug!("key polling unavailable: {}", error);
                    thread::sleep(Duration::from_millis(500));
                }
            }
        }
        attempt += 1;
    }
}

/// Open the port described by the settings and configure it, retrying a few
/// times while the device settles into existence. This happens before any
/// protocol traffic, so the bounded retry here does not contradict the
/// fail-fast rule the transfer itself lives by.
pub(crate) fn open_port(settings: &Settings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            let path = settings.path.clone().unwrap_or_default();
            serialport::new(&path, settings.baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(settings.read_timeout)
                .open()
        },
    );
    match result {
        Ok(mut port) => {
            // Configure the port explicitly with the values in `settings`;
            // some platforms only honor them when set on the open handle.
            port.set_baud_rate(settings.baud_rate)?;
            port.set_data_bits(settings.data_bits)?;
            port.set_stop_bits(settings.stop_bits)?;
            port.set_parity(settings.parity)?;
            port.set_flow_control(settings.flow_control)?;
            port.set_timeout(settings.read_timeout)?;

            info!(
                "Connected to {} at {} baud",
                port.name().unwrap_or_default(),
                settings.baud_rate
            );
            debug!("data_bits    : {:#?}", settings.data_bits);
            debug!("stop_bits    : {:#?}", settings.stop_bits);
            debug!("parity       : {:#?}", settings.parity);
            debug!("flow control : {:#?}", settings.flow_control);
            debug!("read timeout : {:#?}", settings.read_timeout);

            assert_eq!(
                settings.baud_rate,
                port.baud_rate()?,
                "\n\n\
                 --> Failed to set the baud rate to the desired value {} which\n    \
                 is probably because it is not a valid one.\n    \
                 Change it to a good one in the command line arguments, or\n    \
                 don't specify it at all. The default value will be used.\n\
                 \n",
                settings.baud_rate
            );

            Ok(port)
        }
        Err(err) => match err {
            retry::Error::Operation {
                error,
                total_delay,
                tries,
            } => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error)
            }
            retry::Error::Internal(_) => {
                info!("Internal retry error while opening port");
                Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "internal error while retrying to open the port",
                ))
            }
        },
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn status_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            // For more spinners check out the cli-spinners project:
            // https://github.com/sindresorhus/cli-spinners/blob/master/spinners.json
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[UB] {spinner:.blue} {msg}"),
    );
    pb
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    // Enumerated ports carry an extended name (manufacturer and product
    // after the path), hence the prefix check.
    ports.iter().any(|detected| detected.starts_with(path))
}

/// Enumerates serial devices of type USB on the system
fn enumerate_usb_serial_ports() -> Vec<String> {
    let mut usb_ports = vec![];
    match available_ports() {
        Ok(ports) => {
            for p in ports {
                match p.port_type {
                    // USB ports give us more info about the connected serial
                    // controller
                    SerialPortType::UsbPort(info) => {
                        let extended_name = format!(
                            "{}: ({} / {})",
                            p.port_name,
                            info.manufacturer.as_ref().map_or("", String::as_str),
                            info.product.as_ref().map_or("", String::as_str)
                        );
                        usb_ports.push(extended_name);
                    }
                    // We're also interested in the other devices, such as
                    // virtual ports for testing
                    _ => {
                        usb_ports.push(p.port_name);
                    }
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e.to_string());
        }
    }
    usb_ports
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    // A failed interaction (no usable terminal, interrupt) reads as a
    // cancelled selection; the caller refreshes and asks again.
    let selection = select.default(0).interact_on_opt(&term).unwrap_or(None);
    selection.map(|x| String::from(ports[x].split(':').next().unwrap_or(&ports[x])))
}
