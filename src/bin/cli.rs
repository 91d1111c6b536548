//! Uartboot command line interface.

use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::{
    crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use log::{debug, trace, LevelFilter};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use simplelog::*;

use uartboot as ub;

fn main() {
    println!("[UB] uartboot v{}", crate_version!());

    let interrupted = ub::InterruptFlag::default();
    let handler_flag = interrupted.clone();
    ctrlc::set_handler(move || {
        println!("🛑 received Ctrl+C!");
        // Only latch the flag here; the session observes it at state
        // boundaries and inside the blocking waits, then unwinds normally so
        // the terminal is restored on the way out.
        handler_flag.store(true, Ordering::SeqCst);
    })
    .expect("Failed to install my Ctrl-C handler!");

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .about(crate_description!())
        .long_about(
            "\n\
            Uartboot works in tandem with the bootloader to push a kernel \
            image over the serial port and verify it made it across intact. \
            The exchange starts with a `kernel` handshake line, announces the \
            image size as 4 bytes (highest order first) and waits for the \
            device to echo it back, then pushes the image, checks the \
            checksum the device reports over what it received, and expects a \
            final `Done` confirmation line.\n\
            \n\
            With `--debug`, the image goes out byte by byte and every byte \
            must be echoed back before the next one is sent.\n\
            \n\
            With `--interactive`, uartboot stays on the line after the push \
            (or immediately when no image is given): keystrokes are passed to \
            the board on the other side of the serial line, and any data from \
            the board is printed to stdout. Ctrl+C ends the session.\n\
            \n\
            Uartboot can be started before or after the device is plugged in; \
            when the named port does not exist yet, it waits for it to show \
            up.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("DEVICE_TTY")
                .help("the USB tty device to use")
                .long_help(
                    "the USB tty device to use; may change when the board \
                     is unplugged and re-plugged and may differ between \
                     systems. When not set, `uartboot` offers a selection \
                     out of the detected USB serial devices.",
                )
                .short("-t")
                .long("--tty")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BAUD_RATE")
                .help("serial port baud rate")
                .long_help("serial baud rate")
                .short("-b")
                .long("--baud-rate")
                .takes_value(true)
                .default_value("115200")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DATA_BITS")
                .help("number of bits per character")
                .short("-d")
                .long("--data-bits")
                .takes_value(true)
                .possible_values(&["5", "6", "7", "8"])
                .default_value("8")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("STOP_BITS")
                .help("number of stop bits per byte")
                .short("-s")
                .long("--stop-bits")
                .takes_value(true)
                .possible_values(&["1", "2"])
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PARITY")
                .help("parity checking protocol")
                .short("-p")
                .long("--parity")
                .takes_value(true)
                .possible_values(&["none", "odd", "even"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("FLOW_CONTROL")
                .help("flow control mode")
                .short("-f")
                .long("--flow-control")
                .takes_value(true)
                .possible_values(&["none", "soft", "hard"])
                .default_value("none")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("KERNEL_IMAGE")
                .help("path to the kernel image to be pushed")
                .long_help(
                    "path to the kernel image to be pushed; when not set, no \
                     transfer takes place and `--interactive` is required.",
                )
                .index(1),
        )
        .arg(
            Arg::with_name("INTERACTIVE")
                .help("bridge the serial port to the local terminal")
                .long_help(
                    "bridge the serial port to the local terminal once the \
                     kernel is pushed (or right away when no kernel image is \
                     given); keystrokes go to the device and device output \
                     goes to stdout. Ctrl+C ends the session.",
                )
                .short("-i")
                .long("--interactive"),
        )
        .arg(
            Arg::with_name("DEBUG_MODE")
                .help("push the kernel byte by byte, verifying every echo")
                .long("--debug"),
        )
        .arg(
            Arg::with_name("SETTLE_DELAY")
                .help("delay in milliseconds between protocol steps")
                .long_help(
                    "delay in milliseconds inserted between protocol steps \
                     and after opening the port, giving the device time to \
                     get ready for the next step.",
                )
                .long("--settle")
                .takes_value(true)
                .default_value("1000")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("READ_TIMEOUT")
                .help("serial read timeout in milliseconds")
                .long("--read-timeout")
                .takes_value(true)
                .default_value("5000")
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'uartboot -v -v -v' or 'uartboot -vvv' vs 'uartboot -v'
    let log_level: LevelFilter;
    match matches.occurrences_of("v") {
        0 => log_level = LevelFilter::Warn,
        1 => log_level = LevelFilter::Info,
        2 => log_level = LevelFilter::Debug,
        _ => log_level = LevelFilter::Trace,
    }

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    // It's safe to call unwrap on all command line arguments with default
    // values, because the value with either be what the user input at runtime
    // or the default value

    let baud_rate = value_t!(matches.value_of("BAUD_RATE"), u32).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value",
            style("error").red(),
            style("baud-rate").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("BAUD_RATE").unwrap()).on_red()
        );
        process::exit(-1);
    });

    let settle_delay = value_t!(matches.value_of("SETTLE_DELAY"), u64).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value in milliseconds",
            style("error").red(),
            style("settle").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("SETTLE_DELAY").unwrap()).on_red()
        );
        process::exit(-1);
    });

    let read_timeout = value_t!(matches.value_of("READ_TIMEOUT"), u64).unwrap_or_else(|_| {
        println!(
            "{}: `{}` needs to be a numeric value in milliseconds",
            style("error").red(),
            style("read-timeout").cyan()
        );
        println!(
            "   {} `{}` is not a valid value",
            style("-->").cyan(),
            style(matches.value_of("READ_TIMEOUT").unwrap()).on_red()
        );
        process::exit(-1);
    });

    let data_bits = match matches.value_of("DATA_BITS").unwrap() {
        "5" => DataBits::Five,
        "6" => DataBits::Six,
        "7" => DataBits::Seven,
        "8" => DataBits::Eight,
        _ => unreachable!(),
    };

    let stop_bits = match matches.value_of("STOP_BITS").unwrap() {
        "1" => StopBits::One,
        "2" => StopBits::Two,
        _ => unreachable!(),
    };

    let parity = match matches.value_of("PARITY").unwrap() {
        "none" => Parity::None,
        "even" => Parity::Even,
        "odd" => Parity::Odd,
        _ => unreachable!(),
    };

    let flow_control = match matches.value_of("FLOW_CONTROL").unwrap() {
        "none" => FlowControl::None,
        "soft" => FlowControl::Software,
        "hard" => FlowControl::Hardware,
        _ => unreachable!(),
    };

    // END - Arguments with default values =====================================

    let mut settings = ub::SettingsBuilder::default()
        .baud_rate(baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .flow_control(flow_control)
        .interactive(matches.is_present("INTERACTIVE"))
        .debug_mode(matches.is_present("DEBUG_MODE"))
        .settle_delay(Duration::from_millis(settle_delay))
        .read_timeout(Duration::from_millis(read_timeout))
        .finalize();

    // START - Arguments with NO default values ================================

    if matches.is_present("DEVICE_TTY") {
        settings.path = Some(matches.value_of("DEVICE_TTY").unwrap().into());
    }

    if matches.is_present("KERNEL_IMAGE") {
        settings.kernel_image = Some(matches.value_of("KERNEL_IMAGE").unwrap().into());
    }

    // END - Arguments =========================================================

    if settings.kernel_image.is_none() && !settings.interactive {
        println!(
            "{}: nothing to do; give a kernel image to push, `{}`, or both",
            style("error").red(),
            style("--interactive").cyan()
        );
        process::exit(-1);
    }

    // Run the state machine ===================================================

    let mut session = ub::factory(settings, interrupted);
    let exit_code = session.run();
    debug!("exit code: {}", exit_code);
    std::process::exit(exit_code.into());
}
