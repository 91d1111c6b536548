//! Helpers for serial ports, kernel images and the keyboard.

pub(crate) mod kernel;
pub(crate) mod keyboard;
pub(crate) mod ports;
