//! Device drivers for avrtwi
//!
//! Drivers talk to their chips through [`avrtwi_hal::I2cBus`], so they run
//! on any master that implements it, including a shared `&Master`.
//!
//! # Supported devices
//!
//! - **RGB LCD shield**: HD44780 16x2 character display, RGB backlight and
//!   five buttons behind an MCP23017 port expander

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod lcd;

pub use lcd::{Buttons, Color, RgbLcdShield};
