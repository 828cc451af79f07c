//! avrtwi Hardware Abstraction Layer
//!
//! This crate defines the register-level view of the AVR two-wire
//! interface (TWI) that the protocol engines in `avrtwi-core` drive, plus
//! the generic [`I2cBus`] trait that device drivers are written against.
//! Chip-specific crates implement [`TwiRegisters`] for real silicon; tests
//! implement it with a simulated peripheral.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Drivers (avrtwi-drivers, application)  │
//! └─────────────────────────────────────────┘
//!                     │  I2cBus
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  avrtwi-core (master/slave engines)     │
//! └─────────────────────────────────────────┘
//!                     │  TwiRegisters
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  avrtwi-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//!             ┌───────────────┐
//!             │ avrtwi-hal-avr│
//!             │ 328P / 2560   │
//!             └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`twi::TwiRegisters`] - TWI control/status/data/bit-rate registers
//! - [`i2c::I2cBus`] - Blocking I2C bus operations

#![no_std]
#![deny(unsafe_code)]

pub mod i2c;
pub mod twi;

// Re-export key items at crate root for convenience
pub use i2c::{BusSpeed, I2cBus, Pullups};
pub use twi::{bit_rate, Control, TwiRegisters, TwiStatus};
