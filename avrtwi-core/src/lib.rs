//! Interrupt-driven TWI (I2C) bus engines for AVR microcontrollers
//!
//! This crate contains the protocol logic and nothing chip-specific:
//!
//! - Transaction queue shared between callers and the TWI interrupt
//! - Master engine with asynchronous (status cell) and blocking APIs
//! - Slave engine with an application message hook
//! - [`BusRole`], the single engine bound to the TWI vector
//! - Decision diary for post-mortem protocol debugging
//!
//! Register access goes through [`avrtwi_hal::TwiRegisters`], so the
//! engines run unchanged against real silicon or a simulated peripheral.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod diary;
pub mod error;
pub mod master;
pub mod queue;
pub mod role;
pub mod slave;
pub mod status;

#[cfg(test)]
mod sim;

pub use config::{MasterConfig, SlaveConfig};
pub use diary::{Diary, DiaryEntry, Step};
pub use error::{result_code, SubmitError, TwiError};
pub use master::Master;
pub use queue::{Transaction, TransactionQueue, TxMode};
pub use role::{BusRole, HandlerFn};
pub use slave::{MessageHandler, Slave};
pub use status::{BusStatus, RxBuffer, RxRef, SlaveStatus, StatusCell};
