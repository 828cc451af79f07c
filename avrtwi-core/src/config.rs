//! Runtime configuration for the master and slave engines
//!
//! Sizes (queue slots, payload length, slave buffer, diary depth) are const
//! generics on the engines; everything that can change per board lives here.

use avrtwi_hal::{BusSpeed, Pullups};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default CPU clock (Uno and Mega boards)
pub const DEFAULT_CPU_HZ: u32 = 16_000_000;

/// Default number of address/data NACK retries
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Master engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MasterConfig {
    /// CPU clock feeding the TWI prescaler
    pub cpu_hz: u32,
    /// SCL frequency
    pub speed: BusSpeed,
    /// Internal pull-ups on SDA/SCL
    pub pullups: Pullups,
    /// Restarts allowed after a slave NACKs, before the transaction fails
    pub max_retries: u8,
    /// Pause before each retry start, in microseconds
    pub retry_backoff_us: u32,
    /// Pause between polls of a full queue or a pending status, in microseconds
    pub queue_poll_us: u32,
    /// Polls allowed before a wait gives up with `Timeout`; `None` waits forever
    pub wait_limit: Option<u32>,
    /// Record engine decisions in the diary
    pub diary: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MasterConfig {
    /// Fast mode, pull-ups on, three retries, unbounded waits
    pub const fn new() -> Self {
        Self {
            cpu_hz: DEFAULT_CPU_HZ,
            speed: BusSpeed::Fast,
            pullups: Pullups::On,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_us: 5,
            queue_poll_us: 5,
            wait_limit: None,
            diary: false,
        }
    }

    pub const fn with_cpu_hz(mut self, cpu_hz: u32) -> Self {
        self.cpu_hz = cpu_hz;
        self
    }

    pub const fn with_speed(mut self, speed: BusSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub const fn with_pullups(mut self, pullups: Pullups) -> Self {
        self.pullups = pullups;
        self
    }

    pub const fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn with_retry_backoff_us(mut self, us: u32) -> Self {
        self.retry_backoff_us = us;
        self
    }

    pub const fn with_queue_poll_us(mut self, us: u32) -> Self {
        self.queue_poll_us = us;
        self
    }

    /// Bound every busy-wait to `polls` iterations
    pub const fn with_wait_limit(mut self, polls: u32) -> Self {
        self.wait_limit = Some(polls);
        self
    }

    pub const fn with_diary(mut self, on: bool) -> Self {
        self.diary = on;
        self
    }
}

/// Slave engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlaveConfig {
    /// Own 7-bit address
    pub address: u8,
    /// CPU clock feeding the TWI prescaler
    pub cpu_hz: u32,
    /// SCL frequency
    pub speed: BusSpeed,
    /// Internal pull-ups on SDA/SCL
    pub pullups: Pullups,
    /// Also respond to the general call address
    pub answer_general_call: bool,
    /// Record engine decisions in the diary
    pub diary: bool,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self::new(0x08)
    }
}

impl SlaveConfig {
    /// Respond to `address` only
    pub const fn new(address: u8) -> Self {
        Self {
            address: address & 0x7F,
            cpu_hz: DEFAULT_CPU_HZ,
            speed: BusSpeed::Fast,
            pullups: Pullups::On,
            answer_general_call: false,
            diary: false,
        }
    }

    pub const fn with_cpu_hz(mut self, cpu_hz: u32) -> Self {
        self.cpu_hz = cpu_hz;
        self
    }

    pub const fn with_speed(mut self, speed: BusSpeed) -> Self {
        self.speed = speed;
        self
    }

    pub const fn with_pullups(mut self, pullups: Pullups) -> Self {
        self.pullups = pullups;
        self
    }

    pub const fn with_general_call(mut self, on: bool) -> Self {
        self.answer_general_call = on;
        self
    }

    pub const fn with_diary(mut self, on: bool) -> Self {
        self.diary = on;
        self
    }

    /// TWAR value: address in bits 7..1, general call enable in bit 0
    pub const fn own_address_register(&self) -> u8 {
        (self.address << 1) | self.answer_general_call as u8
    }
}
