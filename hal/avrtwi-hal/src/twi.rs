//! Two-wire interface register model
//!
//! The AVR TWI peripheral is driven through four registers:
//! - TWCR (control): every protocol step is one write of a [`Control`] word
//! - TWSR (status): the bus event that raised the interrupt, see [`TwiStatus`]
//! - TWDR (data): the byte to shift out or the byte just shifted in
//! - TWBR (bit rate): SCL divisor, see [`bit_rate`]
//!
//! plus TWAR (own slave address) and the port bits backing SDA/SCL.

use core::ops::BitOr;

use crate::i2c::{BusSpeed, Pullups};

/// Prescaler bits are not part of the status code
pub const STATUS_MASK: u8 = 0xF8;

/// Slave address byte with the write intent bit (SLA+W)
pub const fn sla_w(address: u8) -> u8 {
    (address & 0x7F) << 1
}

/// Slave address byte with the read intent bit (SLA+R)
pub const fn sla_r(address: u8) -> u8 {
    ((address & 0x7F) << 1) | 0x01
}

/// Access to one TWI peripheral
///
/// Implementations are thin register accessors; all protocol logic lives
/// in the engines. Methods are called with the engine's lock held, so they
/// must not block.
pub trait TwiRegisters {
    /// Current status code (TWSR with prescaler bits masked off)
    fn status(&self) -> u8;

    /// Read the data register (TWDR)
    fn data(&self) -> u8;

    /// Load the data register (TWDR)
    fn set_data(&mut self, byte: u8);

    /// Read back the control register (TWCR)
    fn control(&self) -> Control;

    /// Write the control register (TWCR)
    fn set_control(&mut self, control: Control);

    /// Program the bit-rate register (TWBR) and clear the prescaler
    fn set_bit_rate(&mut self, bit_rate: u8);

    /// Program the own-address register (TWAR)
    fn set_own_address(&mut self, twar: u8);

    /// Drive the SDA/SCL port bits
    fn set_pullups(&mut self, pullups: Pullups);
}

/// TWBR value for the requested bus speed
///
/// SCL = F_CPU / (16 + 2 * TWBR) with the prescaler cleared. Clocks too
/// slow for the requested speed saturate at 0; clocks too fast saturate
/// at 255.
pub const fn bit_rate(cpu_hz: u32, speed: BusSpeed) -> u8 {
    let divisor = (cpu_hz / speed.hz()).saturating_sub(16) / 2;
    if divisor > u8::MAX as u32 {
        u8::MAX
    } else {
        divisor as u8
    }
}

/// TWCR control word
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Control(u8);

impl Control {
    /// TWINT: interrupt flag, written as 1 to start the next operation
    pub const INT: Self = Self(0x80);
    /// TWEA: acknowledge the next received byte
    pub const EA: Self = Self(0x40);
    /// TWSTA: generate a start condition
    pub const STA: Self = Self(0x20);
    /// TWSTO: generate a stop condition
    pub const STO: Self = Self(0x10);
    /// TWWC: write collision flag
    pub const WC: Self = Self(0x08);
    /// TWEN: peripheral enable
    pub const EN: Self = Self(0x04);
    /// TWIE: interrupt enable
    pub const IE: Self = Self(0x01);

    /// Peripheral fully off
    pub const OFF: Self = Self(0);

    /// Enabled, interrupt masked, idle (master after `start`)
    pub const IDLE: Self = Self(0x80 | 0x04);
    /// Shift out TWDR (address or data byte)
    pub const SEND_BYTE: Self = Self(0x80 | 0x40 | 0x04 | 0x01);
    /// Start or repeated start
    pub const START: Self = Self(0x80 | 0x20 | 0x04 | 0x01);
    /// Stop and release the bus, interrupt masked
    pub const STOP: Self = Self(0x80 | 0x10 | 0x04);
    /// Stop, then start again as soon as the bus is free
    pub const STOP_START: Self = Self(0x80 | 0x20 | 0x10 | 0x04 | 0x01);
    /// Receive the next byte and return ACK
    pub const RECEIVE_ACK: Self = Self(0x80 | 0x40 | 0x04 | 0x01);
    /// Receive the next byte and return NACK
    pub const RECEIVE_NACK: Self = Self(0x80 | 0x04 | 0x01);
    /// Slave armed: acknowledge own address, interrupt enabled
    pub const ARMED: Self = Self(0x80 | 0x40 | 0x04 | 0x01);

    /// Raw register value
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from a raw register value
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Copy with the bits of `other` cleared
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Control {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::fmt::Debug for Control {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Control({:#04x})", self.0)
    }
}

/// TWSR status codes
///
/// Master codes are reported while this device drives the bus, slave codes
/// while it is addressed by another master. Arbitration loss shares one
/// code between the master transmitter and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TwiStatus {
    /// Illegal start or stop on the bus
    BusError = 0x00,
    /// Start transmitted
    Start = 0x08,
    /// Repeated start transmitted
    RepeatedStart = 0x10,
    /// SLA+W transmitted, ACK received
    MtSlaAck = 0x18,
    /// SLA+W transmitted, NACK received
    MtSlaNack = 0x20,
    /// Data transmitted, ACK received
    MtDataAck = 0x28,
    /// Data transmitted, NACK received
    MtDataNack = 0x30,
    /// Arbitration lost in SLA or data
    ArbitrationLost = 0x38,
    /// SLA+R transmitted, ACK received
    MrSlaAck = 0x40,
    /// SLA+R transmitted, NACK received
    MrSlaNack = 0x48,
    /// Data received, ACK returned
    MrDataAck = 0x50,
    /// Data received, NACK returned
    MrDataNack = 0x58,
    /// Own SLA+W received, ACK returned
    SrSlaAck = 0x60,
    /// Arbitration lost as master, own SLA+W received
    SrArbLostSlaAck = 0x68,
    /// General call received, ACK returned
    SrGcallAck = 0x70,
    /// Arbitration lost as master, general call received
    SrArbLostGcallAck = 0x78,
    /// Addressed with own SLA+W, data received, ACK returned
    SrDataAck = 0x80,
    /// Addressed with own SLA+W, data received, NACK returned
    SrDataNack = 0x88,
    /// General call data received, ACK returned
    SrGcallDataAck = 0x90,
    /// General call data received, NACK returned
    SrGcallDataNack = 0x98,
    /// Stop or repeated start while addressed
    SrStop = 0xA0,
    /// Own SLA+R received, ACK returned
    StSlaAck = 0xA8,
    /// Arbitration lost as master, own SLA+R received
    StArbLostSlaAck = 0xB0,
    /// Data transmitted, ACK received
    StDataAck = 0xB8,
    /// Data transmitted, NACK received
    StDataNack = 0xC0,
    /// Last data byte (TWEA = 0) transmitted, ACK received
    StLastData = 0xC8,
    /// No relevant state information
    NoInfo = 0xF8,
}

impl TwiStatus {
    /// Decode a status register value; prescaler bits are ignored
    pub fn from_raw(raw: u8) -> Option<Self> {
        use TwiStatus::*;

        let status = match raw & STATUS_MASK {
            0x00 => BusError,
            0x08 => Start,
            0x10 => RepeatedStart,
            0x18 => MtSlaAck,
            0x20 => MtSlaNack,
            0x28 => MtDataAck,
            0x30 => MtDataNack,
            0x38 => ArbitrationLost,
            0x40 => MrSlaAck,
            0x48 => MrSlaNack,
            0x50 => MrDataAck,
            0x58 => MrDataNack,
            0x60 => SrSlaAck,
            0x68 => SrArbLostSlaAck,
            0x70 => SrGcallAck,
            0x78 => SrArbLostGcallAck,
            0x80 => SrDataAck,
            0x88 => SrDataNack,
            0x90 => SrGcallDataAck,
            0x98 => SrGcallDataNack,
            0xA0 => SrStop,
            0xA8 => StSlaAck,
            0xB0 => StArbLostSlaAck,
            0xB8 => StDataAck,
            0xC0 => StDataNack,
            0xC8 => StLastData,
            0xF8 => NoInfo,
            _ => return None,
        };
        Some(status)
    }

    /// Raw status code
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Slave did not acknowledge its address
    pub fn is_address_nack(self) -> bool {
        matches!(self, TwiStatus::MtSlaNack | TwiStatus::MrSlaNack)
    }
}
