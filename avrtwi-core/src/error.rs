//! Error taxonomy
//!
//! [`SubmitError`] is a local rejection that never reached the bus.
//! [`TwiError::Bus`] carries the hardware status of a failed exchange.

use avrtwi_hal::twi::{TwiStatus, STATUS_MASK};
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// Rejected submission
///
/// Discriminants are the positive half of [`TwiError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SubmitError {
    /// Every slot is occupied
    QueueFull = 1,
    /// Payload longer than the slot storage
    MessageTooLong = 2,
    /// No status cell supplied
    MissingStatusCell = 3,
    /// Write mode with an empty payload
    WriteWithoutData = 4,
    /// Read mode without a receive buffer, or asking for zero bytes or more than it holds
    ReadWithoutStorage = 5,
    /// A configured wait limit expired
    Timeout = 6,
    /// Operation sequence the engine cannot express as one transaction
    UnsupportedOperation = 7,
}

impl SubmitError {
    /// Positive scalar code
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Failure of a synchronous request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwiError {
    /// Rejected before reaching the bus
    Submit(SubmitError),
    /// Bus exchange failed with this hardware status
    Bus(u8),
}

impl TwiError {
    /// Signed scalar form: positive for submission errors, negative for bus
    /// failures
    ///
    /// The bus magnitude is the status byte with bit 0 set, so a bus error
    /// (hardware status 0x00) still maps to a non-zero code.
    pub const fn code(self) -> i16 {
        match self {
            TwiError::Submit(e) => e.code() as i16,
            TwiError::Bus(raw) => -(((raw & STATUS_MASK) | 0x01) as i16),
        }
    }

    /// Hardware status, if the failure happened on the bus
    pub fn status(self) -> Option<TwiStatus> {
        match self {
            TwiError::Bus(raw) => TwiStatus::from_raw(raw),
            TwiError::Submit(_) => None,
        }
    }
}

impl From<SubmitError> for TwiError {
    fn from(e: SubmitError) -> Self {
        TwiError::Submit(e)
    }
}

/// Collapse a result into the signed scalar, 0 meaning success
pub fn result_code(result: Result<(), TwiError>) -> i16 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

impl embedded_hal::i2c::Error for TwiError {
    fn kind(&self) -> ErrorKind {
        match self.status() {
            Some(s) if s.is_address_nack() => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Some(TwiStatus::MtDataNack) => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Some(TwiStatus::ArbitrationLost) => ErrorKind::ArbitrationLoss,
            Some(TwiStatus::BusError) => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}
