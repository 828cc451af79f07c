//! Shared status and receive cells
//!
//! These cells cross the boundary between caller code and the TWI
//! interrupt. They are single-byte atomics so that every read and write is
//! indivisible on an 8-bit core, and the engine publishes a terminal status
//! only after the last received byte is stored.

use core::sync::atomic::{AtomicU8, Ordering};

use avrtwi_hal::twi::STATUS_MASK;

const ERROR_FLAG: u8 = 0x01;

/// Outcome of one master transaction
///
/// Transitions are monotonic: `NotStarted` → `InProgress` → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusStatus {
    /// Queued, the engine has not reached it yet
    NotStarted,
    /// Address sent, bytes moving
    InProgress,
    /// Terminal: every byte was exchanged
    CompletedOk,
    /// Terminal: the exchange failed with this hardware status
    Error(u8),
}

impl BusStatus {
    const fn encode(self) -> u8 {
        match self {
            BusStatus::CompletedOk => 0x00,
            BusStatus::NotStarted => 0x02,
            BusStatus::InProgress => 0x04,
            BusStatus::Error(raw) => (raw & STATUS_MASK) | ERROR_FLAG,
        }
    }

    const fn decode(value: u8) -> Self {
        if value & ERROR_FLAG != 0 {
            return BusStatus::Error(value & STATUS_MASK);
        }
        match value {
            0x00 => BusStatus::CompletedOk,
            0x02 => BusStatus::NotStarted,
            0x04 => BusStatus::InProgress,
            other => BusStatus::Error(other & STATUS_MASK),
        }
    }

    /// Still queued or running
    pub const fn is_pending(self) -> bool {
        matches!(self, BusStatus::NotStarted | BusStatus::InProgress)
    }

    /// Single-byte wire form: raw hardware status with bit 0 set for errors
    pub const fn code(self) -> u8 {
        self.encode()
    }
}

/// Status cell owned by the caller, written by the master engine
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    /// A cell that has not been submitted yet
    pub const fn new() -> Self {
        Self::with_status(BusStatus::NotStarted)
    }

    /// A cell holding `status`
    pub const fn with_status(status: BusStatus) -> Self {
        Self(AtomicU8::new(status.encode()))
    }

    /// Current status
    pub fn get(&self) -> BusStatus {
        BusStatus::decode(self.0.load(Ordering::Acquire))
    }

    /// Still queued or running
    pub fn is_pending(&self) -> bool {
        self.get().is_pending()
    }

    pub(crate) fn set(&self, status: BusStatus) {
        self.0.store(status.encode(), Ordering::Release);
    }
}

/// Outcome of the most recent slave exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlaveStatus {
    /// Addressed, exchange running
    InProgress,
    /// Last exchange finished cleanly
    CompletedOk,
    /// Master stopped reading before the whole response was sent
    TxPartial,
    /// Master wrote more than the receive buffer holds; message truncated
    RxOverflow,
    /// Unexpected hardware status; engine returned to standby
    Error(u8),
}

impl SlaveStatus {
    const fn encode(self) -> u8 {
        match self {
            SlaveStatus::CompletedOk => 0x00,
            SlaveStatus::TxPartial => 0x02,
            SlaveStatus::RxOverflow => 0x04,
            SlaveStatus::InProgress => 0x06,
            SlaveStatus::Error(raw) => (raw & STATUS_MASK) | ERROR_FLAG,
        }
    }

    const fn decode(value: u8) -> Self {
        if value & ERROR_FLAG != 0 {
            return SlaveStatus::Error(value & STATUS_MASK);
        }
        match value {
            0x00 => SlaveStatus::CompletedOk,
            0x02 => SlaveStatus::TxPartial,
            0x04 => SlaveStatus::RxOverflow,
            0x06 => SlaveStatus::InProgress,
            other => SlaveStatus::Error(other & STATUS_MASK),
        }
    }
}

/// Slave status as published by the interrupt handler
#[derive(Debug)]
pub(crate) struct SlaveStatusCell(AtomicU8);

impl SlaveStatusCell {
    pub(crate) const fn new(status: SlaveStatus) -> Self {
        Self(AtomicU8::new(status.encode()))
    }

    pub(crate) fn get(&self) -> SlaveStatus {
        SlaveStatus::decode(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, status: SlaveStatus) {
        self.0.store(status.encode(), Ordering::Release);
    }
}

/// Caller-owned destination for received bytes
///
/// The engine writes bytes and bumps the counter from interrupt context;
/// the caller reads them once the transaction's [`StatusCell`] is terminal.
/// At most 255 bytes are addressable by one transaction.
#[derive(Debug)]
pub struct RxBuffer<const L: usize> {
    bytes: [AtomicU8; L],
    count: AtomicU8,
}

impl<const L: usize> Default for RxBuffer<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const L: usize> RxBuffer<L> {
    #[allow(clippy::declare_interior_mutable_const)]
    const ZERO: AtomicU8 = AtomicU8::new(0);

    /// Empty buffer
    pub const fn new() -> Self {
        Self {
            bytes: [Self::ZERO; L],
            count: AtomicU8::new(0),
        }
    }

    /// Number of bytes stored by the last transaction
    pub fn received(&self) -> usize {
        self.count.load(Ordering::Acquire) as usize
    }

    /// Storage size
    pub const fn capacity(&self) -> usize {
        L
    }

    /// Byte at `index`, if it was received
    pub fn get(&self, index: usize) -> Option<u8> {
        if index < self.received() {
            self.bytes.get(index).map(|b| b.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Copy the received bytes into `out`, returning how many were copied
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let n = self.received().min(out.len()).min(L);
        for (dst, src) in out[..n].iter_mut().zip(self.bytes.iter()) {
            *dst = src.load(Ordering::Relaxed);
        }
        n
    }

    /// Borrow as a transaction target
    pub fn target(&self) -> RxRef<'_> {
        RxRef {
            bytes: &self.bytes,
            count: &self.count,
        }
    }
}

/// Non-owning view of an [`RxBuffer`] held by a queued transaction
#[derive(Debug, Clone, Copy)]
pub struct RxRef<'a> {
    bytes: &'a [AtomicU8],
    count: &'a AtomicU8,
}

impl<'a> RxRef<'a> {
    /// Storage size
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    pub(crate) fn received(&self) -> u8 {
        self.count.load(Ordering::Acquire)
    }

    /// Append a byte; bytes beyond capacity are dropped
    pub(crate) fn push(&self, byte: u8) -> u8 {
        let n = self.count.load(Ordering::Relaxed);
        if let Some(slot) = self.bytes.get(n as usize) {
            slot.store(byte, Ordering::Relaxed);
            self.count.store(n.saturating_add(1), Ordering::Release);
            n.saturating_add(1)
        } else {
            n
        }
    }
}
