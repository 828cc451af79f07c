//! Master transaction queue
//!
//! A ring of `N` slots, each holding up to `M` payload bytes. Payloads are
//! copied in at submission; receive buffers and status cells stay with the
//! caller and are only referenced. The queue also owns one status cell and
//! one receive buffer used by the blocking facade, which cannot lend its
//! own stack storage for the lifetime of the queue.
//!
//! The queue is not synchronized by itself; the master keeps it inside its
//! critical-section mutex.

use core::fmt::Write;

use avrtwi_hal::twi::{sla_r, sla_w};

use crate::error::SubmitError;
use crate::status::{BusStatus, RxBuffer, RxRef, StatusCell};

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TxMode {
    /// Send the payload
    Write = 1,
    /// Receive into the caller's buffer
    Read = 2,
    /// Send the payload, repeated start, then receive
    WriteThenRead = 3,
}

impl TxMode {
    /// Mode sends bytes before any read
    pub const fn writes(self) -> bool {
        matches!(self, TxMode::Write | TxMode::WriteThenRead)
    }

    /// Mode ends in a read phase
    pub const fn reads(self) -> bool {
        matches!(self, TxMode::Read | TxMode::WriteThenRead)
    }
}

/// Where the engine reports a transaction's outcome
#[derive(Debug, Clone, Copy)]
pub(crate) enum StatusTarget<'a> {
    Caller(&'a StatusCell),
    Internal,
}

/// Where the engine stores received bytes
#[derive(Debug, Clone, Copy)]
pub(crate) enum RxTarget<'a> {
    Caller(RxRef<'a>),
    Internal,
}

/// One bus transaction, as submitted
///
/// `'a` is the lifetime of the caller's status cell and receive buffer,
/// which must outlive the transaction; `'p` is the payload borrow, which
/// ends at submission because the payload is copied.
#[derive(Debug, Clone, Copy)]
pub struct Transaction<'a, 'p> {
    pub(crate) address: u8,
    pub(crate) mode: TxMode,
    pub(crate) payload: &'p [u8],
    pub(crate) rx: Option<RxTarget<'a>>,
    pub(crate) rx_len: u8,
    pub(crate) status: Option<StatusTarget<'a>>,
}

impl<'a, 'p> Transaction<'a, 'p> {
    /// Fully general constructor; validated at submission
    pub fn new(
        address: u8,
        mode: TxMode,
        payload: &'p [u8],
        rx: Option<RxRef<'a>>,
        rx_len: u8,
        status: Option<&'a StatusCell>,
    ) -> Self {
        Self {
            address,
            mode,
            payload,
            rx: rx.map(RxTarget::Caller),
            rx_len,
            status: status.map(StatusTarget::Caller),
        }
    }

    /// Send `payload` to `address`
    pub fn write(address: u8, payload: &'p [u8], status: &'a StatusCell) -> Self {
        Self::new(address, TxMode::Write, payload, None, 0, Some(status))
    }

    /// Receive `len` bytes from `address` into `rx`
    pub fn read(address: u8, rx: RxRef<'a>, len: u8, status: &'a StatusCell) -> Self {
        Self::new(address, TxMode::Read, &[], Some(rx), len, Some(status))
    }

    /// Send `payload`, then receive `len` bytes in the same bus transaction
    pub fn write_read(
        address: u8,
        payload: &'p [u8],
        rx: RxRef<'a>,
        len: u8,
        status: &'a StatusCell,
    ) -> Self {
        Self::new(
            address,
            TxMode::WriteThenRead,
            payload,
            Some(rx),
            len,
            Some(status),
        )
    }

    /// Transaction reporting into the queue's own cells
    pub(crate) fn internal(address: u8, mode: TxMode, payload: &'p [u8], rx_len: u8) -> Self {
        Self {
            address,
            mode,
            payload,
            rx: mode.reads().then_some(RxTarget::Internal),
            rx_len,
            status: Some(StatusTarget::Internal),
        }
    }

    /// Target address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Direction
    pub fn mode(&self) -> TxMode {
        self.mode
    }
}

#[derive(Clone, Copy)]
struct Slot<'a, const M: usize> {
    address: u8,
    mode: TxMode,
    /// Current direction; a write-then-read slot flips to `Read`
    phase: TxMode,
    payload: [u8; M],
    len: u8,
    cursor: u8,
    rx: Option<RxTarget<'a>>,
    rx_len: u8,
    status: StatusTarget<'a>,
}

/// Fixed-capacity FIFO of pending transactions
pub struct TransactionQueue<'a, const N: usize, const M: usize> {
    slots: [Option<Slot<'a, M>>; N],
    head: usize,
    count: usize,
    own_status: StatusCell,
    own_rx: RxBuffer<M>,
}

impl<'a, const N: usize, const M: usize> Default for TransactionQueue<'a, N, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize, const M: usize> TransactionQueue<'a, N, M> {
    const SIZES_FIT: () = assert!(N > 0 && M > 0 && M <= u8::MAX as usize);

    /// Empty queue
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZES_FIT;
        Self {
            slots: [None; N],
            head: 0,
            count: 0,
            own_status: StatusCell::with_status(BusStatus::CompletedOk),
            own_rx: RxBuffer::new(),
        }
    }

    /// Validate and copy `tx` into the next free slot
    ///
    /// On success the transaction's status cell reads `NotStarted` and its
    /// receive counter is zero. A rejected submission leaves the queue and
    /// the caller's cells untouched.
    pub fn enqueue(&mut self, tx: Transaction<'a, '_>) -> Result<(), SubmitError> {
        if self.is_full() {
            return Err(SubmitError::QueueFull);
        }
        if tx.payload.len() > M {
            return Err(SubmitError::MessageTooLong);
        }
        let status = tx.status.ok_or(SubmitError::MissingStatusCell)?;
        if tx.mode.writes() && tx.payload.is_empty() {
            return Err(SubmitError::WriteWithoutData);
        }
        let rx = if tx.mode.reads() {
            let rx = tx.rx.ok_or(SubmitError::ReadWithoutStorage)?;
            if tx.rx_len == 0 || tx.rx_len as usize > self.rx_capacity(rx) {
                return Err(SubmitError::ReadWithoutStorage);
            }
            Some(rx)
        } else {
            None
        };

        let mut payload = [0u8; M];
        let len = if tx.mode.writes() {
            payload[..tx.payload.len()].copy_from_slice(tx.payload);
            tx.payload.len() as u8
        } else {
            0
        };

        let index = (self.head + self.count) % N;
        self.slots[index] = Some(Slot {
            address: tx.address,
            mode: tx.mode,
            phase: tx.mode,
            payload,
            len,
            cursor: 0,
            rx,
            rx_len: tx.rx_len,
            status,
        });
        self.count += 1;

        self.status_cell(status).set(BusStatus::NotStarted);
        if let Some(rx) = rx {
            self.rx_ref(rx).reset();
        }
        Ok(())
    }

    /// All slots occupied
    pub fn is_full(&self) -> bool {
        self.count == N
    }

    /// No pending transaction
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Occupied slots
    pub fn len(&self) -> usize {
        self.count
    }

    /// Slot count
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Reclaim the current slot; true if another transaction is queued
    pub(crate) fn advance(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.slots[self.head] = None;
        self.head = (self.head + 1) % N;
        self.count -= 1;
        self.count > 0
    }

    fn current(&self) -> Option<&Slot<'a, M>> {
        if self.count == 0 {
            None
        } else {
            self.slots[self.head].as_ref()
        }
    }

    fn current_mut(&mut self) -> Option<&mut Slot<'a, M>> {
        if self.count == 0 {
            None
        } else {
            self.slots[self.head].as_mut()
        }
    }

    /// Address byte for the current phase (SLA+W or SLA+R)
    pub(crate) fn address_byte(&self) -> Option<u8> {
        self.current().map(|slot| match slot.phase {
            TxMode::Read => sla_r(slot.address),
            TxMode::Write | TxMode::WriteThenRead => sla_w(slot.address),
        })
    }

    /// Direction the current slot is in
    pub(crate) fn phase(&self) -> Option<TxMode> {
        self.current().map(|slot| slot.phase)
    }

    /// Next payload byte of the current slot, if any remain
    pub(crate) fn next_byte(&mut self) -> Option<u8> {
        let slot = self.current_mut()?;
        if slot.cursor < slot.len {
            let byte = slot.payload[slot.cursor as usize];
            slot.cursor += 1;
            Some(byte)
        } else {
            None
        }
    }

    /// Payload sent; continue with the read half
    pub(crate) fn switch_to_read(&mut self) {
        if let Some(slot) = self.current_mut() {
            slot.phase = TxMode::Read;
        }
    }

    /// Bytes the current slot asked to receive
    pub(crate) fn rx_len(&self) -> u8 {
        self.current().map_or(0, |slot| slot.rx_len)
    }

    /// Bytes received so far by the current slot
    pub(crate) fn rx_count(&self) -> u8 {
        match self.current().and_then(|slot| slot.rx) {
            Some(rx) => self.rx_ref(rx).received(),
            None => 0,
        }
    }

    /// Store a received byte for the current slot; returns the new count
    pub(crate) fn push_rx(&mut self, byte: u8) -> u8 {
        match self.current().and_then(|slot| slot.rx) {
            Some(rx) => self.rx_ref(rx).push(byte),
            None => 0,
        }
    }

    /// Publish the current slot's status
    pub(crate) fn set_status(&self, status: BusStatus) {
        if let Some(slot) = self.current() {
            self.status_cell(slot.status).set(status);
        }
    }

    /// Restart the current slot from its first byte
    pub(crate) fn rewind(&mut self) {
        let rx = match self.current_mut() {
            Some(slot) => {
                slot.cursor = 0;
                slot.phase = slot.mode;
                slot.rx
            }
            None => return,
        };
        if let Some(rx) = rx {
            self.rx_ref(rx).reset();
        }
    }

    /// Outcome of the last blocking-facade transaction
    pub(crate) fn own_status(&self) -> BusStatus {
        self.own_status.get()
    }

    /// Copy out bytes received by the last blocking-facade read
    pub(crate) fn copy_own_rx(&self, out: &mut [u8]) -> usize {
        self.own_rx.copy_to(out)
    }

    fn status_cell(&self, target: StatusTarget<'a>) -> &StatusCell {
        match target {
            StatusTarget::Caller(cell) => cell,
            StatusTarget::Internal => &self.own_status,
        }
    }

    fn rx_ref(&self, target: RxTarget<'a>) -> RxRef<'_> {
        match target {
            RxTarget::Caller(rx) => rx,
            RxTarget::Internal => self.own_rx.target(),
        }
    }

    fn rx_capacity(&self, target: RxTarget<'a>) -> usize {
        match target {
            RxTarget::Caller(rx) => rx.capacity(),
            RxTarget::Internal => M,
        }
    }

    /// Write one line per pending slot, oldest first
    pub fn dump<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        writeln!(out, "queue: {} of {} slots", self.count, N)?;
        for i in 0..self.count {
            let index = (self.head + i) % N;
            if let Some(slot) = &self.slots[index] {
                write!(
                    out,
                    "  [{}] addr {:#04x} {:?} sent {}/{}",
                    index, slot.address, slot.mode, slot.cursor, slot.len
                )?;
                if slot.mode.reads() {
                    let got = slot.rx.map_or(0, |rx| self.rx_ref(rx).received());
                    write!(out, " recv {}/{}", got, slot.rx_len)?;
                }
                writeln!(out, " {:?}", self.status_cell(slot.status).get())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Queue<'a> = TransactionQueue<'a, 3, 4>;

    #[test]
    fn test_enqueue_resets_status() {
        let status = StatusCell::with_status(BusStatus::Error(0x20));
        let mut q = Queue::new();
        q.enqueue(Transaction::write(0x20, &[1, 2], &status)).unwrap();
        assert_eq!(status.get(), BusStatus::NotStarted);
        assert_eq!(q.len(), 1);
        assert_eq!(q.address_byte(), Some(0x40));
    }

    #[test]
    fn test_queue_full_is_idempotent() {
        let cells = [StatusCell::new(), StatusCell::new(), StatusCell::new()];
        let extra = StatusCell::with_status(BusStatus::CompletedOk);
        let mut q = Queue::new();
        for (i, cell) in cells.iter().enumerate() {
            q.enqueue(Transaction::write(0x10 + i as u8, &[i as u8], cell))
                .unwrap();
        }
        assert!(q.is_full());

        for _ in 0..3 {
            assert_eq!(
                q.enqueue(Transaction::write(0x7F, &[9], &extra)),
                Err(SubmitError::QueueFull)
            );
        }
        assert_eq!(q.len(), 3);
        assert_eq!(extra.get(), BusStatus::CompletedOk);
        assert_eq!(q.address_byte(), Some(sla_w(0x10)));
    }

    #[test]
    fn test_message_too_long() {
        let status = StatusCell::with_status(BusStatus::CompletedOk);
        let mut q = Queue::new();
        assert_eq!(
            q.enqueue(Transaction::write(0x20, &[0; 5], &status)),
            Err(SubmitError::MessageTooLong)
        );
        assert!(q.is_empty());
        assert_eq!(status.get(), BusStatus::CompletedOk);
    }

    #[test]
    fn test_validation_errors() {
        let status = StatusCell::new();
        let rx = RxBuffer::<2>::new();
        let mut q = Queue::new();

        let missing = Transaction::new(0x20, TxMode::Write, &[1], None, 0, None);
        assert_eq!(q.enqueue(missing), Err(SubmitError::MissingStatusCell));

        assert_eq!(
            q.enqueue(Transaction::write(0x20, &[], &status)),
            Err(SubmitError::WriteWithoutData)
        );

        let no_rx = Transaction::new(0x20, TxMode::Read, &[], None, 1, Some(&status));
        assert_eq!(q.enqueue(no_rx), Err(SubmitError::ReadWithoutStorage));

        assert_eq!(
            q.enqueue(Transaction::read(0x20, rx.target(), 0, &status)),
            Err(SubmitError::ReadWithoutStorage)
        );
        assert_eq!(
            q.enqueue(Transaction::read(0x20, rx.target(), 3, &status)),
            Err(SubmitError::ReadWithoutStorage)
        );
        assert!(q.is_empty());
    }

    #[test]
    fn test_write_then_read_phases() {
        let status = StatusCell::new();
        let rx = RxBuffer::<2>::new();
        let mut q = Queue::new();
        q.enqueue(Transaction::write_read(0x21, &[0x10], rx.target(), 2, &status))
            .unwrap();

        assert_eq!(q.address_byte(), Some(sla_w(0x21)));
        assert_eq!(q.next_byte(), Some(0x10));
        assert_eq!(q.next_byte(), None);

        q.switch_to_read();
        assert_eq!(q.phase(), Some(TxMode::Read));
        assert_eq!(q.address_byte(), Some(sla_r(0x21)));
        assert_eq!(q.push_rx(0xAB), 1);

        q.rewind();
        assert_eq!(q.phase(), Some(TxMode::WriteThenRead));
        assert_eq!(q.rx_count(), 0);
        assert_eq!(q.next_byte(), Some(0x10));
    }

    #[test]
    fn test_internal_cells() {
        let mut q = Queue::new();
        q.enqueue(Transaction::internal(0x30, TxMode::Read, &[], 2))
            .unwrap();
        assert_eq!(q.own_status(), BusStatus::NotStarted);
        q.push_rx(7);
        q.push_rx(8);
        q.set_status(BusStatus::CompletedOk);
        assert!(!q.advance());

        let mut out = [0u8; 4];
        assert_eq!(q.copy_own_rx(&mut out), 2);
        assert_eq!(&out[..2], &[7, 8]);
        assert_eq!(q.own_status(), BusStatus::CompletedOk);
    }

    #[test]
    fn test_dump_lists_pending_slots() {
        let status = StatusCell::new();
        let mut q = Queue::new();
        q.enqueue(Transaction::write(0x20, &[1, 2, 3], &status))
            .unwrap();
        let mut text = String::new();
        q.dump(&mut text).unwrap();
        assert!(text.starts_with("queue: 1 of 3 slots"));
        assert!(text.contains("addr 0x20 Write sent 0/3 NotStarted"));
    }

    proptest! {
        #[test]
        fn prop_ring_preserves_fifo(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let cells: [StatusCell; 64] = core::array::from_fn(|_| StatusCell::new());
            let mut q = Queue::new();
            let mut model = std::collections::VecDeque::new();
            let mut next = 0u8;

            for push in ops {
                if push {
                    let payload = [next];
                    let result = q.enqueue(Transaction::write(next & 0x7F, &payload, &cells[next as usize]));
                    if model.len() == 3 {
                        prop_assert_eq!(result, Err(SubmitError::QueueFull));
                    } else {
                        prop_assert!(result.is_ok());
                        model.push_back(next);
                        next += 1;
                    }
                } else {
                    let expected = model.pop_front();
                    prop_assert_eq!(q.next_byte(), expected);
                    let more = q.advance();
                    prop_assert_eq!(more, !model.is_empty());
                }
                prop_assert_eq!(q.len(), model.len());
            }
        }
    }
}
