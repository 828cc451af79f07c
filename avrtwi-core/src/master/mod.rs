//! TWI master engine
//!
//! Callers submit [`Transaction`]s into a fixed queue; the TWI interrupt
//! walks the queue one protocol step at a time:
//!
//! ```text
//!   kick ──► START ──► SLA+W ──► data … ──┬─► STOP            (queue empty)
//!              ▲                          ├─► REP START ─► SLA+R ─► data … ─► NACK
//!              │                          │   (write-then-read)
//!              └──────────────────────────┴── REP START       (next slot)
//! ```
//!
//! Outcomes are published through [`StatusCell`]s. The blocking facade in
//! [`blocking`] wraps submission and waits for the outcome.

mod blocking;

use core::cell::RefCell;
use core::fmt::Write;

use avrtwi_hal::twi::{bit_rate, TwiStatus};
use avrtwi_hal::{Control, Pullups, TwiRegisters};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::config::MasterConfig;
use crate::diary::{Diary, Step, DIARY_DEPTH};
use crate::error::SubmitError;
use crate::queue::{Transaction, TransactionQueue, TxMode};
use crate::status::{BusStatus, RxRef, StatusCell};

/// Default queue depth
pub const QUEUE_SLOTS: usize = 3;

/// Default maximum payload per transaction, register byte included
pub const MAX_PAYLOAD: usize = 24;

struct MasterState<'a, R, const N: usize, const M: usize, const L: usize> {
    regs: R,
    queue: TransactionQueue<'a, N, M>,
    /// Engine owns the bus
    busy: bool,
    /// Retries spent on the current slot
    retries: u8,
    /// A blocking request is using the queue's own cells
    sync_claimed: bool,
    diary: Diary<L>,
}

/// Interrupt-driven TWI bus master
///
/// `'a` bounds the caller-owned status cells and receive buffers that
/// queued transactions refer to. `N` is the queue depth and `M` the largest
/// payload one transaction can carry. `L` is the diary depth.
pub struct Master<
    'a,
    R,
    D,
    const N: usize = QUEUE_SLOTS,
    const M: usize = MAX_PAYLOAD,
    const L: usize = DIARY_DEPTH,
> {
    state: Mutex<CriticalSectionRawMutex, RefCell<MasterState<'a, R, N, M, L>>>,
    delay: Mutex<CriticalSectionRawMutex, RefCell<D>>,
    config: MasterConfig,
}

impl<'a, R, D, const N: usize, const M: usize, const L: usize> Master<'a, R, D, N, M, L>
where
    R: TwiRegisters,
    D: DelayNs,
{
    /// Build a stopped master; call [`start`](Self::start) before submitting
    pub const fn new(regs: R, delay: D, config: MasterConfig) -> Self {
        Self {
            state: Mutex::new(RefCell::new(MasterState {
                regs,
                queue: TransactionQueue::new(),
                busy: false,
                retries: 0,
                sync_claimed: false,
                diary: Diary::new(config.diary),
            })),
            delay: Mutex::new(RefCell::new(delay)),
            config,
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    /// Enable the peripheral: pull-ups, SDA released, bit rate, TWI on
    /// with the interrupt masked until the first transaction
    pub fn start(&self) {
        let cfg = self.config;
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.busy = false;
            s.retries = 0;
            s.regs.set_pullups(cfg.pullups);
            s.regs.set_data(0xFF);
            s.regs.set_bit_rate(bit_rate(cfg.cpu_hz, cfg.speed));
            s.regs.set_control(Control::IDLE);
        });
        debug!("twi master started at {=u32} Hz", cfg.speed.hz());
    }

    /// Disable the peripheral
    pub fn stop(&self) {
        self.state.lock(|s| s.borrow_mut().regs.set_control(Control::OFF));
    }

    pub fn set_pullups(&self, pullups: Pullups) {
        self.state.lock(|s| s.borrow_mut().regs.set_pullups(pullups));
    }

    /// The engine owns the bus or its interrupt is still enabled
    pub fn busy(&self) -> bool {
        self.state.lock(|s| {
            let s = s.borrow();
            s.busy || s.regs.control().contains(Control::IE)
        })
    }

    /// Queued transactions, including the one on the bus
    pub fn pending(&self) -> usize {
        self.state.lock(|s| s.borrow().queue.len())
    }

    pub fn is_full(&self) -> bool {
        self.state.lock(|s| s.borrow().queue.is_full())
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock(|s| s.borrow().queue.is_empty())
    }

    /// Enqueue without waiting; a full queue is reported as `QueueFull`
    pub fn try_submit(&self, tx: Transaction<'a, '_>) -> Result<(), SubmitError> {
        let queued = self
            .state
            .lock(|s| s.borrow_mut().queue.enqueue(tx));
        if let Err(e) = queued {
            debug!("submission to {=u8:#x} rejected: {}", tx.address(), e);
            return Err(e);
        }
        self.kick();
        Ok(())
    }

    /// Enqueue, waiting while the queue is full
    ///
    /// Without a wait limit this spins until a slot frees up. With one, a
    /// queue that stays full is reported as `QueueFull`.
    pub fn submit(&self, tx: Transaction<'a, '_>) -> Result<(), SubmitError> {
        let mut polls = 0;
        loop {
            match self.try_submit(tx) {
                Err(SubmitError::QueueFull) => {
                    self.wait_tick(&mut polls)
                        .map_err(|_| SubmitError::QueueFull)?;
                }
                other => return other,
            }
        }
    }

    /// Write one byte (typically a register address or command)
    pub fn write_register_async(
        &self,
        address: u8,
        register: u8,
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        self.submit(Transaction::write(address, &[register], status))
    }

    /// Write a register address followed by one data byte
    pub fn write_register_byte_async(
        &self,
        address: u8,
        register: u8,
        data: u8,
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        self.submit(Transaction::write(address, &[register, data], status))
    }

    /// Write a register address followed by `data`
    ///
    /// The register byte counts toward the payload limit.
    pub fn write_register_bytes_async(
        &self,
        address: u8,
        register: u8,
        data: &[u8],
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        let payload = with_register::<M>(register, data)?;
        self.submit(Transaction::write(address, &payload, status))
    }

    /// Write a register address followed by the bytes of `text`
    pub fn write_str_async(
        &self,
        address: u8,
        register: u8,
        text: &str,
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        self.write_register_bytes_async(address, register, text.as_bytes(), status)
    }

    /// Read `len` bytes into `rx`
    pub fn read_async(
        &self,
        address: u8,
        len: u8,
        rx: RxRef<'a>,
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        self.submit(Transaction::read(address, rx, len, status))
    }

    /// Write a register address, then read `len` bytes with a repeated start
    pub fn read_register_async(
        &self,
        address: u8,
        register: u8,
        len: u8,
        rx: RxRef<'a>,
        status: &'a StatusCell,
    ) -> Result<(), SubmitError> {
        self.submit(Transaction::write_read(address, &[register], rx, len, status))
    }

    /// Start the engine if it is idle and work is queued
    fn kick(&self) {
        loop {
            let waiting_for_stop = self.state.lock(|s| {
                let mut s = s.borrow_mut();
                let control = s.regs.control();
                if s.busy || control.contains(Control::IE) || s.queue.is_empty() {
                    return false;
                }
                if control.contains(Control::STO) {
                    return true;
                }
                s.busy = true;
                s.retries = 0;
                s.regs.set_control(Control::START);
                false
            });
            if !waiting_for_stop {
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// One poll of a busy-wait; errors once the configured limit is spent
    fn wait_tick(&self, polls: &mut u32) -> Result<(), SubmitError> {
        if let Some(limit) = self.config.wait_limit {
            if *polls >= limit {
                return Err(SubmitError::Timeout);
            }
        }
        *polls = polls.saturating_add(1);
        self.pause(self.config.queue_poll_us);
        Ok(())
    }

    fn pause(&self, us: u32) {
        if us > 0 {
            self.delay.lock(|d| d.borrow_mut().delay_us(us));
        }
    }

    /// TWI interrupt handler
    ///
    /// Advances the current transaction by one protocol step. Must be
    /// called from the TWI vector (or a simulated event source), never
    /// concurrently with itself.
    pub fn on_interrupt(&self) {
        self.state.lock(|s| self.step(&mut s.borrow_mut()));
    }

    fn step(&self, s: &mut MasterState<'a, R, N, M, L>) {
        let raw = s.regs.status();
        let Some(status) = TwiStatus::from_raw(raw) else {
            warn!("unknown twi status {=u8:#x}", raw);
            self.fail(s, raw);
            return;
        };

        match status {
            TwiStatus::Start | TwiStatus::RepeatedStart => {
                let Some(sla) = s.queue.address_byte() else {
                    // Nothing queued; release the bus
                    s.busy = false;
                    s.regs.set_control(Control::STOP);
                    return;
                };
                let step = if sla & 1 == 0 {
                    Step::SentAddressWrite
                } else {
                    Step::SentAddressRead
                };
                s.diary.record(sla, step, raw);
                s.regs.set_data(sla);
                s.queue.set_status(BusStatus::InProgress);
                s.busy = true;
                s.regs.set_control(Control::SEND_BYTE);
            }

            TwiStatus::MtSlaAck | TwiStatus::MtDataAck => match s.queue.next_byte() {
                Some(byte) => {
                    s.diary.record(byte, Step::SendNextByte, raw);
                    s.regs.set_data(byte);
                    s.regs.set_control(Control::SEND_BYTE);
                }
                None if s.queue.phase() == Some(TxMode::WriteThenRead) => {
                    s.diary.record(0, Step::RestartSameMessage, raw);
                    s.queue.switch_to_read();
                    s.regs.set_control(Control::START);
                }
                None => self.complete(s, 0, raw, Step::RestartNextMessage, Step::Finished),
            },

            TwiStatus::MrSlaAck => {
                if s.queue.rx_len() > 1 {
                    s.diary.record(0, Step::ReadAckAfterAddress, raw);
                    s.regs.set_control(Control::RECEIVE_ACK);
                } else {
                    s.diary.record(0, Step::ReadNackAfterAddress, raw);
                    s.regs.set_control(Control::RECEIVE_NACK);
                }
            }

            TwiStatus::MrDataAck => {
                let byte = s.regs.data();
                let count = s.queue.push_rx(byte);
                if count < s.queue.rx_len().saturating_sub(1) {
                    s.diary.record(byte, Step::ReceiveAck, raw);
                    s.regs.set_control(Control::RECEIVE_ACK);
                } else {
                    s.diary.record(byte, Step::ReceiveNack, raw);
                    s.regs.set_control(Control::RECEIVE_NACK);
                }
            }

            TwiStatus::MrDataNack => {
                let byte = s.regs.data();
                s.queue.push_rx(byte);
                self.complete(s, byte, raw, Step::ReceiveDoneRestart, Step::ReceiveDoneStop);
            }

            TwiStatus::ArbitrationLost => {
                trace!("arbitration lost, restarting");
                s.diary.record(0, Step::ArbitrationLostRestart, raw);
                s.queue.rewind();
                s.regs.set_control(Control::START);
            }

            TwiStatus::MtSlaNack | TwiStatus::MrSlaNack | TwiStatus::MtDataNack => {
                if s.retries < self.config.max_retries {
                    s.retries += 1;
                    trace!("nack {=u8:#x}, retry {=u8}", raw, s.retries);
                    s.diary.record(0, Step::RetryStart, raw);
                    s.queue.rewind();
                    self.pause(self.config.retry_backoff_us);
                    s.regs.set_control(Control::START);
                } else {
                    warn!("nack {=u8:#x}, retries exhausted", raw);
                    s.diary.record(0, Step::RetryExhausted, raw);
                    self.fail(s, raw);
                }
            }

            _ => {
                warn!("twi master error status {=u8:#x}", raw);
                self.fail(s, raw);
            }
        }
    }

    /// Current slot finished cleanly
    fn complete(
        &self,
        s: &mut MasterState<'a, R, N, M, L>,
        content: u8,
        raw: u8,
        restart: Step,
        done: Step,
    ) {
        s.queue.set_status(BusStatus::CompletedOk);
        s.retries = 0;
        if s.queue.advance() {
            s.diary.record(content, restart, raw);
            s.regs.set_control(Control::START);
        } else {
            s.diary.record(content, done, raw);
            s.busy = false;
            s.regs.set_control(Control::STOP);
        }
    }

    /// Current slot failed with `raw`; the slot is reclaimed regardless
    fn fail(&self, s: &mut MasterState<'a, R, N, M, L>, raw: u8) {
        s.queue.set_status(BusStatus::Error(raw));
        s.retries = 0;
        if s.queue.advance() {
            s.diary.record(0, Step::ErrorStopStart, raw);
            s.regs.set_control(Control::STOP_START);
        } else {
            s.diary.record(0, Step::ErrorStop, raw);
            s.busy = false;
            s.regs.set_control(Control::STOP);
        }
    }

    /// Run `f` on the register block with the engine locked
    pub fn with_registers<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        self.state.lock(|s| f(&mut s.borrow_mut().regs))
    }

    /// Run `f` on the diary with the engine locked
    pub fn diary<T>(&self, f: impl FnOnce(&Diary<L>) -> T) -> T {
        self.state.lock(|s| f(&s.borrow().diary))
    }

    pub fn set_diary_enabled(&self, enabled: bool) {
        self.state.lock(|s| s.borrow_mut().diary.set_enabled(enabled));
    }

    pub fn clear_diary(&self) {
        self.state.lock(|s| s.borrow_mut().diary.clear());
    }

    /// Print the diary
    ///
    /// The engine stays locked while printing; use a sink that does not
    /// wait on the bus.
    pub fn dump_diary<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        self.state.lock(|s| s.borrow().diary.dump(out))
    }

    /// Print pending queue slots
    pub fn dump_queue<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        self.state.lock(|s| s.borrow().queue.dump(out))
    }
}

/// Prefix `data` with a register byte
fn with_register<const M: usize>(register: u8, data: &[u8]) -> Result<Vec<u8, M>, SubmitError> {
    let mut payload = Vec::new();
    payload
        .push(register)
        .map_err(|_| SubmitError::MessageTooLong)?;
    payload
        .extend_from_slice(data)
        .map_err(|_| SubmitError::MessageTooLong)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{NoDelay, SimDevice, SimTwi};
    use crate::status::RxBuffer;

    type TestMaster<'a> = Master<'a, SimTwi, NoDelay, 3, 8>;

    fn master<'a>(device: SimDevice) -> TestMaster<'a> {
        master_with(device, MasterConfig::new().with_diary(true))
    }

    fn master_with<'a>(device: SimDevice, config: MasterConfig) -> TestMaster<'a> {
        let m = Master::new(SimTwi::with_device(device), NoDelay::default(), config);
        m.start();
        m
    }

    /// Deliver interrupts until the bus goes quiet
    fn run(m: &TestMaster<'_>) -> usize {
        let mut steps = 0;
        while m.with_registers(SimTwi::advance) {
            m.on_interrupt();
            steps += 1;
            assert!(steps < 1000, "engine did not settle");
        }
        steps
    }

    /// Deliver interrupts until the bus reports `status`; that interrupt is
    /// left pending so the test can replace it
    fn run_until(m: &TestMaster<'_>, status: TwiStatus) {
        let mut steps = 0;
        loop {
            assert!(m.with_registers(SimTwi::advance), "bus went quiet");
            if m.with_registers(|r| r.status) == status.raw() {
                return;
            }
            m.on_interrupt();
            steps += 1;
            assert!(steps < 1000, "status never reported");
        }
    }

    fn rank(status: BusStatus) -> u8 {
        match status {
            BusStatus::NotStarted => 0,
            BusStatus::InProgress => 1,
            BusStatus::CompletedOk | BusStatus::Error(_) => 2,
        }
    }

    #[test]
    fn test_start_programs_peripheral() {
        let m = master(SimDevice::new(0x20));
        m.with_registers(|r| {
            assert_eq!(r.pullups, Some(Pullups::On));
            assert_eq!(r.bit_rate, 12);
            assert_eq!(r.data, 0xFF);
            assert_eq!(r.control, Control::IDLE);
        });
        assert!(!m.busy());
    }

    #[test]
    fn test_write_register_byte() {
        let status = StatusCell::new();
        let m = master(SimDevice::new(0x20));

        m.write_register_byte_async(0x20, 0x12, 0xAB, &status).unwrap();
        assert!(m.busy());
        assert_eq!(status.get(), BusStatus::NotStarted);

        run(&m);
        assert_eq!(status.get(), BusStatus::CompletedOk);
        assert!(!m.busy());
        assert!(m.is_empty());
        m.with_registers(|r| {
            assert_eq!(r.device.written, vec![0x12, 0xAB]);
            assert_eq!(r.log.last(), Some(&Control::STOP));
        });
    }

    #[test]
    fn test_write_then_read_fills_buffer() {
        let status = StatusCell::new();
        let rx = RxBuffer::<3>::new();
        let m = master(SimDevice::new(0x50).responding(&[1, 2, 3]));

        m.read_register_async(0x50, 0x07, 3, rx.target(), &status)
            .unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        assert_eq!(rx.received(), rx.capacity());
        let mut out = [0u8; 3];
        rx.copy_to(&mut out);
        assert_eq!(out, [1, 2, 3]);

        m.with_registers(|r| {
            assert_eq!(r.device.addressed, vec![0xA0, 0xA1]);
            assert_eq!(r.device.written, vec![0x07]);
            // Last byte is requested with NACK
            assert!(r.log.contains(&Control::RECEIVE_NACK));
        });
    }

    #[test]
    fn test_single_byte_read_nacks_immediately() {
        let status = StatusCell::new();
        let rx = RxBuffer::<1>::new();
        let m = master(SimDevice::new(0x50).responding(&[0x42]));

        m.read_async(0x50, 1, rx.target(), &status).unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        assert_eq!(rx.get(0), Some(0x42));
        m.diary(|d| {
            assert!(d.entries().any(|e| e.step == Step::ReadNackAfterAddress));
            assert!(!d.entries().any(|e| e.step == Step::ReceiveAck));
        });
    }

    #[test]
    fn test_address_nack_exhausts_retries() {
        let status = StatusCell::new();
        let mut device = SimDevice::new(0x20);
        device.nack_address = true;
        let m = master(device);

        m.write_register_async(0x20, 0x01, &status).unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::Error(TwiStatus::MtSlaNack.raw()));
        assert!(!m.busy());
        assert!(m.is_empty());
        m.with_registers(|r| assert_eq!(r.starts(), 1 + 3));
    }

    #[test]
    fn test_retry_count_is_configurable() {
        let status = StatusCell::new();
        let mut device = SimDevice::new(0x20);
        device.nack_address = true;
        let m = master_with(device, MasterConfig::new().with_max_retries(0));

        m.write_register_async(0x20, 0x01, &status).unwrap();
        run(&m);

        assert!(matches!(status.get(), BusStatus::Error(_)));
        m.with_registers(|r| assert_eq!(r.starts(), 1));
    }

    #[test]
    fn test_data_nack_retries_from_first_byte() {
        let status = StatusCell::new();
        let mut device = SimDevice::new(0x20);
        device.nack_data_at = Some(1);
        let m = master_with(device, MasterConfig::new().with_max_retries(1));

        m.write_register_byte_async(0x20, 0x10, 0x55, &status).unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::Error(TwiStatus::MtDataNack.raw()));
        // The first byte went out once per attempt
        m.with_registers(|r| assert_eq!(r.device.written, vec![0x10, 0x10]));
    }

    #[test]
    fn test_arbitration_loss_restarts_without_limit() {
        let status = StatusCell::new();
        let mut device = SimDevice::new(0x20);
        device.arbitration_losses = 5;
        let m = master(device);

        m.write_register_async(0x20, 0x01, &status).unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        m.with_registers(|r| assert_eq!(r.starts(), 6));
    }

    #[test]
    fn test_arbitration_loss_mid_write_resends_payload() {
        let status = StatusCell::new();
        let m = master(SimDevice::new(0x20));

        m.write_register_byte_async(0x20, 0x10, 0x55, &status).unwrap();
        run_until(&m, TwiStatus::MtDataAck);
        // Another master wins the bus during the register byte
        m.with_registers(|r| r.inject(TwiStatus::ArbitrationLost, 0));
        m.on_interrupt();
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        m.with_registers(|r| {
            assert_eq!(r.device.written, vec![0x10, 0x10, 0x55]);
            assert_eq!(r.device.addressed, vec![0x40, 0x40]);
        });
        m.diary(|d| {
            assert!(d.entries().any(|e| e.step == Step::ArbitrationLostRestart));
        });
    }

    #[test]
    fn test_arbitration_loss_mid_read_restarts_count() {
        let status = StatusCell::new();
        let rx = RxBuffer::<3>::new();
        let m = master(SimDevice::new(0x50).responding(&[1, 2, 3]));

        m.read_async(0x50, 3, rx.target(), &status).unwrap();
        run_until(&m, TwiStatus::MrDataAck);
        m.on_interrupt();
        assert_eq!(rx.received(), 1);

        assert!(m.with_registers(SimTwi::advance));
        m.with_registers(|r| r.inject(TwiStatus::ArbitrationLost, 0));
        m.on_interrupt();
        assert_eq!(rx.received(), 0);
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        assert_eq!(rx.received(), 3);
        let mut out = [0u8; 3];
        rx.copy_to(&mut out);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn test_read_address_nack_retries_whole_transaction() {
        let status = StatusCell::new();
        let rx = RxBuffer::<2>::new();
        let mut device = SimDevice::new(0x50).responding(&[4, 5]);
        device.read_address_nacks = 1;
        let m = master(device);

        m.read_register_async(0x50, 0x07, 2, rx.target(), &status)
            .unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::CompletedOk);
        let mut out = [0u8; 2];
        rx.copy_to(&mut out);
        assert_eq!(out, [4, 5]);
        m.with_registers(|r| {
            // The register write is repeated before the second SLA+R
            assert_eq!(r.device.addressed, vec![0xA0, 0xA1, 0xA0, 0xA1]);
            assert_eq!(r.device.written, vec![0x07, 0x07]);
        });
    }

    #[test]
    fn test_read_address_nack_exhausts_retries() {
        let status = StatusCell::new();
        let rx = RxBuffer::<2>::new();
        let mut device = SimDevice::new(0x50);
        device.read_address_nacks = 10;
        let m = master(device);

        m.read_register_async(0x50, 0x07, 2, rx.target(), &status)
            .unwrap();
        run(&m);

        assert_eq!(status.get(), BusStatus::Error(TwiStatus::MrSlaNack.raw()));
        assert_eq!(rx.received(), 0);
        assert!(m.is_empty());
        assert!(!m.busy());
        m.with_registers(|r| assert_eq!(r.device.written, vec![0x07; 4]));
    }

    #[test]
    fn test_bus_error_with_more_queued_restarts() {
        for raw in [TwiStatus::BusError.raw(), 0xD0] {
            let failed = StatusCell::new();
            let next = StatusCell::new();
            let m = master(SimDevice::new(0x20));

            m.write_register_async(0x20, 0x01, &failed).unwrap();
            m.write_register_async(0x20, 0x02, &next).unwrap();
            run_until(&m, TwiStatus::MtSlaAck);
            m.with_registers(|r| r.status = raw);
            m.on_interrupt();

            assert_eq!(failed.get(), BusStatus::Error(raw));
            assert!(m.busy());
            assert_eq!(m.pending(), 1);
            m.with_registers(|r| assert_eq!(r.log.last(), Some(&Control::STOP_START)));
            m.diary(|d| {
                assert_eq!(d.entries().last().map(|e| e.step), Some(Step::ErrorStopStart));
            });

            run(&m);
            assert_eq!(next.get(), BusStatus::CompletedOk);
            m.with_registers(|r| assert_eq!(r.device.written, vec![0x02]));
        }
    }

    #[test]
    fn test_bus_error_on_last_slot_stops() {
        for raw in [TwiStatus::BusError.raw(), 0xD0] {
            let status = StatusCell::new();
            let m = master(SimDevice::new(0x20));

            m.write_register_async(0x20, 0x01, &status).unwrap();
            run_until(&m, TwiStatus::MtSlaAck);
            m.with_registers(|r| r.status = raw);
            m.on_interrupt();

            assert_eq!(status.get(), BusStatus::Error(raw));
            assert!(!m.busy());
            assert!(m.is_empty());
            m.with_registers(|r| assert_eq!(r.log.last(), Some(&Control::STOP)));
            m.diary(|d| {
                assert_eq!(d.entries().last().map(|e| e.step), Some(Step::ErrorStop));
            });
            assert_eq!(run(&m), 0);
        }
    }

    #[test]
    fn test_diary_depth_keeps_newest() {
        let status = StatusCell::new();
        let m: Master<'_, SimTwi, NoDelay, 3, 8, 4> = Master::new(
            SimTwi::with_device(SimDevice::new(0x20)),
            NoDelay::default(),
            MasterConfig::new().with_diary(true),
        );
        m.start();

        m.write_register_bytes_async(0x20, 0x00, &[1, 2, 3], &status)
            .unwrap();
        while m.with_registers(SimTwi::advance) {
            m.on_interrupt();
        }

        assert_eq!(status.get(), BusStatus::CompletedOk);
        m.diary(|d| {
            assert_eq!(d.len(), 4);
            assert_eq!(d.entries().next().map(|e| e.content), Some(1));
            assert_eq!(d.entries().last().map(|e| e.step), Some(Step::Finished));
        });
    }

    #[test]
    fn test_failure_keeps_queue_moving() {
        let bad = StatusCell::new();
        let good = StatusCell::new();
        let mut device = SimDevice::new(0x20);
        device.present = vec![0x21];
        let m = master(device);

        m.write_register_async(0x20, 0x01, &bad).unwrap();
        m.write_register_async(0x21, 0x02, &good).unwrap();
        run(&m);

        assert!(matches!(bad.get(), BusStatus::Error(_)));
        assert_eq!(good.get(), BusStatus::CompletedOk);
        m.with_registers(|r| {
            assert!(r.log.contains(&Control::STOP_START));
            assert_eq!(r.device.written, vec![0x02]);
        });
    }

    #[test]
    fn test_ignored_status_does_not_block_next_submission() {
        let ignored = StatusCell::new();
        let rx = RxBuffer::<2>::new();
        let next = StatusCell::new();
        let m = master(SimDevice::new(0x30).responding(&[9, 8]));

        m.read_register_async(0x30, 0x00, 2, rx.target(), &ignored)
            .unwrap();
        run(&m);

        // Nobody looked at `ignored`; the slot is reclaimed anyway
        assert!(m.is_empty());
        for _ in 0..3 {
            m.write_register_async(0x30, 0x01, &next).unwrap();
            run(&m);
            assert_eq!(next.get(), BusStatus::CompletedOk);
        }
        assert!(m.is_empty());
    }

    #[test]
    fn test_back_to_back_uses_repeated_start() {
        let a = StatusCell::new();
        let b = StatusCell::new();
        let m = master(SimDevice::new(0x20));

        m.write_register_async(0x20, 0x01, &a).unwrap();
        m.write_register_async(0x20, 0x02, &b).unwrap();
        run(&m);

        assert_eq!(a.get(), BusStatus::CompletedOk);
        assert_eq!(b.get(), BusStatus::CompletedOk);
        m.with_registers(|r| {
            let stops = r
                .log
                .iter()
                .filter(|c| c.contains(Control::STO))
                .count();
            assert_eq!(stops, 1);
        });
        m.diary(|d| {
            assert!(d.entries().any(|e| e.step == Step::RestartNextMessage));
        });
    }

    #[test]
    fn test_try_submit_full_queue() {
        let cells: [StatusCell; 4] = Default::default();
        let m = master(SimDevice::new(0x20));

        for cell in &cells[..3] {
            m.write_register_async(0x20, 0x01, cell).unwrap();
        }
        assert!(m.is_full());
        assert_eq!(
            m.try_submit(Transaction::write(0x20, &[1], &cells[3])),
            Err(SubmitError::QueueFull)
        );
        assert_eq!(m.pending(), 3);
    }

    #[test]
    fn test_submit_wait_limit() {
        let cells: [StatusCell; 4] = Default::default();
        let m = master_with(SimDevice::new(0x20), MasterConfig::new().with_wait_limit(4));

        for cell in &cells[..3] {
            m.write_register_async(0x20, 0x01, cell).unwrap();
        }
        // Nothing services the interrupt, so the queue stays full
        assert_eq!(
            m.write_register_async(0x20, 0x01, &cells[3]),
            Err(SubmitError::QueueFull)
        );
        assert_eq!(cells[3].get(), BusStatus::NotStarted);
    }

    #[test]
    fn test_register_bytes_too_long() {
        let status = StatusCell::new();
        let m = master(SimDevice::new(0x20));
        assert_eq!(
            m.write_register_bytes_async(0x20, 0x00, &[0; 8], &status),
            Err(SubmitError::MessageTooLong)
        );
        m.write_str_async(0x20, 0x40, "hello", &status).unwrap();
        run(&m);
        m.with_registers(|r| assert_eq!(r.device.written, b"\x40hello".to_vec()));
    }

    #[test]
    fn test_fifo_and_monotonic_status() {
        let cells: [StatusCell; 3] = Default::default();
        let rx = RxBuffer::<2>::new();
        let m = master(SimDevice::new(0x10).also_at(0x11).also_at(0x12).responding(&[5, 6]));

        m.write_register_async(0x10, 0xA0, &cells[0]).unwrap();
        m.read_async(0x11, 2, rx.target(), &cells[1]).unwrap();
        m.write_register_byte_async(0x12, 0xA2, 0xB2, &cells[2]).unwrap();

        let mut last = [0u8; 3];
        while m.with_registers(SimTwi::advance) {
            m.on_interrupt();
            let now: Vec<u8, 3> = cells.iter().map(|c| rank(c.get())).collect();
            for i in 0..3 {
                assert!(now[i] >= last[i], "status went backwards");
                if i > 0 && now[i] > 0 {
                    assert_eq!(now[i - 1], 2, "slot {} ran before slot {}", i, i - 1);
                }
                last[i] = now[i];
            }
        }

        assert!(cells.iter().all(|c| c.get() == BusStatus::CompletedOk));
        m.with_registers(|r| {
            assert_eq!(r.device.addressed, vec![0x20, 0x23, 0x24]);
            assert_eq!(r.device.written, vec![0xA0, 0xA2, 0xB2]);
        });
    }

    #[test]
    fn test_dumps() {
        let status = StatusCell::new();
        let m = master(SimDevice::new(0x20));
        m.write_register_async(0x20, b'x', &status).unwrap();

        let mut queue = String::new();
        m.dump_queue(&mut queue).unwrap();
        assert!(queue.contains("addr 0x20 Write"));

        run(&m);
        let mut diary = String::new();
        m.dump_diary(&mut diary).unwrap();
        assert!(diary.contains("120, x, SendNextByte"));
        assert!(diary.contains("Finished"));

        m.clear_diary();
        assert_eq!(m.diary(|d| d.len()), 0);
    }

    #[test]
    fn test_stop_disables_peripheral() {
        let m = master(SimDevice::new(0x20));
        m.stop();
        m.with_registers(|r| assert_eq!(r.control, Control::OFF));
        m.set_pullups(Pullups::Off);
        m.with_registers(|r| assert_eq!(r.pullups, Some(Pullups::Off)));
    }
}
