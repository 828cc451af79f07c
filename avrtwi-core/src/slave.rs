//! TWI slave engine
//!
//! Responds to a remote master addressing this device. A write from the
//! master is collected into one buffer of `B` bytes; on stop the buffer is
//! handed to a [`MessageHandler`], which may leave a response in the same
//! buffer. The next read from the master is served from that response,
//! padded with 0xFF once it runs out.

use core::cell::RefCell;
use core::fmt::Write;

use avrtwi_hal::twi::{bit_rate, TwiStatus};
use avrtwi_hal::{Control, Pullups, TwiRegisters};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::SlaveConfig;
use crate::diary::{Diary, Step, DIARY_DEPTH};
use crate::status::{SlaveStatus, SlaveStatusCell};

/// Default receive/response buffer size
pub const SLAVE_BUFFER: usize = 32;

/// Byte sent when the master reads past the response
pub const FILLER: u8 = 0xFF;

/// Application hook run when a message from the master is complete
///
/// Called from interrupt context with the engine locked, so it must return
/// quickly. `buffer` holds `received` bytes; the handler may overwrite it
/// with a response and returns the response length (0 for none).
pub trait MessageHandler {
    fn process_message(&mut self, buffer: &mut [u8], received: usize) -> usize;
}

impl<F> MessageHandler for F
where
    F: FnMut(&mut [u8], usize) -> usize,
{
    fn process_message(&mut self, buffer: &mut [u8], received: usize) -> usize {
        self(buffer, received)
    }
}

struct SlaveState<R, H, const B: usize, const L: usize> {
    regs: R,
    handler: H,
    buffer: [u8; B],
    /// Next byte to store or send
    index: usize,
    /// Length of the pending response
    msg_size: usize,
    busy: bool,
    diary: Diary<L>,
}

/// Interrupt-driven TWI slave
///
/// `B` is the message buffer size and `L` the diary depth.
pub struct Slave<R, H, const B: usize = SLAVE_BUFFER, const L: usize = DIARY_DEPTH> {
    state: Mutex<CriticalSectionRawMutex, RefCell<SlaveState<R, H, B, L>>>,
    status: SlaveStatusCell,
    config: SlaveConfig,
}

impl<R, H, const B: usize, const L: usize> Slave<R, H, B, L>
where
    R: TwiRegisters,
    H: MessageHandler,
{
    pub const fn new(regs: R, handler: H, config: SlaveConfig) -> Self {
        Self {
            state: Mutex::new(RefCell::new(SlaveState {
                regs,
                handler,
                buffer: [0; B],
                index: 0,
                msg_size: 0,
                busy: false,
                diary: Diary::new(config.diary),
            })),
            status: SlaveStatusCell::new(SlaveStatus::CompletedOk),
            config,
        }
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    /// Load the own address and start listening
    pub fn start(&self) {
        let cfg = self.config;
        self.status.set(SlaveStatus::CompletedOk);
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.busy = false;
            s.index = 0;
            s.msg_size = 0;
            s.regs.set_pullups(cfg.pullups);
            s.regs.set_own_address(cfg.own_address_register());
            s.regs.set_data(FILLER);
            s.regs.set_bit_rate(bit_rate(cfg.cpu_hz, cfg.speed));
            s.regs.set_control(Control::ARMED);
        });
        debug!("twi slave listening at {=u8:#x}", cfg.address);
    }

    /// Disable the peripheral
    pub fn stop(&self) {
        self.state.lock(|s| s.borrow_mut().regs.set_control(Control::OFF));
    }

    pub fn set_pullups(&self, pullups: Pullups) {
        self.state.lock(|s| s.borrow_mut().regs.set_pullups(pullups));
    }

    /// An addressed exchange is in progress
    pub fn busy(&self) -> bool {
        self.state.lock(|s| s.borrow().busy)
    }

    /// Outcome of the most recent exchange
    pub fn status(&self) -> SlaveStatus {
        self.status.get()
    }

    /// TWI interrupt handler
    pub fn on_interrupt(&self) {
        self.state.lock(|s| self.step(&mut s.borrow_mut()));
    }

    fn step(&self, s: &mut SlaveState<R, H, B, L>) {
        let raw = s.regs.status();
        let Some(status) = TwiStatus::from_raw(raw) else {
            self.error(s, raw);
            return;
        };

        match status {
            TwiStatus::StSlaAck | TwiStatus::StArbLostSlaAck => {
                s.index = 0;
                self.begin(s);
                self.transmit(s, Step::StartTransmit, raw);
            }

            TwiStatus::StDataAck => {
                self.status.set(SlaveStatus::InProgress);
                s.busy = true;
                self.transmit(s, Step::TransmitByte, raw);
            }

            TwiStatus::StDataNack => {
                if s.index == s.msg_size {
                    s.diary.record(0, Step::NackOk, raw);
                    self.status.set(SlaveStatus::CompletedOk);
                } else {
                    debug!("master stopped reading at {=usize} of {=usize}", s.index, s.msg_size);
                    s.diary.record(0, Step::NackEarly, raw);
                    self.status.set(SlaveStatus::TxPartial);
                }
                self.standby(s);
            }

            TwiStatus::SrSlaAck | TwiStatus::SrArbLostSlaAck => {
                s.index = 0;
                self.begin(s);
                s.diary.record(0, Step::StartReceive, raw);
                s.regs.set_control(Control::RECEIVE_ACK);
            }

            TwiStatus::SrGcallAck | TwiStatus::SrArbLostGcallAck => {
                s.index = 0;
                self.begin(s);
                s.diary.record(0, Step::StartGeneralCall, raw);
                s.regs.set_control(Control::RECEIVE_ACK);
            }

            TwiStatus::SrDataAck | TwiStatus::SrGcallDataAck => {
                let byte = s.regs.data();
                if s.index < B {
                    s.buffer[s.index] = byte;
                    s.index += 1;
                } else {
                    self.status.set(SlaveStatus::RxOverflow);
                }
                if s.index < B {
                    s.diary.record(byte, Step::ByteReceived, raw);
                    s.regs.set_control(Control::RECEIVE_ACK);
                } else {
                    // Buffer full: refuse whatever comes next
                    s.diary.record(byte, Step::LastByteReceived, raw);
                    s.regs.set_control(Control::RECEIVE_NACK);
                }
            }

            TwiStatus::SrDataNack | TwiStatus::SrGcallDataNack => {
                // No stop follows a refused byte, so deliver the message now
                debug!("slave receive overflow after {=usize} bytes", s.index);
                s.diary.record(s.regs.data(), Step::Overflow, raw);
                self.status.set(SlaveStatus::RxOverflow);
                self.deliver(s);
                self.standby(s);
            }

            TwiStatus::SrStop => {
                self.deliver(s);
                if self.status.get() == SlaveStatus::InProgress {
                    s.diary.record(0, Step::StopWhileInProgress, raw);
                    self.status.set(SlaveStatus::CompletedOk);
                } else {
                    s.diary.record(0, Step::StopOtherwise, raw);
                }
                self.standby(s);
            }

            _ => self.error(s, raw),
        }
    }

    fn begin(&self, s: &mut SlaveState<R, H, B, L>) {
        s.busy = true;
        self.status.set(SlaveStatus::InProgress);
    }

    /// Load the next response byte, or filler once the response is spent
    fn transmit(&self, s: &mut SlaveState<R, H, B, L>, step: Step, raw: u8) {
        if s.index < s.msg_size {
            let byte = s.buffer[s.index];
            s.index += 1;
            s.diary.record(byte, step, raw);
            s.regs.set_data(byte);
        } else {
            s.diary.record(FILLER, Step::TransmitFiller, raw);
            s.regs.set_data(FILLER);
        }
        s.regs.set_control(Control::SEND_BYTE);
    }

    /// Hand the received bytes to the application and keep its response
    fn deliver(&self, s: &mut SlaveState<R, H, B, L>) {
        let SlaveState {
            handler,
            buffer,
            index,
            msg_size,
            ..
        } = s;
        *msg_size = handler.process_message(buffer, *index).min(B);
        *index = 0;
    }

    fn standby(&self, s: &mut SlaveState<R, H, B, L>) {
        s.busy = false;
        s.regs.set_control(Control::ARMED);
    }

    fn error(&self, s: &mut SlaveState<R, H, B, L>, raw: u8) {
        warn!("twi slave error status {=u8:#x}", raw);
        s.diary.record(0, Step::ErrorStandby, raw);
        self.status.set(SlaveStatus::Error(raw));
        self.standby(s);
    }

    /// Run `f` on the register block with the engine locked
    pub fn with_registers<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        self.state.lock(|s| f(&mut s.borrow_mut().regs))
    }

    /// Run `f` on the message handler with the engine locked
    pub fn with_handler<T>(&self, f: impl FnOnce(&mut H) -> T) -> T {
        self.state.lock(|s| f(&mut s.borrow_mut().handler))
    }

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
    /// The peripheral is switched off while printing so a slow sink does
    /// not hold the bus, then re-armed.
    pub fn dump_diary<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.regs.set_control(Control::INT);
            let result = s.diary.dump(out);
            s.regs.set_control(Control::ARMED);
            result
        })
    }
}
