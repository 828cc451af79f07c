//! One TWI peripheral, one role
//!
//! Master and slave engines both own the TWI interrupt, so a device runs
//! exactly one of them. [`BusRole`] holds whichever was chosen and
//! dispatches the vector to it.

use avrtwi_hal::{Pullups, TwiRegisters};
use embedded_hal::delay::DelayNs;

use crate::diary::DIARY_DEPTH;
use crate::master::{Master, MAX_PAYLOAD, QUEUE_SLOTS};
use crate::slave::{MessageHandler, Slave, SLAVE_BUFFER};

/// Plain function handler, the default for master-only builds
pub type HandlerFn = fn(&mut [u8], usize) -> usize;

/// The engine bound to the TWI vector
pub enum BusRole<
    'a,
    R,
    D,
    H = HandlerFn,
    const N: usize = QUEUE_SLOTS,
    const M: usize = MAX_PAYLOAD,
    const B: usize = SLAVE_BUFFER,
    const L: usize = DIARY_DEPTH,
> {
    Master(Master<'a, R, D, N, M, L>),
    Slave(Slave<R, H, B, L>),
}

impl<'a, R, D, H, const N: usize, const M: usize, const B: usize, const L: usize>
    BusRole<'a, R, D, H, N, M, B, L>
where
    R: TwiRegisters,
    D: DelayNs,
    H: MessageHandler,
{
    /// Forward the TWI interrupt to the active engine
    pub fn on_interrupt(&self) {
        match self {
            BusRole::Master(m) => m.on_interrupt(),
            BusRole::Slave(s) => s.on_interrupt(),
        }
    }

    pub fn start(&self) {
        match self {
            BusRole::Master(m) => m.start(),
            BusRole::Slave(s) => s.start(),
        }
    }

    pub fn stop(&self) {
        match self {
            BusRole::Master(m) => m.stop(),
            BusRole::Slave(s) => s.stop(),
        }
    }

    pub fn set_pullups(&self, pullups: Pullups) {
        match self {
            BusRole::Master(m) => m.set_pullups(pullups),
            BusRole::Slave(s) => s.set_pullups(pullups),
        }
    }

    pub fn busy(&self) -> bool {
        match self {
            BusRole::Master(m) => m.busy(),
            BusRole::Slave(s) => s.busy(),
        }
    }

    pub fn as_master(&self) -> Option<&Master<'a, R, D, N, M, L>> {
        match self {
            BusRole::Master(m) => Some(m),
            BusRole::Slave(_) => None,
        }
    }

    pub fn as_slave(&self) -> Option<&Slave<R, H, B, L>> {
        match self {
            BusRole::Slave(s) => Some(s),
            BusRole::Master(_) => None,
        }
    }
}
