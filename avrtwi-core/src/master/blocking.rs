//! Blocking facade over the master queue
//!
//! Each call submits one transaction that reports into the queue's own
//! status cell and receive buffer, then spins until the engine resolves it.
//! Received bytes are copied out afterwards, so one read is limited to the
//! queue's payload size `M`.

use avrtwi_hal::{I2cBus, TwiRegisters};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorType, I2c, Operation};

use super::{with_register, Master};
use crate::error::{SubmitError, TwiError};
use crate::queue::{Transaction, TxMode};
use crate::status::BusStatus;

impl<'a, R, D, const N: usize, const M: usize, const L: usize> Master<'a, R, D, N, M, L>
where
    R: TwiRegisters,
    D: DelayNs,
{
    /// Write one byte and wait for the outcome
    pub fn write_register(&self, address: u8, register: u8) -> Result<(), TwiError> {
        self.write(address, &[register])
    }

    /// Write a register address and one data byte, then wait
    pub fn write_register_byte(&self, address: u8, register: u8, data: u8) -> Result<(), TwiError> {
        self.write(address, &[register, data])
    }

    /// Write a register address followed by `data`, then wait
    pub fn write_register_bytes(&self, address: u8, register: u8, data: &[u8]) -> Result<(), TwiError> {
        let payload = with_register::<M>(register, data)?;
        self.write(address, &payload)
    }

    /// Write a register address followed by the bytes of `text`, then wait
    pub fn write_str(&self, address: u8, register: u8, text: &str) -> Result<(), TwiError> {
        self.write_register_bytes(address, register, text.as_bytes())
    }

    /// Write `data` as-is, then wait
    pub fn write(&self, address: u8, data: &[u8]) -> Result<(), TwiError> {
        self.transact(address, TxMode::Write, data, &mut [])
    }

    /// Fill `buf` from `address`
    pub fn read(&self, address: u8, buf: &mut [u8]) -> Result<(), TwiError> {
        self.transact(address, TxMode::Read, &[], buf)
    }

    /// Write a register address, then fill `buf` after a repeated start
    pub fn read_register(&self, address: u8, register: u8, buf: &mut [u8]) -> Result<(), TwiError> {
        self.write_read(address, &[register], buf)
    }

    /// Write `data`, then fill `buf`, in one bus transaction
    pub fn write_read(&self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<(), TwiError> {
        self.transact(address, TxMode::WriteThenRead, data, buf)
    }

    fn transact(
        &self,
        address: u8,
        mode: TxMode,
        payload: &[u8],
        buf: &mut [u8],
    ) -> Result<(), TwiError> {
        let rx_len = if mode.reads() {
            if buf.is_empty() || buf.len() > M {
                return Err(SubmitError::ReadWithoutStorage.into());
            }
            buf.len() as u8
        } else {
            0
        };

        self.claim()?;
        let result = self.run_claimed(Transaction::internal(address, mode, payload, rx_len), buf);
        self.state.lock(|s| s.borrow_mut().sync_claimed = false);
        result
    }

    fn run_claimed(&self, tx: Transaction<'a, '_>, buf: &mut [u8]) -> Result<(), TwiError> {
        self.submit(tx)?;

        let mut polls = 0;
        let outcome = loop {
            let status = self.state.lock(|s| s.borrow().queue.own_status());
            if !status.is_pending() {
                break status;
            }
            self.wait_tick(&mut polls)?;
        };

        match outcome {
            BusStatus::CompletedOk => {
                if !buf.is_empty() {
                    self.state.lock(|s| s.borrow().queue.copy_own_rx(buf));
                }
                Ok(())
            }
            BusStatus::Error(raw) => Err(TwiError::Bus(raw)),
            BusStatus::NotStarted | BusStatus::InProgress => Err(SubmitError::Timeout.into()),
        }
    }

    /// Take the queue's own cells; waits out a previous request that timed
    /// out but is still on the bus
    fn claim(&self) -> Result<(), SubmitError> {
        let mut polls = 0;
        loop {
            let claimed = self.state.lock(|s| {
                let mut s = s.borrow_mut();
                if s.sync_claimed || s.queue.own_status().is_pending() {
                    false
                } else {
                    s.sync_claimed = true;
                    true
                }
            });
            if claimed {
                return Ok(());
            }
            self.wait_tick(&mut polls)?;
        }
    }
}

impl<'a, R, D, const N: usize, const M: usize, const L: usize> I2cBus for Master<'a, R, D, N, M, L>
where
    R: TwiRegisters,
    D: DelayNs,
{
    type Error = TwiError;

    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), TwiError> {
        Master::write(self, address, data)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), TwiError> {
        Master::read(self, address, buf)
    }

    fn write_read(&mut self, address: u8, write_data: &[u8], read_buf: &mut [u8]) -> Result<(), TwiError> {
        Master::write_read(self, address, write_data, read_buf)
    }
}

/// Drivers can share one master by reference
impl<'m, 'a, R, D, const N: usize, const M: usize, const L: usize> I2cBus for &'m Master<'a, R, D, N, M, L>
where
    R: TwiRegisters,
    D: DelayNs,
{
    type Error = TwiError;

    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), TwiError> {
        Master::write(*self, address, data)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), TwiError> {
        Master::read(*self, address, buf)
    }

    fn write_read(&mut self, address: u8, write_data: &[u8], read_buf: &mut [u8]) -> Result<(), TwiError> {
        Master::write_read(*self, address, write_data, read_buf)
    }
}

impl<'a, R, D, const N: usize, const M: usize, const L: usize> ErrorType for Master<'a, R, D, N, M, L> {
    type Error = TwiError;
}

impl<'a, R, D, const N: usize, const M: usize, const L: usize> I2c for Master<'a, R, D, N, M, L>
where
    R: TwiRegisters,
    D: DelayNs,
{
    /// Supports the shapes one queued transaction can express: a write, a
    /// read, or a write followed by a read
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), TwiError> {
        match operations {
            [] => Ok(()),
            [Operation::Write(data)] => Master::write(self, address, data),
            [Operation::Read(buf)] => Master::read(self, address, buf),
            [Operation::Write(data), Operation::Read(buf)] => {
                Master::write_read(self, address, data, buf)
            }
            _ => Err(SubmitError::UnsupportedOperation.into()),
        }
    }
}
