//! Simulated TWI peripheral for host tests
//!
//! [`SimTwi`] stands in for the register block. Every control word the
//! engine writes is logged. When the word starts a bus operation,
//! [`SimTwi::advance`] computes the status the hardware would report next,
//! playing one simulated slave device on the far side of the bus, and tells
//! the caller whether an interrupt is due.

use avrtwi_hal::twi::TwiStatus;
use avrtwi_hal::{Control, Pullups, TwiRegisters};

/// Slave device on the far end of a simulated bus
#[derive(Debug, Default)]
pub struct SimDevice {
    /// Addresses that acknowledge
    pub present: Vec<u8>,
    /// Refuse the address on every attempt
    pub nack_address: bool,
    /// NACK the data byte with this zero-based index within one write
    pub nack_data_at: Option<usize>,
    /// Bytes returned to reads, 0xFF once exhausted
    pub response: Vec<u8>,
    /// Arbitration losses still to inject on address bytes
    pub arbitration_losses: u8,
    /// SLA+R bytes still to refuse
    pub read_address_nacks: u8,
    /// Every address byte seen (SLA+R/W)
    pub addressed: Vec<u8>,
    /// Every data byte acknowledged
    pub written: Vec<u8>,
    read_index: usize,
    write_index: usize,
}

impl SimDevice {
    pub fn new(address: u8) -> Self {
        Self {
            present: vec![address],
            ..Self::default()
        }
    }

    pub fn responding(mut self, bytes: &[u8]) -> Self {
        self.response = bytes.to_vec();
        self
    }

    pub fn also_at(mut self, address: u8) -> Self {
        self.present.push(address);
        self
    }
}

/// Register block backed by memory
#[derive(Debug, Default)]
pub struct SimTwi {
    pub status: u8,
    pub data: u8,
    pub control: Control,
    pub bit_rate: u8,
    pub own_address: u8,
    pub pullups: Option<Pullups>,
    /// Control words in write order
    pub log: Vec<Control>,
    pub device: SimDevice,
    /// Master holds the bus (between start and stop)
    owned: bool,
    /// A control word with TWINT set has not been acted on yet
    armed: bool,
    /// Last address or data byte the engine loaded
    last_loaded: Option<u8>,
}

impl SimTwi {
    pub fn new() -> Self {
        Self {
            status: TwiStatus::NoInfo.raw(),
            ..Self::default()
        }
    }

    pub fn with_device(device: SimDevice) -> Self {
        Self {
            device,
            ..Self::new()
        }
    }

    /// Act on the last control word; true if the interrupt should fire
    pub fn advance(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.armed = false;
        let control = self.control;
        if !control.contains(Control::IE) {
            return false;
        }

        let previous = TwiStatus::from_raw(self.status);
        let next = if control.contains(Control::STA) {
            let status = if self.owned {
                TwiStatus::RepeatedStart
            } else {
                TwiStatus::Start
            };
            self.owned = true;
            self.device.write_index = 0;
            self.device.read_index = 0;
            status
        } else {
            match previous {
                Some(TwiStatus::Start) | Some(TwiStatus::RepeatedStart) => self.address_phase(),
                Some(TwiStatus::MtSlaAck) | Some(TwiStatus::MtDataAck) => self.write_phase(),
                Some(TwiStatus::MrSlaAck) | Some(TwiStatus::MrDataAck) => {
                    self.read_phase(control.contains(Control::EA))
                }
                _ => TwiStatus::BusError,
            }
        };
        self.status = next.raw();
        true
    }

    fn address_phase(&mut self) -> TwiStatus {
        let sla = self.last_loaded.take().unwrap_or(0);
        let read = sla & 1 == 1;
        self.device.addressed.push(sla);

        if self.device.arbitration_losses > 0 {
            self.device.arbitration_losses -= 1;
            self.owned = false;
            return TwiStatus::ArbitrationLost;
        }
        if read && self.device.read_address_nacks > 0 {
            self.device.read_address_nacks -= 1;
            return TwiStatus::MrSlaNack;
        }
        let present = self.device.present.contains(&(sla >> 1));
        match (present && !self.device.nack_address, read) {
            (true, false) => TwiStatus::MtSlaAck,
            (true, true) => TwiStatus::MrSlaAck,
            (false, false) => TwiStatus::MtSlaNack,
            (false, true) => TwiStatus::MrSlaNack,
        }
    }

    fn write_phase(&mut self) -> TwiStatus {
        let byte = self.last_loaded.take().unwrap_or(0);
        let index = self.device.write_index;
        self.device.write_index += 1;
        if self.device.nack_data_at == Some(index) {
            TwiStatus::MtDataNack
        } else {
            self.device.written.push(byte);
            TwiStatus::MtDataAck
        }
    }

    fn read_phase(&mut self, ack: bool) -> TwiStatus {
        self.data = self
            .device
            .response
            .get(self.device.read_index)
            .copied()
            .unwrap_or(0xFF);
        self.device.read_index += 1;
        if ack {
            TwiStatus::MrDataAck
        } else {
            TwiStatus::MrDataNack
        }
    }

    /// Number of start conditions the engine issued
    pub fn starts(&self) -> usize {
        self.log
            .iter()
            .filter(|c| c.contains(Control::STA))
            .count()
    }

    /// Script a slave-side event: the next interrupt reports `status`
    /// with `data` in the data register
    pub fn inject(&mut self, status: TwiStatus, data: u8) {
        if status == TwiStatus::ArbitrationLost {
            self.owned = false;
        }
        self.status = status.raw();
        self.data = data;
    }
}

impl TwiRegisters for SimTwi {
    fn status(&self) -> u8 {
        self.status
    }

    fn data(&self) -> u8 {
        self.data
    }

    fn set_data(&mut self, byte: u8) {
        self.data = byte;
        self.last_loaded = Some(byte);
    }

    fn control(&self) -> Control {
        self.control
    }

    fn set_control(&mut self, control: Control) {
        self.log.push(control);
        if control.contains(Control::STO) {
            // Stop completes immediately on the simulated bus
            self.owned = false;
        }
        self.control = control.without(Control::STO);
        self.armed = control.contains(Control::INT);
    }

    fn set_bit_rate(&mut self, bit_rate: u8) {
        self.bit_rate = bit_rate;
    }

    fn set_own_address(&mut self, twar: u8) {
        self.own_address = twar;
    }

    fn set_pullups(&mut self, pullups: Pullups) {
        self.pullups = Some(pullups);
    }
}

/// Delay that returns immediately, counting requested microseconds
#[derive(Debug, Default)]
pub struct NoDelay {
    pub total_ns: u64,
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}
