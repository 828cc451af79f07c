//! ATmega TWI binding for avrtwi
//!
//! Implements [`avrtwi_hal::TwiRegisters`] on top of the `avr-device`
//! peripheral access crate for the two supported targets:
//!
//! | feature      | board        | SDA | SCL |
//! |--------------|--------------|-----|-----|
//! | `atmega328p` | Arduino Uno  | PC4 | PC5 |
//! | `atmega2560` | Arduino Mega | PD1 | PD0 |
//!
//! The TWI interrupt vector is owned by the application, which forwards it
//! to the one engine it constructed:
//!
//! ```ignore
//! static BUS: BusRole<'static, AvrTwi, Delay, Handler> = /* ... */;
//!
//! #[avr_device::interrupt(atmega328p)]
//! fn TWI() {
//!     BUS.on_interrupt();
//! }
//! ```

#![no_std]
#![allow(unused_unsafe)]

#[cfg(not(any(feature = "atmega328p", feature = "atmega2560")))]
compile_error!("select a chip: enable either the `atmega328p` or the `atmega2560` feature");

#[cfg(all(feature = "atmega328p", feature = "atmega2560"))]
compile_error!("the `atmega328p` and `atmega2560` features are mutually exclusive");

use avrtwi_hal::twi::STATUS_MASK;
use avrtwi_hal::{Control, Pullups, TwiRegisters};

#[cfg(feature = "atmega328p")]
use avr_device::atmega328p::{PORTC as BusPort, TWI};

#[cfg(feature = "atmega2560")]
use avr_device::atmega2560::{PORTD as BusPort, TWI};

/// SDA/SCL bits in the bus port
#[cfg(feature = "atmega328p")]
const PIN_MASK: u8 = (1 << 4) | (1 << 5);

#[cfg(feature = "atmega2560")]
const PIN_MASK: u8 = (1 << 1) | (1 << 0);

/// Prescaler bits TWPS1:0 in TWSR
const PRESCALER_MASK: u8 = 0x03;

/// The TWI peripheral plus the port that carries SDA/SCL
pub struct AvrTwi {
    twi: TWI,
    port: BusPort,
}

impl AvrTwi {
    /// Take ownership of the TWI peripheral and the bus port
    pub fn new(twi: TWI, port: BusPort) -> Self {
        Self { twi, port }
    }

    /// Give the peripherals back
    pub fn release(self) -> (TWI, BusPort) {
        (self.twi, self.port)
    }

    #[cfg(feature = "atmega328p")]
    fn write_port(&mut self, on: bool) {
        self.port.portc.modify(|r, w| unsafe {
            if on {
                w.bits(r.bits() | PIN_MASK)
            } else {
                w.bits(r.bits() & !PIN_MASK)
            }
        });
    }

    #[cfg(feature = "atmega2560")]
    fn write_port(&mut self, on: bool) {
        self.port.portd.modify(|r, w| unsafe {
            if on {
                w.bits(r.bits() | PIN_MASK)
            } else {
                w.bits(r.bits() & !PIN_MASK)
            }
        });
    }
}

impl TwiRegisters for AvrTwi {
    fn status(&self) -> u8 {
        self.twi.twsr.read().bits() & STATUS_MASK
    }

    fn data(&self) -> u8 {
        self.twi.twdr.read().bits()
    }

    fn set_data(&mut self, byte: u8) {
        self.twi.twdr.write(|w| unsafe { w.bits(byte) });
    }

    fn control(&self) -> Control {
        Control::from_bits(self.twi.twcr.read().bits())
    }

    fn set_control(&mut self, control: Control) {
        self.twi.twcr.write(|w| unsafe { w.bits(control.bits()) });
    }

    fn set_bit_rate(&mut self, bit_rate: u8) {
        self.twi.twbr.write(|w| unsafe { w.bits(bit_rate) });
        self.twi
            .twsr
            .modify(|r, w| unsafe { w.bits(r.bits() & !PRESCALER_MASK) });
    }

    fn set_own_address(&mut self, twar: u8) {
        self.twi.twar.write(|w| unsafe { w.bits(twar) });
    }

    fn set_pullups(&mut self, pullups: Pullups) {
        self.write_port(pullups == Pullups::On);
    }
}
