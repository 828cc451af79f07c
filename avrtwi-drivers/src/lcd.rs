//! RGB character LCD shield (MCP23017 + HD44780)
//!
//! A 16x2 HD44780 display, its RGB backlight and five push buttons, all
//! hanging off an MCP23017 port expander at I2C address 0x20. The display
//! runs in 4-bit mode, clocked by toggling expander pins.
//!
//! # Pin map
//!
//! | expander | function            |
//! |----------|---------------------|
//! | GPIOB 7  | RS (0 = cmd)        |
//! | GPIOB 6  | R/W (0 = write)     |
//! | GPIOB 5  | Enable              |
//! | GPIOB 4-1| D4..D7              |
//! | GPIOB 0  | blue backlight      |
//! | GPIOA 7  | green backlight     |
//! | GPIOA 6  | red backlight       |
//! | GPIOA 4-0| buttons             |
//!
//! Backlight and buttons are active low.

use core::fmt;

use avrtwi_hal::I2cBus;
use embedded_hal::delay::DelayNs;

/// Expander address on the shield
pub const MCP23017_ADDRESS: u8 = 0x20;

/// MCP23017 registers (IOCON.BANK = 0)
pub mod reg {
    pub const IODIRA: u8 = 0x00;
    pub const IODIRB: u8 = 0x01;
    pub const GPPUA: u8 = 0x0C;
    pub const GPIOA: u8 = 0x12;
    pub const GPIOB: u8 = 0x13;
    pub const OLATA: u8 = 0x14;
    pub const OLATB: u8 = 0x15;
}

/// HD44780 instructions and flags
pub mod cmd {
    pub const CLEAR_DISPLAY: u8 = 0x01;
    pub const RETURN_HOME: u8 = 0x02;
    pub const ENTRY_MODE_SET: u8 = 0x04;
    pub const DISPLAY_CONTROL: u8 = 0x08;
    pub const CURSOR_SHIFT: u8 = 0x10;
    pub const FUNCTION_SET: u8 = 0x20;
    pub const SET_DDRAM_ADDR: u8 = 0x80;

    pub const ENTRY_LEFT: u8 = 0x02;
    pub const ENTRY_SHIFT_INCREMENT: u8 = 0x01;

    pub const DISPLAY_ON: u8 = 0x04;
    pub const CURSOR_ON: u8 = 0x02;
    pub const BLINK_ON: u8 = 0x01;

    pub const DISPLAY_MOVE: u8 = 0x08;
    pub const MOVE_RIGHT: u8 = 0x04;

    pub const FOUR_BIT_MODE: u8 = 0x00;
    pub const TWO_LINE: u8 = 0x08;
    pub const FONT_5X8: u8 = 0x00;
}

const RS: u8 = 1 << 7;
const RW: u8 = 1 << 6;
const EN: u8 = 1 << 5;
const D4: u8 = 4;
const D5: u8 = 3;
const D6: u8 = 2;
const D7: u8 = 1;
const DATA_MASK: u8 = (1 << D4) | (1 << D5) | (1 << D6) | (1 << D7);
const BLUE: u8 = 1 << 0;

const GREEN: u8 = 1 << 7;
const RED: u8 = 1 << 6;
const BUTTON_MASK: u8 = 0x1F;

/// Visible columns per row
pub const COLUMNS: usize = 16;
const ROWS: u8 = 2;
const ROW_OFFSETS: [u8; ROWS as usize] = [0x00, 0x40];
const BLANK_ROW: &str = "                ";

/// Backlight colour; bit 0 red, bit 1 green, bit 2 blue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Color {
    Off = 0x0,
    Red = 0x1,
    Green = 0x2,
    Yellow = 0x3,
    Blue = 0x4,
    Violet = 0x5,
    Teal = 0x6,
    White = 0x7,
}

impl Color {
    const fn bits(self) -> u8 {
        self as u8
    }
}

/// Pressed buttons, one bit each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Buttons(u8);

impl Buttons {
    pub const SELECT: Self = Self(0x01);
    pub const RIGHT: Self = Self(0x02);
    pub const DOWN: Self = Self(0x04);
    pub const UP: Self = Self(0x08);
    pub const LEFT: Self = Self(0x10);

    /// From the raw GPIOA value (buttons pull their pin low)
    pub const fn from_gpio(gpio_a: u8) -> Self {
        Self(!gpio_a & BUTTON_MASK)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Adafruit-style RGB LCD shield
pub struct RgbLcdShield<B, D> {
    bus: B,
    delay: D,
    display_control: u8,
    display_mode: u8,
}

impl<B, D> RgbLcdShield<B, D>
where
    B: I2cBus,
    D: DelayNs,
{
    /// Wrap the bus; call [`init`](Self::init) before use
    pub fn new(bus: B, delay: D) -> Self {
        Self {
            bus,
            delay,
            display_control: 0,
            display_mode: 0,
        }
    }

    /// Give the bus and delay back
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    /// Configure the expander, light the backlight white, and bring the
    /// display up in 4-bit, 2-line mode with the cursor hidden
    pub fn init(&mut self) -> Result<(), B::Error> {
        self.init_expander()?;
        self.set_backlight(Color::White)?;
        self.init_display()
    }

    fn init_expander(&mut self) -> Result<(), B::Error> {
        // GPIOA 0-5 inputs (buttons), everything else outputs
        self.bus
            .write(MCP23017_ADDRESS, &[reg::IODIRA, 0x3F, 0x00])?;
        self.bus
            .write(MCP23017_ADDRESS, &[reg::GPPUA, BUTTON_MASK, 0x00])
    }

    fn init_display(&mut self) -> Result<(), B::Error> {
        self.delay.delay_ms(50);
        let gpio_b = BLUE;
        self.bus.write(MCP23017_ADDRESS, &[reg::GPIOB, gpio_b])?;

        // Force 4-bit mode whatever state the controller was left in
        self.write_nibble(0x03, gpio_b)?;
        self.delay.delay_us(4500);
        self.write_nibble(0x03, gpio_b)?;
        self.delay.delay_us(4500);
        self.write_nibble(0x03, gpio_b)?;
        self.delay.delay_us(150);
        self.write_nibble(0x02, gpio_b)?;

        self.command(cmd::FUNCTION_SET | cmd::FOUR_BIT_MODE | cmd::TWO_LINE | cmd::FONT_5X8)?;
        self.display_control = cmd::DISPLAY_ON;
        self.update_display_control()?;
        self.clear()?;
        self.display_mode = cmd::ENTRY_LEFT;
        self.command(cmd::ENTRY_MODE_SET | self.display_mode)
    }

    /// Present one nibble on D4..D7 and pulse Enable
    fn write_nibble(&mut self, value: u8, gpio_b: u8) -> Result<(), B::Error> {
        let mut out = gpio_b & !DATA_MASK & !EN;
        out |= (value & 0x01) << D4;
        out |= ((value >> 1) & 0x01) << D5;
        out |= ((value >> 2) & 0x01) << D6;
        out |= ((value >> 3) & 0x01) << D7;

        self.bus.write(MCP23017_ADDRESS, &[reg::GPIOB, out])?;
        self.delay.delay_us(1);
        self.bus.write(MCP23017_ADDRESS, &[reg::GPIOB, out | EN])?;
        self.delay.delay_us(1);
        self.bus.write(MCP23017_ADDRESS, &[reg::GPIOB, out])?;
        self.delay.delay_us(100);
        Ok(())
    }

    fn send(&mut self, value: u8, is_command: bool) -> Result<(), B::Error> {
        let mut latch = [0u8; 1];
        self.bus
            .write_read(MCP23017_ADDRESS, &[reg::OLATB], &mut latch)?;
        let mut gpio_b = latch[0] & !RW;
        if is_command {
            gpio_b &= !RS;
        } else {
            gpio_b |= RS;
        }
        self.write_nibble(value >> 4, gpio_b)?;
        self.write_nibble(value & 0x0F, gpio_b)
    }

    fn command(&mut self, value: u8) -> Result<(), B::Error> {
        self.send(value, true)
    }

    fn update_display_control(&mut self) -> Result<(), B::Error> {
        self.command(cmd::DISPLAY_CONTROL | self.display_control)
    }

    fn update_entry_mode(&mut self) -> Result<(), B::Error> {
        self.command(cmd::ENTRY_MODE_SET | self.display_mode)
    }

    /// Blank the display and home the cursor
    pub fn clear(&mut self) -> Result<(), B::Error> {
        self.command(cmd::CLEAR_DISPLAY)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    pub fn home(&mut self) -> Result<(), B::Error> {
        self.command(cmd::RETURN_HOME)?;
        self.delay.delay_ms(2);
        Ok(())
    }

    /// Move the cursor; rows past the last wrap around
    pub fn set_cursor(&mut self, row: u8, col: u8) -> Result<(), B::Error> {
        let offset = ROW_OFFSETS[(row % ROWS) as usize];
        self.command(cmd::SET_DDRAM_ADDR | col.wrapping_add(offset))
    }

    pub fn display_on(&mut self) -> Result<(), B::Error> {
        self.display_control |= cmd::DISPLAY_ON;
        self.update_display_control()
    }

    pub fn display_off(&mut self) -> Result<(), B::Error> {
        self.display_control &= !cmd::DISPLAY_ON;
        self.update_display_control()
    }

    pub fn cursor_on(&mut self) -> Result<(), B::Error> {
        self.display_control |= cmd::CURSOR_ON;
        self.update_display_control()
    }

    pub fn cursor_off(&mut self) -> Result<(), B::Error> {
        self.display_control &= !cmd::CURSOR_ON;
        self.update_display_control()
    }

    pub fn blink_on(&mut self) -> Result<(), B::Error> {
        self.display_control |= cmd::BLINK_ON;
        self.update_display_control()
    }

    pub fn blink_off(&mut self) -> Result<(), B::Error> {
        self.display_control &= !cmd::BLINK_ON;
        self.update_display_control()
    }

    pub fn scroll_left(&mut self) -> Result<(), B::Error> {
        self.command(cmd::CURSOR_SHIFT | cmd::DISPLAY_MOVE)
    }

    pub fn scroll_right(&mut self) -> Result<(), B::Error> {
        self.command(cmd::CURSOR_SHIFT | cmd::DISPLAY_MOVE | cmd::MOVE_RIGHT)
    }

    /// Shift the display, not the cursor, as characters are written
    pub fn autoscroll_on(&mut self) -> Result<(), B::Error> {
        self.display_mode |= cmd::ENTRY_SHIFT_INCREMENT;
        self.update_entry_mode()
    }

    pub fn autoscroll_off(&mut self) -> Result<(), B::Error> {
        self.display_mode &= !cmd::ENTRY_SHIFT_INCREMENT;
        self.update_entry_mode()
    }

    /// Write one character code at the cursor
    pub fn write_byte(&mut self, value: u8) -> Result<(), B::Error> {
        self.send(value, false)
    }

    /// Write `text` at the cursor, returning the bytes written
    pub fn write_str(&mut self, text: &str) -> Result<usize, B::Error> {
        self.write_bytes(text.as_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<usize, B::Error> {
        for &b in bytes {
            self.write_byte(b)?;
        }
        Ok(bytes.len())
    }

    pub fn display_top_row(&mut self, text: &str) -> Result<(), B::Error> {
        self.clear_top_row()?;
        self.set_cursor(0, 0)?;
        self.write_str(text).map(|_| ())
    }

    pub fn display_bottom_row(&mut self, text: &str) -> Result<(), B::Error> {
        self.clear_bottom_row()?;
        self.set_cursor(1, 0)?;
        self.write_str(text).map(|_| ())
    }

    pub fn clear_top_row(&mut self) -> Result<(), B::Error> {
        self.set_cursor(0, 0)?;
        self.write_str(BLANK_ROW).map(|_| ())
    }

    pub fn clear_bottom_row(&mut self) -> Result<(), B::Error> {
        self.set_cursor(1, 0)?;
        self.write_str(BLANK_ROW).map(|_| ())
    }

    /// Set the backlight colour, preserving the other output latches
    pub fn set_backlight(&mut self, color: Color) -> Result<(), B::Error> {
        let mut latch = [0u8; 2];
        self.bus
            .write_read(MCP23017_ADDRESS, &[reg::OLATA], &mut latch)?;
        let bits = color.bits();

        let mut gpio_a = latch[0] & !(GREEN | RED);
        if bits & 0x02 == 0 {
            gpio_a |= GREEN;
        }
        if bits & 0x01 == 0 {
            gpio_a |= RED;
        }
        let mut gpio_b = latch[1] & !BLUE;
        if bits & 0x04 == 0 {
            gpio_b |= BLUE;
        }
        self.bus
            .write(MCP23017_ADDRESS, &[reg::GPIOA, gpio_a, gpio_b])
    }

    /// Currently pressed buttons
    pub fn read_buttons(&mut self) -> Result<Buttons, B::Error> {
        let mut gpio_a = [0u8; 1];
        self.bus
            .write_read(MCP23017_ADDRESS, &[reg::GPIOA], &mut gpio_a)?;
        Ok(Buttons::from_gpio(gpio_a[0]))
    }
}

impl<B, D> fmt::Write for RgbLcdShield<B, D>
where
    B: I2cBus,
    D: DelayNs,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        RgbLcdShield::write_str(self, s)
            .map(|_| ())
            .map_err(|_| fmt::Error)
    }
}
