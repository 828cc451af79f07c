//! Engine decision trace
//!
//! Each interrupt step can record the byte it handled, the decision it
//! made, and the hardware status that triggered it. The ring keeps the
//! most recent `D` entries.

use core::fmt::Write;

use heapless::HistoryBuffer;

/// Default ring depth
pub const DIARY_DEPTH: usize = 32;

/// Decision taken by an engine for one interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    // Master
    SentAddressWrite,
    SentAddressRead,
    SendNextByte,
    RestartSameMessage,
    RestartNextMessage,
    Finished,
    ReadAckAfterAddress,
    ReadNackAfterAddress,
    ReceiveAck,
    ReceiveNack,
    ReceiveDoneRestart,
    ReceiveDoneStop,
    ArbitrationLostRestart,
    RetryStart,
    RetryExhausted,
    ErrorStopStart,
    ErrorStop,

    // Slave
    StartTransmit,
    TransmitByte,
    TransmitFiller,
    NackOk,
    NackEarly,
    StartReceive,
    StartGeneralCall,
    ByteReceived,
    LastByteReceived,
    Overflow,
    StopWhileInProgress,
    StopOtherwise,
    ErrorStandby,
}

/// One recorded interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiaryEntry {
    /// Byte sent or received, 0 when none
    pub content: u8,
    pub step: Step,
    /// Hardware status that raised the interrupt
    pub status: u8,
}

/// Ring of recent engine decisions
pub struct Diary<const D: usize = DIARY_DEPTH> {
    enabled: bool,
    entries: HistoryBuffer<DiaryEntry, D>,
}

impl<const D: usize> Diary<D> {
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: HistoryBuffer::new(),
        }
    }

    /// Recording switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn record(&mut self, content: u8, step: Step, status: u8) {
        if self.enabled {
            self.entries.write(DiaryEntry {
                content,
                step,
                status,
            });
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &DiaryEntry> {
        self.entries.oldest_ordered()
    }

    /// Print the ring as `#, status, content, char, step` lines
    pub fn dump<W: Write>(&self, out: &mut W) -> core::fmt::Result {
        writeln!(out, "I2C diary follows...")?;
        writeln!(out, "#, status, content, char, step")?;
        for (i, entry) in self.entries().enumerate() {
            let shown = if entry.content.is_ascii_graphic() || entry.content == b' ' {
                entry.content as char
            } else {
                '.'
            };
            writeln!(
                out,
                "{}, {:#04x}, {}, {}, {:?}",
                i, entry.status, entry.content, shown, entry.step
            )?;
        }
        Ok(())
    }
}
