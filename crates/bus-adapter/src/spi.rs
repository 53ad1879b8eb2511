use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::spi::{Mode, MODE_0};

use crate::driver::BusDriver;
use crate::lease::BusLease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordSize {
    Bits8,
    Bits16,
    Bits32,
}

/// Chip-select line, numbered by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipSelect(pub u8);

/// Per-device SPI parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub mode: Mode,
    pub frequency_hz: u32,
    pub word_size: WordSize,
    pub cs: ChipSelect,
}

impl SpiConfig {
    pub const fn new(cs: ChipSelect, frequency_hz: u32) -> Self {
        Self { mode: MODE_0, frequency_hz, word_size: WordSize::Bits8, cs }
    }

    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn word_size(mut self, word_size: WordSize) -> Self {
        self.word_size = word_size;
        self
    }
}

/// SPI controllers also drive chip select outside of transfers.
pub trait SpiDriver: BusDriver<Config = SpiConfig> {
    fn set_cs(&mut self, cs: ChipSelect, active: bool);
}

impl<'l, 'a, M: RawMutex, D: SpiDriver> BusLease<'l, 'a, M, D> {
    /// Assert this device's chip select, e.g. to keep it selected across
    /// several primitives started with `last == false`.
    pub fn activate_cs(&self) {
        let cs = self.device().config().cs;
        self.bus().with_driver(|driver| driver.set_cs(cs, true));
    }

    pub fn deactivate_cs(&self) {
        let cs = self.device().config().cs;
        self.bus().with_driver(|driver| driver.set_cs(cs, false));
    }
}
