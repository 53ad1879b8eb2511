use crate::driver::BusDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
    High = 3_400_000,
}

impl I2cSpeed {
    pub const fn hz(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cAddress {
    SevenBit(u8),
    TenBit(u16),
}

/// Per-device I2C parameters: the target address and the clock it can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    pub address: I2cAddress,
    pub speed: I2cSpeed,
}

impl I2cConfig {
    pub const fn new(address: u8) -> Self {
        Self { address: I2cAddress::SevenBit(address), speed: I2cSpeed::Standard }
    }

    pub const fn ten_bit(address: u16) -> Self {
        Self { address: I2cAddress::TenBit(address), speed: I2cSpeed::Standard }
    }

    #[must_use]
    pub const fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
}

/// I2C controllers need nothing beyond [`BusDriver`]; `last` on a primitive
/// means "issue STOP".
pub trait I2cDriver: BusDriver<Config = I2cConfig> {}

impl<T: BusDriver<Config = I2cConfig>> I2cDriver for T {}
