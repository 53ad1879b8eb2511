use embedded_hal::i2c::NoAcknowledgeSource;

/// Hardware-reported reason for a failed transfer.
///
/// Drivers translate their controller's abort/status registers into this
/// enum; the adapters hand it back verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortSource {
    /// I2C target did not acknowledge its address.
    AddressNack,
    /// I2C target did not acknowledge a data byte.
    DataNack,
    /// Another controller won bus arbitration.
    ArbitrationLost,
    /// Transmit FIFO ran dry mid-transfer.
    Underflow,
    /// Receive FIFO overflowed before it was drained.
    Overflow,
    /// UART framing error.
    Framing,
    /// UART parity error.
    Parity,
    /// UART break condition detected.
    Break,
    /// Controller-specific code with no portable meaning.
    Other(u16),
}

impl core::fmt::Display for AbortSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AbortSource::AddressNack => write!(f, "address not acknowledged"),
            AbortSource::DataNack => write!(f, "data not acknowledged"),
            AbortSource::ArbitrationLost => write!(f, "arbitration lost"),
            AbortSource::Underflow => write!(f, "transmit FIFO underflow"),
            AbortSource::Overflow => write!(f, "receive FIFO overflow"),
            AbortSource::Framing => write!(f, "framing error"),
            AbortSource::Parity => write!(f, "parity error"),
            AbortSource::Break => write!(f, "break condition"),
            AbortSource::Other(code) => write!(f, "abort source {:#06x}", code),
        }
    }
}

impl embedded_hal::i2c::Error for AbortSource {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::ErrorKind;
        match self {
            AbortSource::AddressNack => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            AbortSource::DataNack => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)
            }
            AbortSource::ArbitrationLost => ErrorKind::ArbitrationLoss,
            AbortSource::Underflow | AbortSource::Overflow => ErrorKind::Overrun,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::spi::Error for AbortSource {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        use embedded_hal::spi::ErrorKind;
        match self {
            AbortSource::Underflow | AbortSource::Overflow => ErrorKind::Overrun,
            AbortSource::Framing => ErrorKind::FrameFormat,
            _ => ErrorKind::Other,
        }
    }
}

/// Errors raised while building an asynchronous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransactionError {
    /// More actions than a bus can buffer, end marker included.
    CapacityExceeded,
}

impl core::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransactionError::CapacityExceeded => {
                write!(f, "transaction does not fit the bus action buffer")
            }
        }
    }
}
