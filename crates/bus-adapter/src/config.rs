//! Static configuration of buses and devices.
//!
//! Everything here is `const`-constructible so a board can place the whole
//! adapter setup in statics. The option structs play the role of build-time
//! switches: each bus carries its own copy, fixed at construction.

use resource_manager::{ResourceId, ResourceMask};

/// Which physical controller a bus context drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusId {
    I2c(u8),
    Spi(u8),
    Uart(u8),
}

impl BusId {
    pub const fn is_uart(self) -> bool {
        matches!(self, BusId::Uart(_))
    }
}

/// Arbitration lanes of a bus.
///
/// I2C and SPI only use [`Lane::Frame`]. UART arbitrates its transmitter and
/// receiver independently and uses the frame resource to guard
/// reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lane {
    Frame = 0,
    Tx = 1,
    Rx = 2,
}

impl Lane {
    pub(crate) const COUNT: usize = 3;

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Per-bus behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusOptions {
    /// Exactly one device lives on this bus. Its configuration is applied at
    /// open time and bus arbitration collapses to counting.
    pub dedicated: bool,
    /// A device is acquired for the whole lifetime of its open handle.
    pub exclusive_open: bool,
    /// Arbitrate through the resource manager. Disable only when a single
    /// task ever touches the bus.
    pub use_resource_manager: bool,
    /// Co-acquire the DMA channel resource of devices that have one.
    pub dma_resource_manager: bool,
    /// Issue write-then-read as one chained primitive inside a critical
    /// section. Some I2C targets misbehave if they observe a STOP between the
    /// phases.
    pub atomic_write_read: bool,
    /// UART only: before sleeping, deassert RTS and check for a character
    /// racing in from the host.
    pub quiesce_rts_on_sleep: bool,
}

impl BusOptions {
    pub const fn new() -> Self {
        Self {
            dedicated: false,
            exclusive_open: false,
            use_resource_manager: true,
            dma_resource_manager: true,
            atomic_write_read: false,
            quiesce_rts_on_sleep: false,
        }
    }

    #[must_use]
    pub const fn dedicated(mut self, enabled: bool) -> Self {
        self.dedicated = enabled;
        self
    }

    #[must_use]
    pub const fn exclusive_open(mut self, enabled: bool) -> Self {
        self.exclusive_open = enabled;
        self
    }

    #[must_use]
    pub const fn use_resource_manager(mut self, enabled: bool) -> Self {
        self.use_resource_manager = enabled;
        self
    }

    #[must_use]
    pub const fn dma_resource_manager(mut self, enabled: bool) -> Self {
        self.dma_resource_manager = enabled;
        self
    }

    #[must_use]
    pub const fn atomic_write_read(mut self, enabled: bool) -> Self {
        self.atomic_write_read = enabled;
        self
    }

    #[must_use]
    pub const fn quiesce_rts_on_sleep(mut self, enabled: bool) -> Self {
        self.quiesce_rts_on_sleep = enabled;
        self
    }
}

impl Default for BusOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource ids guarding a bus, one mask per lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusResources {
    lanes: [ResourceMask; Lane::COUNT],
}

impl BusResources {
    /// I2C or SPI bus guarded by a single resource.
    pub const fn frame(bus: ResourceId) -> Self {
        Self { lanes: [bus.mask(), ResourceMask::EMPTY, ResourceMask::EMPTY] }
    }

    /// UART bus: a configuration resource plus one resource per direction.
    pub const fn uart(config: ResourceId, tx: ResourceId, rx: ResourceId) -> Self {
        Self { lanes: [config.mask(), tx.mask(), rx.mask()] }
    }

    pub const fn lane(&self, lane: Lane) -> ResourceMask {
        self.lanes[lane.index()]
    }
}

/// How a device obtains its arbitration resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResourceAssignment {
    /// Fixed at build time; must be reserved in the resource manager.
    Static(ResourceId),
    /// Allocated from the resource manager on first acquisition.
    Dynamic,
}

/// Index of a DMA channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaChannel(pub u8);

/// A device's DMA channel pair and the resource that arbitrates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaResource {
    pub channel: DmaChannel,
    pub resource: ResourceId,
}
