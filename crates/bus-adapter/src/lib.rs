#![no_std]
//! Shared-bus adapters for I2C, SPI and UART controllers.
//!
//! Several devices share one controller. Each device carries its own
//! configuration, and the adapter loads it into the controller whenever the
//! bus changes hands. Access is granted through leases:
//!
//! 1. [`Device::open`] powers the controller and returns a [`DeviceHandle`].
//! 2. [`DeviceHandle::acquire`] waits for exclusive use of the device.
//! 3. [`DeviceLease::bus`] waits for the bus and configures it for the
//!    device. The returned [`BusLease`] borrows the device lease, so the two
//!    are always released in the right order.
//!
//! Transfers either wait for their completion interrupt ([`BusLease::write`]
//! and friends) or run entirely from interrupt context
//! ([`DeviceHandle::transact_async`]). UART devices use [`UartPort`], which
//! arbitrates the transmitter and receiver separately.
//!
//! The low-level controller drivers plug in through [`BusDriver`]. Their
//! interrupt handlers report to [`Bus::on_complete`].

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod bus;
mod config;
mod device;
mod driver;
mod error;
mod i2c;
mod lease;
mod power;
mod registry;
mod spi;
mod sync;
mod transaction;
mod uart;

pub use bus::{Bus, Outcome};
pub use config::{
    BusId, BusOptions, BusResources, DmaChannel, DmaResource, Lane, ResourceAssignment,
};
pub use device::{Device, DeviceHandle};
pub use driver::BusDriver;
pub use error::{AbortSource, TransactionError};
pub use i2c::{I2cAddress, I2cConfig, I2cDriver, I2cSpeed};
pub use lease::{BusLease, DeviceLease};
pub use power::{PowerClient, UartPower};
pub use registry::{BusRegistry, I2C_BUSES, SPI_BUSES, UART_BUSES};
pub use resource_manager::{ResourceError, ResourceId, ResourceManager, ResourceMask};
pub use spi::{ChipSelect, SpiConfig, SpiDriver, WordSize};
pub use transaction::{
    Action, Callback, CallbackArg, Completion, Transaction, TransactionBuilder,
    TRANSACTION_CAPACITY,
};
pub use uart::{
    Parity, StopBits, UartCallback, UartCompletion, UartConfig, UartDriver, UartPort,
};
