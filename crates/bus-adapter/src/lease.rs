//! RAII proofs of ownership.
//!
//! A [`BusLease`] borrows the [`DeviceLease`] it was taken from, so the bus
//! can never outlive the device acquisition and the device can never be
//! released while its bus is still held.

use core::mem;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::bus::{AbortOnDrop, Bus, Outcome};
use crate::device::{Device, LeaseToken};
use crate::driver::BusDriver;

/// Exclusive access to a device. Released on drop.
pub struct DeviceLease<'a, M: RawMutex, D: BusDriver> {
    device: &'a Device<'a, M, D>,
    token: LeaseToken,
}

impl<'a, M: RawMutex, D: BusDriver> DeviceLease<'a, M, D> {
    pub(crate) fn new(device: &'a Device<'a, M, D>, token: LeaseToken) -> Self {
        Self { device, token }
    }

    pub fn device(&self) -> &'a Device<'a, M, D> {
        self.device
    }

    /// Take one more level of the same acquisition.
    pub fn nest(&self) -> Self {
        self.device.nest(self.token);
        Self { device: self.device, token: self.token }
    }

    /// Wait for the device's bus, loading the device configuration into the
    /// controller if another device used it last.
    pub async fn bus(&self) -> BusLease<'_, 'a, M, D> {
        let bus = self.device.bus();
        assert!(!bus.id().is_uart(), "UART buses are acquired per direction");
        bus.acquire_frame(self.device).await;
        BusLease { lease: self }
    }

    pub fn try_bus(&self) -> Option<BusLease<'_, 'a, M, D>> {
        let bus = self.device.bus();
        assert!(!bus.id().is_uart(), "UART buses are acquired per direction");
        bus.try_acquire_frame(self.device).then_some(BusLease { lease: self })
    }

    /// Hand the acquisition over to interrupt context.
    pub(crate) fn into_token(self) -> LeaseToken {
        let token = self.token;
        mem::forget(self);
        token
    }
}

impl<M: RawMutex, D: BusDriver> Drop for DeviceLease<'_, M, D> {
    fn drop(&mut self) {
        self.device.release(self.token);
    }
}

/// Exclusive access to a device's bus, configured for that device.
pub struct BusLease<'l, 'a, M: RawMutex, D: BusDriver> {
    lease: &'l DeviceLease<'a, M, D>,
}

impl<'l, 'a, M: RawMutex, D: BusDriver> BusLease<'l, 'a, M, D> {
    pub fn device(&self) -> &'a Device<'a, M, D> {
        self.lease.device
    }

    pub fn bus(&self) -> &'a Bus<'a, M, D> {
        self.lease.device.bus()
    }

    pub fn nest(&self) -> Self {
        self.bus().renest_frame();
        Self { lease: self.lease }
    }

    /// Start a primitive on the driver. Clears any stale completion first.
    pub(crate) fn start<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        let bus = self.bus();
        bus.event.reset();
        let started = bus.with_state(|state| {
            (!state.engine.is_active()).then(|| f(&mut state.driver))
        });
        let Some(started) = started else {
            panic!("bus still running an asynchronous transaction");
        };
        started
    }

    /// Wait for the completion of the primitive started last.
    ///
    /// Dropping the returned future aborts the transfer.
    pub(crate) async fn complete(&self) -> Outcome {
        let bus = self.bus();
        let guard = AbortOnDrop::new(bus);
        let outcome = bus.event.wait().await;
        guard.defuse();
        outcome
    }

    /// Hand the bus over to interrupt context.
    pub(crate) fn into_raw(self) {
        mem::forget(self);
    }
}

impl<M: RawMutex, D: BusDriver> Drop for BusLease<'_, '_, M, D> {
    fn drop(&mut self) {
        self.bus().release_frame(self.lease.device);
    }
}
