use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};
use resource_manager::{ResourceError, ResourceId, ResourceMask};

use crate::bus::Bus;
use crate::config::{DmaChannel, DmaResource, ResourceAssignment};
use crate::driver::BusDriver;
use crate::lease::DeviceLease;

static NEXT_TOKEN: AtomicU32 = AtomicU32::new(1);

/// Identity of one exclusive acquisition. Nested leases share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct LeaseToken(u32);

impl LeaseToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Copy)]
struct DeviceState {
    acquire_count: u16,
    owner: Option<LeaseToken>,
    dynamic_id: Option<ResourceId>,
}

/// A peripheral on a bus: its configuration plus the bookkeeping needed to
/// grant exclusive access to it.
pub struct Device<'a, M: RawMutex, D: BusDriver> {
    bus: &'a Bus<'a, M, D>,
    config: D::Config,
    resource: ResourceAssignment,
    dma: Option<DmaResource>,
    state: Mutex<M, Cell<DeviceState>>,
}

impl<'a, M: RawMutex, D: BusDriver> Device<'a, M, D> {
    pub const fn new(
        bus: &'a Bus<'a, M, D>,
        config: D::Config,
        resource: ResourceAssignment,
        dma: Option<DmaResource>,
    ) -> Self {
        Self {
            bus,
            config,
            resource,
            dma,
            state: Mutex::new(Cell::new(DeviceState {
                acquire_count: 0,
                owner: None,
                dynamic_id: None,
            })),
        }
    }

    pub fn bus(&self) -> &'a Bus<'a, M, D> {
        self.bus
    }

    pub fn config(&self) -> &D::Config {
        &self.config
    }

    pub fn dma(&self) -> Option<DmaResource> {
        self.dma
    }

    pub fn acquire_count(&self) -> u16 {
        self.state.lock(|state| state.get().acquire_count)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquire_count() > 0
    }

    /// Open a handle, powering the controller if this is the bus's first.
    ///
    /// With [`exclusive_open`](crate::BusOptions::exclusive_open) the device
    /// is acquired here and stays acquired until the handle drops.
    pub async fn open(&'a self) -> DeviceHandle<'a, M, D> {
        let held = if self.bus.options().exclusive_open {
            Some(self.acquire().await)
        } else {
            None
        };
        self.bus.open(self);
        DeviceHandle { device: self, held }
    }

    pub(crate) async fn acquire(&'a self) -> DeviceLease<'a, M, D> {
        if !self.bus.options().use_resource_manager {
            if let Some(lease) = self.join() {
                return lease;
            }
        } else {
            self.bus.manager().acquire(self.resource_mask()).await;
        }
        self.claim()
    }

    pub(crate) fn try_acquire(&'a self) -> Option<DeviceLease<'a, M, D>> {
        if !self.bus.options().use_resource_manager {
            if let Some(lease) = self.join() {
                return Some(lease);
            }
        } else if !self.bus.manager().try_acquire(self.resource_mask()) {
            return None;
        }
        Some(self.claim())
    }

    /// Without arbitration every caller is the same task, so a held device
    /// is simply re-entered.
    fn join(&'a self) -> Option<DeviceLease<'a, M, D>> {
        let owner = self.state.lock(|state| {
            let mut current = state.get();
            let owner = current.owner?;
            current.acquire_count += 1;
            state.set(current);
            Some(owner)
        })?;
        Some(DeviceLease::new(self, owner))
    }

    fn claim(&'a self) -> DeviceLease<'a, M, D> {
        let token = LeaseToken::next();
        let free = self.state.lock(|state| {
            let mut current = state.get();
            if current.acquire_count != 0 {
                return false;
            }
            current.acquire_count = 1;
            current.owner = Some(token);
            state.set(current);
            true
        });
        assert!(free, "device claimed while another lease holds it");
        DeviceLease::new(self, token)
    }

    pub(crate) fn nest(&self, token: LeaseToken) {
        let owned = self.state.lock(|state| {
            let mut current = state.get();
            if current.owner != Some(token) {
                return false;
            }
            current.acquire_count += 1;
            state.set(current);
            true
        });
        assert!(owned, "device lease nested by a non-owner");
    }

    pub(crate) fn release(&self, token: LeaseToken) {
        let released = self.state.lock(|state| {
            let mut current = state.get();
            if current.acquire_count == 0 || current.owner != Some(token) {
                return None;
            }
            current.acquire_count -= 1;
            if current.acquire_count == 0 {
                current.owner = None;
            }
            state.set(current);
            Some(current.acquire_count == 0)
        });
        let Some(last) = released else {
            panic!("device released without being held by this lease");
        };
        if last && self.bus.options().use_resource_manager {
            self.bus.manager().release(self.resource_mask());
        }
    }

    pub(crate) fn dma_channel(&self) -> Option<DmaChannel> {
        self.dma.map(|dma| dma.channel)
    }

    pub(crate) fn dma_mask(&self) -> ResourceMask {
        self.dma.map_or(ResourceMask::EMPTY, |dma| dma.resource.mask())
    }

    fn resource_mask(&self) -> ResourceMask {
        match self.resource {
            ResourceAssignment::Static(id) => id.mask(),
            ResourceAssignment::Dynamic => self.dynamic_id().mask(),
        }
    }

    fn dynamic_id(&self) -> ResourceId {
        // Check, allocate and store in one section so a preempting first
        // acquisition cannot allocate a second id.
        let allocated: Result<_, ResourceError> = self.state.lock(|state| {
            let mut current = state.get();
            if let Some(id) = current.dynamic_id {
                return Ok((id, false));
            }
            let id = self.bus.manager().allocate()?;
            current.dynamic_id = Some(id);
            state.set(current);
            Ok((id, true))
        });
        match allocated {
            Ok((id, fresh)) => {
                if fresh {
                    debug!("{:?}: device got resource {}", self.bus.id(), id.index());
                }
                id
            }
            Err(e) => panic!("{:?}: no resource id for device: {}", self.bus.id(), e),
        }
    }
}

/// An open device.
///
/// Dropping the last handle on a bus disables the controller.
pub struct DeviceHandle<'a, M: RawMutex, D: BusDriver> {
    device: &'a Device<'a, M, D>,
    held: Option<DeviceLease<'a, M, D>>,
}

impl<'a, M: RawMutex, D: BusDriver> DeviceHandle<'a, M, D> {
    pub fn device(&self) -> &'a Device<'a, M, D> {
        self.device
    }

    pub fn bus(&self) -> &'a Bus<'a, M, D> {
        self.device.bus()
    }

    /// Wait for exclusive access to the device.
    pub async fn acquire(&self) -> DeviceLease<'a, M, D> {
        match &self.held {
            Some(lease) => lease.nest(),
            None => self.device.acquire().await,
        }
    }

    pub fn try_acquire(&self) -> Option<DeviceLease<'a, M, D>> {
        match &self.held {
            Some(lease) => Some(lease.nest()),
            None => self.device.try_acquire(),
        }
    }
}

impl<M: RawMutex, D: BusDriver> Drop for DeviceHandle<'_, M, D> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.device.bus().close();
    }
}
