use core::cell::RefCell;
use core::ptr;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use resource_manager::{ResourceManager, ResourceMask};

use crate::config::{BusId, BusOptions, BusResources, Lane};
use crate::device::Device;
use crate::driver::BusDriver;
use crate::error::AbortSource;
use crate::transaction::{self, Engine};
use crate::uart::{self, UartPending};

/// What a completion interrupt reports: bytes moved, or why the controller
/// gave up.
pub type Outcome = Result<usize, AbortSource>;

/// Mutable part of a bus context. Only touched under the bus mutex.
pub(crate) struct BusState<'a, M: RawMutex, D: BusDriver> {
    pub(crate) driver: D,
    /// Device whose configuration is loaded into the controller.
    pub(crate) current: Option<&'a Device<'a, M, D>>,
    pub(crate) lanes: [i16; Lane::COUNT],
    pub(crate) open_count: u16,
    pub(crate) engine: Engine<'a, M, D>,
    pub(crate) uart_tx: Option<UartPending<'a, M, D>>,
    pub(crate) uart_rx: Option<UartPending<'a, M, D>>,
    /// UART flow control was parked for sleep and must be restored.
    pub(crate) sleep_quiesced: bool,
}

impl<'a, M: RawMutex, D: BusDriver> BusState<'a, M, D> {
    pub(crate) fn lane(&self, lane: Lane) -> i16 {
        self.lanes[lane.index()]
    }

    pub(crate) fn io_lanes_active(&self) -> bool {
        self.lane(Lane::Tx) > 0 || self.lane(Lane::Rx) > 0
    }

    pub(crate) fn is_current(&self, device: &Device<'a, M, D>) -> bool {
        self.current.is_some_and(|current| ptr::eq(current, device))
    }

    /// Load `device`'s configuration unless it is already the current one.
    pub(crate) fn switch_to(&mut self, device: &'a Device<'a, M, D>) {
        if !self.is_current(device) {
            self.driver.apply(device.config());
            self.current = Some(device);
        }
    }

    pub(crate) fn async_in_flight(&self) -> bool {
        self.engine.is_active() || self.uart_tx.is_some() || self.uart_rx.is_some()
    }
}

/// Runtime context of one physical controller.
///
/// A bus lives for the whole program (typically in a `StaticCell`). Devices
/// point back at their bus, and the board's interrupt handler reports
/// completions to it through [`on_complete`](Self::on_complete) and
/// [`on_read_complete`](Self::on_read_complete).
pub struct Bus<'a, M: RawMutex, D: BusDriver> {
    id: BusId,
    options: BusOptions,
    resources: BusResources,
    manager: &'a ResourceManager<M>,
    /// Completion of I2C/SPI primitives and of UART transmissions.
    pub(crate) event: Signal<M, Outcome>,
    /// Completion of UART receptions.
    pub(crate) event_read: Signal<M, Outcome>,
    /// Raised whenever an asynchronous UART read is started.
    pub(crate) read_armed: Signal<M, ()>,
    pub(crate) state: Mutex<M, RefCell<BusState<'a, M, D>>>,
}

impl<'a, M: RawMutex, D: BusDriver> Bus<'a, M, D> {
    pub const fn new(
        id: BusId,
        options: BusOptions,
        resources: BusResources,
        manager: &'a ResourceManager<M>,
        driver: D,
    ) -> Self {
        Self {
            id,
            options,
            resources,
            manager,
            event: Signal::new(),
            event_read: Signal::new(),
            read_armed: Signal::new(),
            state: Mutex::new(RefCell::new(BusState {
                driver,
                current: None,
                lanes: [0; Lane::COUNT],
                open_count: 0,
                engine: Engine::new(),
                uart_tx: None,
                uart_rx: None,
                sleep_quiesced: false,
            })),
        }
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn options(&self) -> &BusOptions {
        &self.options
    }

    pub fn resources(&self) -> &BusResources {
        &self.resources
    }

    pub fn manager(&self) -> &'a ResourceManager<M> {
        self.manager
    }

    /// Run `f` with exclusive access to the driver.
    ///
    /// Interrupt handlers use this to read status registers before reporting
    /// a completion. Do not report completions from inside `f`.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.with_state(|state| f(&mut state.driver))
    }

    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut BusState<'a, M, D>) -> R,
    ) -> R {
        self.state.lock(|state| f(&mut *state.borrow_mut()))
    }

    /// Completion interrupt of an I2C/SPI primitive or a UART transmission.
    pub fn on_complete(&self, outcome: Outcome) {
        enum Route<'a, M: RawMutex, D: BusDriver> {
            Transaction,
            UartWrite(UartPending<'a, M, D>),
            Event,
        }

        let route = self.with_state(|state| {
            if state.engine.is_active() {
                Route::Transaction
            } else if let Some(pending) = state.uart_tx.take() {
                Route::UartWrite(pending)
            } else {
                Route::Event
            }
        });

        match route {
            Route::Transaction => transaction::resume(self, Some(outcome)),
            Route::UartWrite(pending) => uart::finish_async(self, pending, outcome),
            Route::Event => self.event.signal(outcome),
        }
    }

    /// Completion interrupt of a UART reception.
    pub fn on_read_complete(&self, outcome: Outcome) {
        match self.with_state(|state| state.uart_rx.take()) {
            Some(pending) => uart::finish_async(self, pending, outcome),
            None => self.event_read.signal(outcome),
        }
    }

    /// Number of live handles.
    pub fn open_count(&self) -> u16 {
        self.with_state(|state| state.open_count)
    }

    /// Reentrancy depth of `lane`.
    pub fn lane_count(&self, lane: Lane) -> i16 {
        self.with_state(|state| state.lane(lane))
    }

    /// Reentrancy depth of the bus (frame lane).
    pub fn acquire_count(&self) -> i16 {
        self.lane_count(Lane::Frame)
    }

    pub fn has_current_device(&self) -> bool {
        self.with_state(|state| state.current.is_some())
    }

    pub fn is_current_device(&self, device: &Device<'a, M, D>) -> bool {
        self.with_state(|state| state.is_current(device))
    }

    /// Actions consumed by the in-flight asynchronous transaction; 0 when
    /// none is running.
    pub fn transaction_cursor(&self) -> usize {
        self.with_state(|state| state.engine.cursor())
    }

    pub(crate) fn open(&self, device: &'a Device<'a, M, D>) {
        let foreign = self.with_state(|state| {
            if state.open_count == 0 {
                state.driver.enable();
            }
            state.open_count += 1;
            if !self.options.dedicated {
                return false;
            }
            match state.current {
                Some(current) => !ptr::eq(current, device),
                None => {
                    state.switch_to(device);
                    false
                }
            }
        });
        assert!(!foreign, "a dedicated bus serves a single device");
        trace!("{:?}: opened", self.id);
    }

    pub(crate) fn close(&self) {
        let valid = self.with_state(|state| {
            // Other handles may hold the bus; only the last close must find it idle.
            let last = state.open_count == 1;
            if state.open_count == 0 || (last && state.lanes.iter().any(|&count| count != 0)) {
                return false;
            }
            state.open_count -= 1;
            if state.open_count == 0 {
                state.driver.disable();
                state.current = None;
            }
            true
        });
        assert!(valid, "bus closed while unopened or still acquired");
        trace!("{:?}: closed", self.id);
    }

    /// Bus arbitration goes through the resource manager.
    fn arbitrates(&self) -> bool {
        self.options.use_resource_manager && !self.options.dedicated
    }

    fn frame_mask(&self, device: &Device<'a, M, D>) -> ResourceMask {
        let mut mask = self.resources.lane(Lane::Frame);
        if self.options.dma_resource_manager {
            mask |= device.dma_mask();
        }
        mask
    }

    pub(crate) async fn acquire_frame(&self, device: &'a Device<'a, M, D>) {
        if self.nest_frame(device) {
            return;
        }
        if self.arbitrates() {
            self.manager.acquire(self.frame_mask(device)).await;
        }
        self.claim_frame(device);
    }

    pub(crate) fn try_acquire_frame(&self, device: &'a Device<'a, M, D>) -> bool {
        if self.nest_frame(device) {
            return true;
        }
        if self.arbitrates() && !self.manager.try_acquire(self.frame_mask(device)) {
            return false;
        }
        self.claim_frame(device);
        true
    }

    /// Re-enter the frame lane if `device` already holds it.
    fn nest_frame(&self, device: &Device<'a, M, D>) -> bool {
        self.with_state(|state| {
            let held = state.lane(Lane::Frame) > 0 && state.is_current(device);
            if self.options.dedicated || held {
                state.lanes[Lane::Frame.index()] += 1;
                true
            } else {
                false
            }
        })
    }

    /// Add one level to a frame lane the caller is known to hold.
    pub(crate) fn renest_frame(&self) {
        let held = self.with_state(|state| {
            let count = &mut state.lanes[Lane::Frame.index()];
            *count += 1;
            *count > 1
        });
        assert!(held, "bus lease nested without being held");
    }

    fn claim_frame(&self, device: &'a Device<'a, M, D>) {
        let free = self.with_state(|state| {
            if state.lane(Lane::Frame) != 0 {
                return false;
            }
            state.lanes[Lane::Frame.index()] = 1;
            if !state.is_current(device) {
                debug!("{:?}: loading device configuration", self.id);
                state.switch_to(device);
            }
            true
        });
        assert!(free, "bus frame claimed while another device holds it");
    }

    pub(crate) fn release_frame(&self, device: &Device<'a, M, D>) {
        let remaining = self.with_state(|state| {
            let count = &mut state.lanes[Lane::Frame.index()];
            if *count == 0 {
                return None;
            }
            *count -= 1;
            Some(*count)
        });
        let Some(remaining) = remaining else {
            panic!("bus released more times than acquired");
        };
        if remaining == 0 && self.arbitrates() {
            self.manager.release(self.frame_mask(device));
        }
    }
}

/// Aborts the in-flight primitive if a waiting transfer is dropped before its
/// completion arrives, so the driver stops touching the caller's buffer.
pub(crate) struct AbortOnDrop<'b, 'a, M: RawMutex, D: BusDriver> {
    bus: &'b Bus<'a, M, D>,
    cancel: fn(&mut D),
    armed: bool,
}

impl<'b, 'a, M: RawMutex, D: BusDriver> AbortOnDrop<'b, 'a, M, D> {
    pub(crate) fn new(bus: &'b Bus<'a, M, D>) -> Self {
        Self::with(bus, D::abort)
    }

    /// Cancel with `cancel` instead of a full controller abort.
    pub(crate) fn with(bus: &'b Bus<'a, M, D>, cancel: fn(&mut D)) -> Self {
        Self { bus, cancel, armed: true }
    }

    pub(crate) fn defuse(mut self) {
        self.armed = false;
    }
}

impl<M: RawMutex, D: BusDriver> Drop for AbortOnDrop<'_, '_, M, D> {
    fn drop(&mut self) {
        if self.armed {
            warn!("{:?}: transfer dropped while in flight", self.bus.id());
            self.bus.with_driver(self.cancel);
        }
    }
}
