//! UART adapter.
//!
//! Transmitter and receiver are arbitrated independently so one task can
//! stream out while another waits for input. Reconfiguring the port is only
//! possible while both directions are idle: the first direction taken by a
//! device also takes the configuration resource, and the last one released
//! gives it back.

use core::future::{pending, Future};
use core::mem;
use core::ptr;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use resource_manager::ResourceMask;

use crate::bus::{AbortOnDrop, Bus, Outcome};
use crate::config::Lane;
use crate::device::{Device, DeviceHandle};
use crate::driver::BusDriver;
use crate::error::AbortSource;
use crate::transaction::CallbackArg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    pub baud_rate: u32,
    /// 5 to 8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// RTS/CTS hardware flow control.
    pub flow_control: bool,
}

impl UartConfig {
    pub const fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: false,
        }
    }

    #[must_use]
    pub const fn flow_control(mut self, enabled: bool) -> Self {
        self.flow_control = enabled;
        self
    }

    /// Time one character occupies the line, rounded up to whole
    /// microseconds.
    pub const fn char_time_us(&self) -> u32 {
        let parity = match self.parity {
            Parity::None => 0,
            _ => 1,
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        let bits = 1 + self.data_bits as u32 + parity + stop;
        (bits * 1_000_000).div_ceil(self.baud_rate)
    }
}

impl Default for UartConfig {
    fn default() -> Self {
        Self::new(115_200)
    }
}

/// UART controllers add receiver and flow-control hooks to [`BusDriver`].
///
/// `start_read` completes through [`Bus::on_read_complete`], once the buffer
/// is full or [`abort_read`](Self::abort_read) was called.
pub trait UartDriver: BusDriver<Config = UartConfig> {
    /// Finish the pending reception now, reporting the bytes received so far.
    fn abort_read(&mut self);

    /// Stop the transmitter only. The receiver keeps running and no
    /// transmit completion is reported afterwards.
    fn cancel_write(&mut self);

    /// Stop the receiver only. The transmitter keeps running and no
    /// receive completion is reported afterwards.
    fn cancel_read(&mut self);

    /// Drive RTS. `false` asks the peer to stop sending.
    fn set_rts(&mut self, asserted: bool);

    /// A character is waiting in the receiver.
    fn rx_pending(&self) -> bool;

    /// Route the CTS pin to the wake-up controller (`true`) or back to the
    /// UART (`false`).
    fn remap_cts(&mut self, wakeup: bool);

    /// Recompute baud-rate dividers after the clock source changed.
    fn reinit_timing(&mut self, config: &UartConfig);
}

/// Completion of an asynchronous UART transfer. Runs in interrupt context
/// after the direction has been released.
pub type UartCallback = fn(UartCompletion);

pub struct UartCompletion {
    /// Bytes moved.
    pub result: Result<usize, AbortSource>,
    /// The receive buffer, handed back. `None` for writes.
    pub buffer: Option<&'static mut [u8]>,
    pub arg: Option<CallbackArg>,
}

/// An asynchronous transfer parked on the bus until its interrupt fires.
pub(crate) struct UartPending<'a, M: RawMutex, D: BusDriver> {
    device: &'a Device<'a, M, D>,
    lane: Lane,
    buffer: Option<&'static mut [u8]>,
    callback: UartCallback,
    arg: Option<CallbackArg>,
}

pub(crate) fn finish_async<'a, M: RawMutex, D: BusDriver>(
    bus: &Bus<'a, M, D>,
    pending: UartPending<'a, M, D>,
    outcome: Outcome,
) {
    bus.release_lane(pending.lane);
    trace!("{:?}: asynchronous {:?} done", bus.id(), pending.lane);
    (pending.callback)(UartCompletion {
        result: outcome,
        buffer: pending.buffer,
        arg: pending.arg,
    });
}

impl<'a, M: RawMutex, D: BusDriver> Bus<'a, M, D> {
    /// Take one direction of a UART for `device`.
    pub(crate) async fn acquire_lane(&self, device: &'a Device<'a, M, D>, lane: Lane) {
        let arbitrates = self.options().use_resource_manager;
        loop {
            let switching = self.lane_needs_config(device);
            let mask = self.lane_mask(lane, switching);
            if arbitrates {
                self.manager().acquire(mask).await;
            }
            if self.claim_lane(device, lane, switching) {
                return;
            }
            // The other direction went idle while we waited.
            if arbitrates {
                self.manager().release(mask);
            }
        }
    }

    fn lane_needs_config(&self, device: &Device<'a, M, D>) -> bool {
        !self.options().dedicated
            && self.with_state(|state| !(state.io_lanes_active() && state.is_current(device)))
    }

    fn lane_mask(&self, lane: Lane, switching: bool) -> ResourceMask {
        let mut mask = self.resources().lane(lane);
        if switching {
            mask |= self.resources().lane(Lane::Frame);
        }
        mask
    }

    fn claim_lane(&self, device: &'a Device<'a, M, D>, lane: Lane, switching: bool) -> bool {
        let dedicated = self.options().dedicated;
        self.with_state(|state| {
            if dedicated || switching {
                state.switch_to(device);
            } else if !(state.io_lanes_active() && state.is_current(device)) {
                return false;
            }
            state.lanes[lane.index()] += 1;
            true
        })
    }

    pub(crate) fn release_lane(&self, lane: Lane) {
        let idle = self.with_state(|state| {
            let count = &mut state.lanes[lane.index()];
            if *count == 0 {
                return None;
            }
            *count -= 1;
            Some(!state.io_lanes_active())
        });
        let Some(idle) = idle else {
            panic!("UART direction released more times than acquired");
        };
        if self.options().use_resource_manager {
            let mask = self.lane_mask(lane, idle && !self.options().dedicated);
            self.manager().release(mask);
        }
    }
}

/// One held direction of a UART.
struct LaneLease<'a, M: RawMutex, D: BusDriver> {
    bus: &'a Bus<'a, M, D>,
    lane: Lane,
}

impl<M: RawMutex, D: BusDriver> LaneLease<'_, M, D> {
    fn into_raw(self) {
        mem::forget(self);
    }
}

impl<M: RawMutex, D: BusDriver> Drop for LaneLease<'_, M, D> {
    fn drop(&mut self) {
        self.bus.release_lane(self.lane);
    }
}

/// An open UART device.
pub struct UartPort<'a, M: RawMutex, D: UartDriver> {
    handle: DeviceHandle<'a, M, D>,
}

impl<'a, M: RawMutex, D: UartDriver> UartPort<'a, M, D> {
    pub async fn open(device: &'a Device<'a, M, D>) -> Self {
        assert!(device.bus().id().is_uart(), "not a UART bus");
        Self { handle: device.open().await }
    }

    pub fn handle(&self) -> &DeviceHandle<'a, M, D> {
        &self.handle
    }

    fn bus(&self) -> &'a Bus<'a, M, D> {
        self.handle.bus()
    }

    async fn lane(&self, lane: Lane) -> LaneLease<'a, M, D> {
        let bus = self.bus();
        bus.acquire_lane(self.handle.device(), lane).await;
        LaneLease { bus, lane }
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), AbortSource> {
        let _tx = self.lane(Lane::Tx).await;
        let bus = self.bus();
        bus.event.reset();
        bus.with_driver(|driver| unsafe { driver.start_write(data, true) });
        let guard = AbortOnDrop::with(bus, D::cancel_write);
        let outcome = bus.event.wait().await;
        guard.defuse();
        outcome.map(|_| ())
    }

    /// Fill `buf` completely.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, AbortSource> {
        self.read_until(buf, pending::<()>()).await
    }

    /// Receive into `buf` until it is full or `deadline` resolves, whichever
    /// happens first. Returns the number of bytes received.
    pub async fn read_until<F: Future>(
        &self,
        buf: &mut [u8],
        deadline: F,
    ) -> Result<usize, AbortSource> {
        let _rx = self.lane(Lane::Rx).await;
        let bus = self.bus();
        bus.event_read.reset();
        bus.with_driver(|driver| unsafe { driver.start_read(buf, true, None) });
        let guard = AbortOnDrop::with(bus, D::cancel_read);
        let outcome = match select(bus.event_read.wait(), deadline).await {
            Either::First(outcome) => outcome,
            Either::Second(_) => {
                bus.with_driver(|driver| driver.abort_read());
                bus.event_read.wait().await
            }
        };
        guard.defuse();
        outcome
    }

    #[cfg(feature = "time")]
    pub async fn read_timeout(
        &self,
        buf: &mut [u8],
        timeout: embassy_time::Duration,
    ) -> Result<usize, AbortSource> {
        self.read_until(buf, embassy_time::Timer::after(timeout)).await
    }

    /// Start sending `data` and return. `callback` runs from the completion
    /// interrupt once the transmitter has been released.
    pub async fn write_async(
        &self,
        data: &'static [u8],
        callback: UartCallback,
        arg: Option<CallbackArg>,
    ) {
        let tx = self.lane(Lane::Tx).await;
        tx.into_raw();
        let device = self.handle.device();
        let overlap = self.bus().with_state(|state| {
            if state.uart_tx.is_some() {
                return true;
            }
            state.uart_tx = Some(UartPending {
                device,
                lane: Lane::Tx,
                buffer: None,
                callback,
                arg,
            });
            unsafe { state.driver.start_write(data, true) };
            false
        });
        assert!(!overlap, "asynchronous UART write already in flight");
    }

    /// Start receiving into `buf` and return. `callback` gets the buffer
    /// back once it is full or the read was aborted.
    pub async fn read_async(
        &self,
        buf: &'static mut [u8],
        callback: UartCallback,
        arg: Option<CallbackArg>,
    ) {
        let rx = self.lane(Lane::Rx).await;
        rx.into_raw();
        let device = self.handle.device();
        let bus = self.bus();
        let overlap = bus.with_state(move |state| {
            if state.uart_rx.is_some() {
                return true;
            }
            unsafe { state.driver.start_read(buf, true, None) };
            state.uart_rx = Some(UartPending {
                device,
                lane: Lane::Rx,
                buffer: Some(buf),
                callback,
                arg,
            });
            false
        });
        assert!(!overlap, "asynchronous UART read already in flight");
        bus.read_armed.signal(());
    }

    /// Cut this device's asynchronous read short. Its callback then runs
    /// with the bytes received so far. Returns `false` when no such read is
    /// pending.
    pub fn abort_read_async(&self) -> bool {
        let device = self.handle.device();
        self.bus().with_state(|state| match &state.uart_rx {
            Some(pending) if ptr::eq(pending.device, device) => {
                state.driver.abort_read();
                true
            }
            _ => false,
        })
    }

    /// Wait until an asynchronous read of this device is pending, then
    /// force it to complete.
    pub async fn complete_read(&self) {
        while !self.abort_read_async() {
            self.bus().read_armed.wait().await;
        }
    }
}
