//! Sleep coordination.
//!
//! The power manager asks every client before entering sleep and tells them
//! when sleep was canceled or the system woke up. Controllers lose their
//! register contents while asleep, so a multi-device bus forgets which
//! device it was configured for and reconfigures on the next acquisition.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;

use crate::bus::Bus;
use crate::driver::BusDriver;
use crate::uart::UartDriver;

/// Hooks called by the power manager. All of them run with interrupts
/// masked and must not wait.
pub trait PowerClient {
    /// Return `false` to veto sleep.
    fn prepare_for_sleep(&self) -> bool;

    /// Sleep was vetoed after this client agreed to it.
    fn sleep_canceled(&self);

    fn wake_up(&self);

    /// The fast crystal settled and clock-derived timing is valid again.
    fn xtal_ready(&self) {}
}

impl<'a, M: RawMutex, D: BusDriver> Bus<'a, M, D> {
    /// No transfer is in flight and, on a shared bus, nobody holds it.
    pub fn sleep_ready(&self) -> bool {
        let dedicated = self.options().dedicated;
        self.with_state(|state| {
            !state.driver.is_busy()
                && !state.async_in_flight()
                && (dedicated || state.lanes.iter().all(|&count| count == 0))
        })
    }

    fn reapply_config(&self) {
        self.with_state(|state| {
            if let (true, Some(device)) = (state.open_count > 0, state.current) {
                state.driver.apply(device.config());
            }
        });
    }
}

impl<'a, M: RawMutex, D: BusDriver> PowerClient for Bus<'a, M, D> {
    fn prepare_for_sleep(&self) -> bool {
        if !self.sleep_ready() {
            debug!("{:?}: busy, vetoing sleep", self.id());
            return false;
        }
        if !self.options().dedicated {
            self.with_state(|state| state.current = None);
        }
        true
    }

    fn sleep_canceled(&self) {}

    /// A dedicated bus keeps its device; put the configuration back.
    fn wake_up(&self) {
        self.reapply_config();
    }
}

/// UART power hooks: the generic bus checks plus RTS/CTS handling, so that a
/// character sent by the host while going to sleep is neither lost nor
/// slept through.
pub struct UartPower<'r, 'a, M: RawMutex, D: UartDriver, DL: DelayNs> {
    bus: &'r Bus<'a, M, D>,
    delay: &'r Mutex<M, RefCell<DL>>,
}

impl<'r, 'a, M: RawMutex, D: UartDriver, DL: DelayNs> UartPower<'r, 'a, M, D, DL> {
    pub fn new(bus: &'r Bus<'a, M, D>, delay: &'r Mutex<M, RefCell<DL>>) -> Self {
        Self { bus, delay }
    }

    fn restore_flow_control(&self) {
        self.bus.with_state(|state| {
            if state.sleep_quiesced {
                state.driver.remap_cts(false);
                state.driver.set_rts(true);
                state.sleep_quiesced = false;
            }
        });
    }

    /// Park RTS and CTS. Returns `false` if a character slipped in.
    fn quiesce(&self, char_time_us: u32) -> bool {
        self.bus.with_driver(|driver| driver.set_rts(false));
        self.delay.lock(|delay| delay.borrow_mut().delay_us(char_time_us));
        self.bus.with_state(|state| {
            if state.driver.rx_pending() {
                state.driver.set_rts(true);
                return false;
            }
            state.driver.remap_cts(true);
            state.sleep_quiesced = true;
            true
        })
    }
}

impl<M: RawMutex, D: UartDriver, DL: DelayNs> PowerClient for UartPower<'_, '_, M, D, DL> {
    fn prepare_for_sleep(&self) -> bool {
        if !self.bus.sleep_ready() {
            return false;
        }
        if self.bus.options().quiesce_rts_on_sleep {
            let flow = self.bus.with_state(|state| {
                state
                    .current
                    .map(|device| device.config())
                    .filter(|config| config.flow_control)
                    .map(|config| config.char_time_us())
            });
            if let Some(char_time_us) = flow {
                if !self.quiesce(char_time_us) {
                    info!("{:?}: character arrived, vetoing sleep", self.bus.id());
                    return false;
                }
            }
        }
        self.bus.prepare_for_sleep()
    }

    fn sleep_canceled(&self) {
        self.restore_flow_control();
        self.bus.sleep_canceled();
    }

    fn wake_up(&self) {
        self.bus.wake_up();
    }

    fn xtal_ready(&self) {
        self.bus.with_state(|state| {
            if let Some(device) = state.current {
                state.driver.reinit_timing(device.config());
            }
        });
        self.restore_flow_control();
    }
}
