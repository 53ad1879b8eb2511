//! Interrupt-driven transactions.
//!
//! A [`Transaction`] is a short program of bus actions. It is launched from
//! task context with the device and bus held; from then on the completion
//! interrupt walks it one action at a time and releases both leases when it
//! runs out. Once an action fails, the remaining data actions are skipped but
//! callbacks still run and see the first error.

use core::any::Any;
use core::mem;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::Deque;

use crate::bus::{Bus, Outcome};
use crate::config::DmaChannel;
use crate::device::{Device, DeviceHandle, LeaseToken};
use crate::lease::DeviceLease;
use crate::driver::BusDriver;
use crate::error::{AbortSource, TransactionError};

/// Actions a bus can buffer for one transaction, end marker included.
pub const TRANSACTION_CAPACITY: usize = 8;

/// Opaque user context handed to a callback.
pub type CallbackArg = &'static (dyn Any + Send + Sync);

/// Runs in interrupt context. Keep it short.
pub type Callback = fn(&mut Completion<'_>);

type Actions = Deque<Action, TRANSACTION_CAPACITY>;
type Received = Deque<&'static mut [u8], TRANSACTION_CAPACITY>;

pub enum Action {
    /// Send `data`; `stop` ends the frame.
    Send { data: &'static [u8], stop: bool },
    /// Fill `buf`; `stop` ends the frame.
    Receive { buf: &'static mut [u8], stop: bool },
    Callback { f: Callback, arg: Option<CallbackArg> },
    End,
}

/// What a callback gets to see.
pub struct Completion<'c> {
    status: Result<(), AbortSource>,
    arg: Option<CallbackArg>,
    received: &'c mut Received,
}

impl Completion<'_> {
    /// First error of the transaction so far.
    pub fn status(&self) -> Result<(), AbortSource> {
        self.status
    }

    pub fn arg(&self) -> Option<CallbackArg> {
        self.arg
    }

    pub fn arg_as<T: Any>(&self) -> Option<&'static T> {
        self.arg.and_then(|arg| arg.downcast_ref::<T>())
    }

    /// Next receive buffer handed back by the transaction, in action order.
    /// Buffers of skipped receives are returned too, untouched.
    pub fn take_received(&mut self) -> Option<&'static mut [u8]> {
        self.received.pop_front()
    }
}

/// A built transaction, ready to launch.
pub struct Transaction {
    actions: Actions,
}

impl Transaction {
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder { actions: Deque::new(), overflow: false }
    }

    /// Number of actions, end marker included.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[must_use]
pub struct TransactionBuilder {
    actions: Actions,
    overflow: bool,
}

impl TransactionBuilder {
    pub fn send(self, data: &'static [u8]) -> Self {
        self.push(Action::Send { data, stop: false })
    }

    pub fn send_stop(self, data: &'static [u8]) -> Self {
        self.push(Action::Send { data, stop: true })
    }

    pub fn receive(self, buf: &'static mut [u8]) -> Self {
        self.push(Action::Receive { buf, stop: true })
    }

    pub fn receive_keep_open(self, buf: &'static mut [u8]) -> Self {
        self.push(Action::Receive { buf, stop: false })
    }

    pub fn callback(self, f: Callback) -> Self {
        self.push(Action::Callback { f, arg: None })
    }

    pub fn callback_with(self, f: Callback, arg: CallbackArg) -> Self {
        self.push(Action::Callback { f, arg: Some(arg) })
    }

    pub fn build(self) -> Result<Transaction, TransactionError> {
        let builder = self.push(Action::End);
        if builder.overflow {
            return Err(TransactionError::CapacityExceeded);
        }
        Ok(Transaction { actions: builder.actions })
    }

    fn push(mut self, action: Action) -> Self {
        if !self.overflow && self.actions.push_back(action).is_err() {
            self.overflow = true;
        }
        self
    }
}

/// Holder of the leases a running transaction was launched with.
pub(crate) struct Owner<'a, M: RawMutex, D: BusDriver> {
    device: &'a Device<'a, M, D>,
    token: LeaseToken,
}

impl<'a, M: RawMutex, D: BusDriver> Owner<'a, M, D> {
    /// Bus first, then device.
    fn release(self) {
        self.device.bus().release_frame(self.device);
        self.device.release(self.token);
    }
}

pub(crate) enum Step<'a, M: RawMutex, D: BusDriver> {
    Started,
    Call {
        f: Callback,
        arg: Option<CallbackArg>,
        status: Result<(), AbortSource>,
        received: Received,
        /// Leases to drop before the callback when it ends the transaction.
        finished: Option<Option<Owner<'a, M, D>>>,
    },
    Finished(Option<Owner<'a, M, D>>),
}

/// Per-bus transaction state.
pub(crate) struct Engine<'a, M: RawMutex, D: BusDriver> {
    actions: Actions,
    cursor: usize,
    in_flight: Option<Action>,
    status: Result<(), AbortSource>,
    received: Received,
    owner: Option<Owner<'a, M, D>>,
}

impl<'a, M: RawMutex, D: BusDriver> Engine<'a, M, D> {
    pub(crate) const fn new() -> Self {
        Self {
            actions: Deque::new(),
            cursor: 0,
            in_flight: None,
            status: Ok(()),
            received: Deque::new(),
            owner: None,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.owner.is_some()
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    fn load(&mut self, owner: Owner<'a, M, D>, transaction: Transaction) {
        self.actions = transaction.actions;
        self.owner = Some(owner);
    }

    fn dma(&self) -> Option<DmaChannel> {
        self.owner.as_ref().and_then(|owner| owner.device.dma_channel())
    }

    fn complete(&mut self, outcome: Outcome) {
        if let Err(source) = outcome {
            if self.status.is_ok() {
                warn!("transaction action {} failed: {:?}", self.cursor, source);
                self.status = Err(source);
            }
        }
        if let Some(Action::Receive { buf, .. }) = self.in_flight.take() {
            self.keep(buf);
        }
    }

    fn keep(&mut self, buf: &'static mut [u8]) {
        // At most one buffer per action, and the deques are the same size.
        self.received
            .push_back(buf)
            .unwrap_or_else(|_| unreachable!("more receive buffers than actions"));
    }

    fn reset(&mut self) -> Option<Owner<'a, M, D>> {
        self.actions.clear();
        self.received.clear();
        self.cursor = 0;
        self.in_flight = None;
        self.status = Ok(());
        self.owner.take()
    }

    fn next(&mut self, driver: &mut D) -> Step<'a, M, D> {
        loop {
            let Some(action) = self.actions.pop_front() else {
                return Step::Finished(self.reset());
            };
            self.cursor += 1;
            match action {
                Action::Send { data, stop } => {
                    if self.status.is_err() {
                        continue;
                    }
                    unsafe { driver.start_write(data, stop) };
                    self.in_flight = Some(Action::Send { data, stop });
                    return Step::Started;
                }
                Action::Receive { buf, stop } => {
                    if self.status.is_err() {
                        self.keep(buf);
                        continue;
                    }
                    let dma = self.dma().filter(|_| buf.len() > 1);
                    unsafe { driver.start_read(buf, stop, dma) };
                    self.in_flight = Some(Action::Receive { buf, stop });
                    return Step::Started;
                }
                Action::Callback { f, arg } => {
                    let last = matches!(self.actions.front(), None | Some(Action::End));
                    let received = mem::replace(&mut self.received, Deque::new());
                    let status = self.status;
                    let finished = last.then(|| self.reset());
                    return Step::Call { f, arg, status, received, finished };
                }
                Action::End => return Step::Finished(self.reset()),
            }
        }
    }
}

/// Advance the bus's transaction after a completion, or start it when
/// `completed` is `None`.
pub(crate) fn resume<'a, M: RawMutex, D: BusDriver>(
    bus: &Bus<'a, M, D>,
    mut completed: Option<Outcome>,
) {
    loop {
        let step = bus.with_state(|state| {
            if let Some(outcome) = completed.take() {
                state.engine.complete(outcome);
            }
            state.engine.next(&mut state.driver)
        });

        match step {
            Step::Started => return,
            Step::Finished(owner) => {
                if let Some(owner) = owner {
                    owner.release();
                }
                debug!("{:?}: transaction done", bus.id());
                return;
            }
            Step::Call { f, arg, status, mut received, finished } => {
                let last = finished.is_some();
                if let Some(Some(owner)) = finished {
                    owner.release();
                }
                f(&mut Completion { status, arg, received: &mut received });
                if last {
                    return;
                }
                bus.with_state(|state| state.engine.received = received);
            }
        }
    }
}

fn launch<'a, M: RawMutex, D: BusDriver>(
    device: &'a Device<'a, M, D>,
    token: LeaseToken,
    transaction: Transaction,
) {
    let bus = device.bus();
    let idle = bus.with_state(|state| {
        let idle = !state.engine.is_active() && state.engine.cursor() == 0;
        if idle {
            state.engine.load(Owner { device, token }, transaction);
        }
        idle
    });
    assert!(idle, "asynchronous transaction already in flight on this bus");
    debug!("{:?}: transaction launched", bus.id());
    resume(bus, None);
}

impl<'a, M: RawMutex, D: BusDriver> DeviceLease<'a, M, D> {
    /// Take the bus and run `transaction` from the completion interrupt,
    /// under one more level of this acquisition. Returns once the first
    /// action has been started.
    pub async fn transact_async(&self, transaction: Transaction) {
        let lease = self.nest();
        lease.bus().await.into_raw();
        launch(lease.device(), lease.into_token(), transaction);
    }

    /// Like [`transact_async`](Self::transact_async) but gives the
    /// transaction back instead of waiting when the bus is taken.
    pub fn try_transact_async(&self, transaction: Transaction) -> Result<(), Transaction> {
        let lease = self.nest();
        let Some(bus) = lease.try_bus() else {
            return Err(transaction);
        };
        bus.into_raw();
        launch(lease.device(), lease.into_token(), transaction);
        Ok(())
    }
}

impl<'a, M: RawMutex, D: BusDriver> DeviceHandle<'a, M, D> {
    /// Acquire device and bus, then run `transaction` from the completion
    /// interrupt. Returns once the first action has been started; both
    /// leases are released when the transaction ends.
    ///
    /// A task already holding the device must use
    /// [`DeviceLease::transact_async`] instead.
    pub async fn transact_async(&self, transaction: Transaction) {
        self.acquire().await.transact_async(transaction).await;
    }

    /// Like [`transact_async`](Self::transact_async) but gives the
    /// transaction back instead of waiting when the device or bus is taken.
    /// Safe to call from a transaction callback.
    pub fn try_transact_async(&self, transaction: Transaction) -> Result<(), Transaction> {
        match self.try_acquire() {
            Some(lease) => lease.try_transact_async(transaction),
            None => Err(transaction),
        }
    }
}
