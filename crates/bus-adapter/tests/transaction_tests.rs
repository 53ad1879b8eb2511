mod common;

use core::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bus_adapter::{
    AbortSource, BusOptions, Completion, DeviceHandle, DmaChannel, I2cConfig, Transaction,
    TransactionError, TRANSACTION_CAPACITY,
};
use common::*;
use futures::poll;

const SENSOR: I2cConfig = I2cConfig::new(0x48);
const EEPROM: I2cConfig = I2cConfig::new(0x50);

type Handle = DeviceHandle<'static, M, Mock<I2cConfig>>;

// ---------------------------------------------------------------------------
// Callback recorder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    status: Mutex<Vec<Result<(), AbortSource>>>,
    received: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    fn leak() -> &'static Recorder {
        Box::leak(Box::default())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn status(&self) -> Vec<Result<(), AbortSource>> {
        self.status.lock().unwrap().clone()
    }

    fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

fn record(completion: &mut Completion<'_>) {
    let recorder = completion.arg_as::<Recorder>().expect("recorder argument");
    recorder.calls.fetch_add(1, Ordering::SeqCst);
    recorder.status.lock().unwrap().push(completion.status());
    while let Some(buf) = completion.take_received() {
        recorder.received.lock().unwrap().push(buf.to_vec());
    }
}

fn relaunch(completion: &mut Completion<'_>) {
    let handle = completion.arg_as::<Handle>().expect("handle argument");
    let next = Transaction::builder().send_stop(&[0x02]).build().unwrap();
    assert!(handle.try_transact_async(next).is_ok());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[futures_test::test]
async fn runs_from_interrupt_and_releases_at_end() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;
    let recorder = Recorder::leak();
    bus.with_driver(|d| d.rx.extend([1, 2, 3, 4]));

    let transaction = Transaction::builder()
        .send(&[0x10])
        .receive(leak_buf::<4>())
        .callback_with(record, recorder)
        .build()
        .unwrap();
    handle.transact_async(transaction).await;

    // Only the first action has started; device and bus stay held.
    assert_eq!(bus.with_driver(|d| d.data_ops()), vec![Op::Write(vec![0x10], false)]);
    assert_eq!(bus.transaction_cursor(), 1);
    assert!(a.is_acquired());
    assert_eq!(bus.acquire_count(), 1);

    fire_all(bus);

    assert_eq!(
        bus.with_driver(|d| d.data_ops()),
        vec![Op::Write(vec![0x10], false), Op::Read(4, true, None)]
    );
    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.status(), vec![Ok(())]);
    assert_eq!(recorder.received(), vec![vec![1, 2, 3, 4]]);

    assert_eq!(bus.transaction_cursor(), 0);
    assert_eq!(bus.acquire_count(), 0);
    assert!(!a.is_acquired());
    assert!(bus.manager().held().is_empty());
}

#[futures_test::test]
async fn end_marker_without_callback_releases() {
    let bus = i2c_bus(BusOptions::new());
    let a = dma_device(bus, SENSOR, DEV_A);
    let handle = a.open().await;

    let transaction = Transaction::builder()
        .send(&[0x01])
        .receive(leak_buf::<8>())
        .build()
        .unwrap();
    handle.transact_async(transaction).await;
    fire_all(bus);

    assert_eq!(
        bus.with_driver(|d| d.data_ops()),
        vec![Op::Write(vec![0x01], false), Op::Read(8, true, Some(DmaChannel(0)))]
    );
    assert_eq!(bus.transaction_cursor(), 0);
    assert!(bus.manager().held().is_empty());
}

#[futures_test::test]
async fn error_skips_remaining_data_actions() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;
    let recorder = Recorder::leak();
    bus.with_driver(|d| d.fail_next = Some(AbortSource::AddressNack));

    let buf = leak_buf::<2>();
    buf.copy_from_slice(&[0xEE, 0xEE]);
    let transaction = Transaction::builder()
        .send(&[0x10])
        .receive(buf)
        .send_stop(&[0x20])
        .callback_with(record, recorder)
        .build()
        .unwrap();
    handle.transact_async(transaction).await;
    fire_all(bus);

    assert_eq!(bus.with_driver(|d| d.data_ops()), vec![Op::Write(vec![0x10], false)]);
    assert_eq!(recorder.status(), vec![Err(AbortSource::AddressNack)]);
    // The skipped receive buffer comes back untouched.
    assert_eq!(recorder.received(), vec![vec![0xEE, 0xEE]]);
    assert!(bus.manager().held().is_empty());
    assert!(!a.is_acquired());
}

#[futures_test::test]
async fn intermediate_callback_runs_between_actions() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;
    let first = Recorder::leak();
    let last = Recorder::leak();

    let transaction = Transaction::builder()
        .send(&[0x01])
        .callback_with(record, first)
        .send_stop(&[0x02])
        .callback_with(record, last)
        .build()
        .unwrap();
    handle.transact_async(transaction).await;

    assert!(fire(bus));
    // The first callback ran and the next send was started right after it.
    assert_eq!(first.calls(), 1);
    assert_eq!(last.calls(), 0);
    assert_eq!(bus.transaction_cursor(), 3);
    assert!(a.is_acquired());

    assert!(fire(bus));
    assert_eq!(last.calls(), 1);
    assert_eq!(bus.transaction_cursor(), 0);
    assert!(!a.is_acquired());
}

#[futures_test::test]
async fn terminal_callback_can_start_next_transaction() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle: &'static Handle = Box::leak(Box::new(a.open().await));

    let transaction = Transaction::builder()
        .send_stop(&[0x01])
        .callback_with(relaunch, handle)
        .build()
        .unwrap();
    handle.transact_async(transaction).await;
    fire_all(bus);

    assert_eq!(
        bus.with_driver(|d| d.data_ops()),
        vec![Op::Write(vec![0x01], true), Op::Write(vec![0x02], true)]
    );
    assert_eq!(bus.transaction_cursor(), 0);
    assert!(bus.manager().held().is_empty());
}

#[futures_test::test]
async fn try_transact_async_gives_transaction_back_when_bus_taken() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let b = device(bus, EEPROM, DEV_B);
    let ha = a.open().await;
    let hb = b.open().await;

    let lease = hb.acquire().await;
    let _held = lease.bus().await;

    let transaction = Transaction::builder().send_stop(&[0x01]).build().unwrap();
    let returned = ha.try_transact_async(transaction).expect_err("bus is taken");
    assert_eq!(returned.len(), 2);
    assert!(!a.is_acquired());
    assert!(bus.with_driver(|d| d.data_ops()).is_empty());
}

#[futures_test::test]
async fn held_device_lease_launches_transaction() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;
    let lease = handle.acquire().await;

    let transaction = Transaction::builder().send_stop(&[0x01]).build().unwrap();
    {
        let mut launch = pin!(lease.transact_async(transaction));
        assert!(poll!(launch.as_mut()).is_ready());
    }
    assert_eq!(a.acquire_count(), 2);
    assert_eq!(bus.acquire_count(), 1);

    fire_all(bus);
    assert_eq!(bus.with_driver(|d| d.data_ops()), vec![Op::Write(vec![0x01], true)]);
    assert_eq!(a.acquire_count(), 1);
    assert_eq!(bus.acquire_count(), 0);
    assert!(bus.manager().is_held(DEV_A.mask()));

    drop(lease);
    assert!(bus.manager().held().is_empty());
}

#[futures_test::test]
async fn held_device_lease_try_launch_gives_back_when_bus_taken() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let b = device(bus, EEPROM, DEV_B);
    let ha = a.open().await;
    let hb = b.open().await;
    let la = ha.acquire().await;
    let lb = hb.acquire().await;
    let held = lb.bus().await;

    let transaction = Transaction::builder().send_stop(&[0x01]).build().unwrap();
    assert!(la.try_transact_async(transaction).is_err());
    assert_eq!(a.acquire_count(), 1);

    drop(held);
    let transaction = Transaction::builder().send_stop(&[0x02]).build().unwrap();
    assert!(la.try_transact_async(transaction).is_ok());
    fire_all(bus);
    assert_eq!(a.acquire_count(), 1);
    assert_eq!(bus.with_driver(|d| d.data_ops()), vec![Op::Write(vec![0x02], true)]);
}

#[futures_test::test]
async fn every_skipped_receive_buffer_is_handed_back() {
    let bus = i2c_bus(BusOptions::new());
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;
    let recorder = Recorder::leak();
    bus.with_driver(|d| d.fail_next = Some(AbortSource::DataNack));

    let mut builder = Transaction::builder();
    for _ in 0..TRANSACTION_CAPACITY - 2 {
        builder = builder.receive_keep_open(leak_buf::<1>());
    }
    let transaction = builder.callback_with(record, recorder).build().unwrap();
    assert_eq!(transaction.len(), TRANSACTION_CAPACITY);
    handle.transact_async(transaction).await;
    fire_all(bus);

    assert_eq!(recorder.status(), vec![Err(AbortSource::DataNack)]);
    assert_eq!(recorder.received().len(), TRANSACTION_CAPACITY - 2);
    assert!(bus.manager().held().is_empty());
}

#[test]
fn builder_rejects_more_actions_than_capacity() {
    let mut fits = Transaction::builder();
    for _ in 0..TRANSACTION_CAPACITY - 1 {
        fits = fits.send(&[0x00]);
    }
    assert_eq!(fits.build().map(|t| t.len()).ok(), Some(TRANSACTION_CAPACITY));

    let mut overflows = Transaction::builder();
    for _ in 0..TRANSACTION_CAPACITY {
        overflows = overflows.send(&[0x00]);
    }
    assert_eq!(overflows.build().err(), Some(TransactionError::CapacityExceeded));
}

#[futures_test::test]
#[should_panic(expected = "asynchronous transaction already in flight")]
async fn overlapping_transactions_panic() {
    let bus = i2c_bus(BusOptions::new().use_resource_manager(false));
    let a = device(bus, SENSOR, DEV_A);
    let handle = a.open().await;

    let first = Transaction::builder().send_stop(&[0x01]).build().unwrap();
    let second = Transaction::builder().send_stop(&[0x02]).build().unwrap();
    handle.transact_async(first).await;
    handle.transact_async(second).await;
}
