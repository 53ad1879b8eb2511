use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;

use crate::bus::Bus;
use crate::i2c::I2cDriver;
use crate::power::{PowerClient, UartPower};
use crate::spi::SpiDriver;
use crate::uart::UartDriver;

pub const I2C_BUSES: usize = 2;
pub const SPI_BUSES: usize = 2;
pub const UART_BUSES: usize = 2;
const BUS_COUNT: usize = I2C_BUSES + SPI_BUSES + UART_BUSES;

/// Every bus context of the chip, plus the delay the UART sleep hook busy
/// waits with.
///
/// Registered with the power manager as a single client: a veto from any
/// bus cancels sleep for those that already agreed.
pub struct BusRegistry<'a, M, I, S, U, DL>
where
    M: RawMutex,
    I: I2cDriver,
    S: SpiDriver,
    U: UartDriver,
    DL: DelayNs,
{
    i2c: [Bus<'a, M, I>; I2C_BUSES],
    spi: [Bus<'a, M, S>; SPI_BUSES],
    uart: [Bus<'a, M, U>; UART_BUSES],
    delay: Mutex<M, RefCell<DL>>,
}

impl<'a, M, I, S, U, DL> BusRegistry<'a, M, I, S, U, DL>
where
    M: RawMutex,
    I: I2cDriver,
    S: SpiDriver,
    U: UartDriver,
    DL: DelayNs,
{
    pub const fn new(
        i2c: [Bus<'a, M, I>; I2C_BUSES],
        spi: [Bus<'a, M, S>; SPI_BUSES],
        uart: [Bus<'a, M, U>; UART_BUSES],
        delay: DL,
    ) -> Self {
        Self { i2c, spi, uart, delay: Mutex::new(RefCell::new(delay)) }
    }

    pub fn i2c(&self, index: usize) -> &Bus<'a, M, I> {
        &self.i2c[index]
    }

    pub fn spi(&self, index: usize) -> &Bus<'a, M, S> {
        &self.spi[index]
    }

    pub fn uart(&self, index: usize) -> &Bus<'a, M, U> {
        &self.uart[index]
    }

    pub fn uart_power(&self, index: usize) -> UartPower<'_, 'a, M, U, DL> {
        UartPower::new(&self.uart[index], &self.delay)
    }

    fn with_clients<R>(&self, f: impl FnOnce(&[&dyn PowerClient]) -> R) -> R {
        let [uart0, uart1] = self.uart.each_ref().map(|bus| UartPower::new(bus, &self.delay));
        let [i2c0, i2c1] = &self.i2c;
        let [spi0, spi1] = &self.spi;
        // Asked in this order; a veto rolls back the ones before it.
        let clients: [&dyn PowerClient; BUS_COUNT] = [i2c0, i2c1, spi0, spi1, &uart0, &uart1];
        f(&clients)
    }
}

impl<'a, M, I, S, U, DL> PowerClient for BusRegistry<'a, M, I, S, U, DL>
where
    M: RawMutex,
    I: I2cDriver,
    S: SpiDriver,
    U: UartDriver,
    DL: DelayNs,
{
    fn prepare_for_sleep(&self) -> bool {
        self.with_clients(|clients| {
            for (index, client) in clients.iter().enumerate() {
                if !client.prepare_for_sleep() {
                    for agreed in &clients[..index] {
                        agreed.sleep_canceled();
                    }
                    return false;
                }
            }
            true
        })
    }

    fn sleep_canceled(&self) {
        self.with_clients(|clients| clients.iter().for_each(|client| client.sleep_canceled()));
    }

    fn wake_up(&self) {
        self.with_clients(|clients| clients.iter().for_each(|client| client.wake_up()));
    }

    fn xtal_ready(&self) {
        self.with_clients(|clients| clients.iter().for_each(|client| client.xtal_ready()));
    }
}
