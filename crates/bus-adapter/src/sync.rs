//! Blocking-style transfers: start a primitive, then wait for the completion
//! interrupt. Each call takes the bus for its own duration; hold a
//! [`BusLease`] across calls to keep the device's configuration loaded and
//! other devices off the wire.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::device::DeviceHandle;
use crate::driver::BusDriver;
use crate::error::AbortSource;
use crate::lease::{BusLease, DeviceLease};

impl<'l, 'a, M: RawMutex, D: BusDriver> BusLease<'l, 'a, M, D> {
    pub async fn write(&self, data: &[u8]) -> Result<(), AbortSource> {
        self.start(|driver| unsafe { driver.start_write(data, true) });
        self.complete().await.map(|_| ())
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<(), AbortSource> {
        let dma = self.device().dma_channel().filter(|_| buf.len() > 1);
        self.start(|driver| unsafe { driver.start_read(buf, true, dma) });
        self.complete().await.map(|_| ())
    }

    /// Write `data`, then read `buf.len()` bytes without giving up the bus in
    /// between. An empty side degrades to a single-phase transfer.
    pub async fn transact(&self, data: &[u8], buf: &mut [u8]) -> Result<(), AbortSource> {
        if buf.is_empty() {
            return self.write(data).await;
        }
        if data.is_empty() {
            return self.read(buf).await;
        }

        let dma = self.device().dma_channel().filter(|_| buf.len() > 1);
        if self.bus().options().atomic_write_read {
            let chained = self.start(|driver| {
                critical_section::with(|_| unsafe { driver.start_write_read(data, buf, dma) })
            });
            if chained {
                return self.complete().await.map(|_| ());
            }
            trace!("{:?}: controller cannot chain, two phases", self.bus().id());
        }

        self.start(|driver| unsafe { driver.start_write(data, false) });
        self.complete().await?;
        self.start(|driver| unsafe { driver.start_read(buf, true, dma) });
        self.complete().await.map(|_| ())
    }
}

impl<'a, M: RawMutex, D: BusDriver> DeviceLease<'a, M, D> {
    pub async fn write(&self, data: &[u8]) -> Result<(), AbortSource> {
        self.bus().await.write(data).await
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<(), AbortSource> {
        self.bus().await.read(buf).await
    }

    pub async fn transact(&self, data: &[u8], buf: &mut [u8]) -> Result<(), AbortSource> {
        self.bus().await.transact(data, buf).await
    }
}

impl<'a, M: RawMutex, D: BusDriver> DeviceHandle<'a, M, D> {
    pub async fn write(&self, data: &[u8]) -> Result<(), AbortSource> {
        self.acquire().await.write(data).await
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<(), AbortSource> {
        self.acquire().await.read(buf).await
    }

    pub async fn transact(&self, data: &[u8], buf: &mut [u8]) -> Result<(), AbortSource> {
        self.acquire().await.transact(data, buf).await
    }
}
