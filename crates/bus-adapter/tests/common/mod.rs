#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::pin;
use std::task::Poll;

use bus_adapter::{
    AbortSource, Bus, BusDriver, BusId, BusOptions, BusResources, ChipSelect, Device,
    DmaChannel, DmaResource, I2cConfig, Outcome, ResourceAssignment, ResourceId,
    ResourceManager, ResourceMask, SpiConfig, SpiDriver, UartConfig, UartDriver,
};
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use futures::poll;

pub type M = CriticalSectionRawMutex;

// ---------------------------------------------------------------------------
// Resource ids
// ---------------------------------------------------------------------------

pub const BUS: ResourceId = ResourceId::new(0);
pub const DEV_A: ResourceId = ResourceId::new(1);
pub const DEV_B: ResourceId = ResourceId::new(2);
pub const DMA: ResourceId = ResourceId::new(3);
pub const UART_CONFIG: ResourceId = ResourceId::new(4);
pub const UART_TX: ResourceId = ResourceId::new(5);
pub const UART_RX: ResourceId = ResourceId::new(6);

pub const RESERVED: ResourceMask = ResourceMask::from_bits(0b111_1111);

// ---------------------------------------------------------------------------
// Mock driver
// ---------------------------------------------------------------------------

/// Everything the adapter asked the controller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Enable,
    Disable,
    Apply,
    Write(Vec<u8>, bool),
    Read(usize, bool, Option<DmaChannel>),
    WriteRead(Vec<u8>, usize, Option<DmaChannel>),
    Abort,
    AbortRead,
    CancelWrite,
    CancelRead,
    SetCs(u8, bool),
    Rts(bool),
    RemapCts(bool),
    ReinitTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Main,
    Read,
}

/// A controller that completes nothing on its own: every started primitive
/// queues its completion until the test fires it.
pub struct Mock<C> {
    pub ops: Vec<Op>,
    pub applied: Vec<C>,
    /// Bytes the "wire" delivers to reads, in order.
    pub rx: VecDeque<u8>,
    /// Fail the next data primitive with this source.
    pub fail_next: Option<AbortSource>,
    pub pending: VecDeque<(Channel, Outcome)>,
    pub busy: bool,
    pub can_chain: bool,
    pub rx_waiting: bool,
    /// Reads wait for the scripted bytes instead of completing at once.
    pub streaming: bool,
    /// Bytes received by an unfinished streaming read.
    pub partial_read: Option<usize>,
}

impl<C> Mock<C> {
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            applied: Vec::new(),
            rx: VecDeque::new(),
            fail_next: None,
            pending: VecDeque::new(),
            busy: false,
            can_chain: false,
            rx_waiting: false,
            streaming: false,
            partial_read: None,
        }
    }

    pub fn data_ops(&self) -> Vec<Op> {
        self.ops
            .iter()
            .filter(|op| matches!(op, Op::Write(..) | Op::Read(..) | Op::WriteRead(..)))
            .cloned()
            .collect()
    }

    fn finish(&mut self, channel: Channel, count: usize) {
        let outcome = match self.fail_next.take() {
            Some(source) => Err(source),
            None => Ok(count),
        };
        self.pending.push_back((channel, outcome));
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        for byte in buf.iter_mut() {
            match self.rx.pop_front() {
                Some(value) => *byte = value,
                None => break,
            }
            filled += 1;
        }
        filled
    }
}

impl<C: Clone> BusDriver for Mock<C> {
    type Config = C;

    fn enable(&mut self) {
        self.ops.push(Op::Enable);
    }

    fn disable(&mut self) {
        self.ops.push(Op::Disable);
    }

    fn apply(&mut self, config: &C) {
        self.ops.push(Op::Apply);
        self.applied.push(config.clone());
    }

    unsafe fn start_write(&mut self, data: &[u8], last: bool) {
        self.ops.push(Op::Write(data.to_vec(), last));
        self.finish(Channel::Main, data.len());
    }

    unsafe fn start_read(&mut self, buf: &mut [u8], last: bool, dma: Option<DmaChannel>) {
        self.ops.push(Op::Read(buf.len(), last, dma));
        let filled = self.fill(buf);
        if filled == buf.len() || !self.streaming {
            self.finish(Channel::Read, buf.len());
        } else {
            self.partial_read = Some(filled);
        }
    }

    unsafe fn start_write_read(
        &mut self,
        data: &[u8],
        buf: &mut [u8],
        dma: Option<DmaChannel>,
    ) -> bool {
        if !self.can_chain {
            return false;
        }
        self.ops.push(Op::WriteRead(data.to_vec(), buf.len(), dma));
        let filled = self.fill(buf);
        self.finish(Channel::Main, data.len() + filled);
        true
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn abort(&mut self) {
        self.ops.push(Op::Abort);
        self.pending.clear();
        self.partial_read = None;
    }
}

impl SpiDriver for Mock<SpiConfig> {
    fn set_cs(&mut self, cs: ChipSelect, active: bool) {
        self.ops.push(Op::SetCs(cs.0, active));
    }
}

impl UartDriver for Mock<UartConfig> {
    fn abort_read(&mut self) {
        self.ops.push(Op::AbortRead);
        if let Some(filled) = self.partial_read.take() {
            self.pending.push_back((Channel::Read, Ok(filled)));
        }
    }

    fn cancel_write(&mut self) {
        self.ops.push(Op::CancelWrite);
        self.pending.retain(|(channel, _)| *channel != Channel::Main);
    }

    fn cancel_read(&mut self) {
        self.ops.push(Op::CancelRead);
        self.pending.retain(|(channel, _)| *channel != Channel::Read);
        self.partial_read = None;
    }

    fn set_rts(&mut self, asserted: bool) {
        self.ops.push(Op::Rts(asserted));
    }

    fn rx_pending(&self) -> bool {
        self.rx_waiting
    }

    fn remap_cts(&mut self, wakeup: bool) {
        self.ops.push(Op::RemapCts(wakeup));
    }

    fn reinit_timing(&mut self, _config: &UartConfig) {
        self.ops.push(Op::ReinitTiming);
    }
}

// ---------------------------------------------------------------------------
// Interrupt simulation
// ---------------------------------------------------------------------------

/// I2C and SPI reads complete on the main interrupt.
fn route<C: Clone>(bus: &Bus<'static, M, Mock<C>>, channel: Channel) -> Channel {
    if bus.id().is_uart() {
        channel
    } else {
        Channel::Main
    }
}

/// Deliver one queued completion. Returns `false` when none was queued.
pub fn fire<C: Clone>(bus: &Bus<'static, M, Mock<C>>) -> bool {
    let Some((channel, outcome)) = bus.with_driver(|driver| driver.pending.pop_front()) else {
        return false;
    };
    match route(bus, channel) {
        Channel::Main => bus.on_complete(outcome),
        Channel::Read => bus.on_read_complete(outcome),
    }
    true
}

pub fn fire_all<C: Clone>(bus: &Bus<'static, M, Mock<C>>) {
    while fire(bus) {}
}

/// Drive `fut` to completion, delivering completions whenever it stalls.
pub async fn with_irq<C: Clone, F: Future>(bus: &Bus<'static, M, Mock<C>>, fut: F) -> F::Output {
    let mut fut = pin!(fut);
    loop {
        if let Poll::Ready(output) = poll!(fut.as_mut()) {
            return output;
        }
        fire_all(bus);
        yield_now().await;
    }
}

pub fn ops<C: Clone>(bus: &Bus<'static, M, Mock<C>>) -> Vec<Op> {
    bus.with_driver(|driver| driver.ops.clone())
}

pub fn clear_ops<C: Clone>(bus: &Bus<'static, M, Mock<C>>) {
    bus.with_driver(|driver| driver.ops.clear());
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

pub fn manager() -> &'static ResourceManager<M> {
    Box::leak(Box::new(ResourceManager::new(RESERVED)))
}

pub fn i2c_bus(options: BusOptions) -> &'static Bus<'static, M, Mock<I2cConfig>> {
    Box::leak(Box::new(Bus::new(
        BusId::I2c(0),
        options,
        BusResources::frame(BUS),
        manager(),
        Mock::new(),
    )))
}

pub fn spi_bus(options: BusOptions) -> &'static Bus<'static, M, Mock<SpiConfig>> {
    Box::leak(Box::new(Bus::new(
        BusId::Spi(0),
        options,
        BusResources::frame(BUS),
        manager(),
        Mock::new(),
    )))
}

pub fn uart_bus(options: BusOptions) -> &'static Bus<'static, M, Mock<UartConfig>> {
    Box::leak(Box::new(Bus::new(
        BusId::Uart(0),
        options,
        BusResources::uart(UART_CONFIG, UART_TX, UART_RX),
        manager(),
        Mock { streaming: true, ..Mock::new() },
    )))
}

pub fn device<C: Clone>(
    bus: &'static Bus<'static, M, Mock<C>>,
    config: C,
    id: ResourceId,
) -> &'static Device<'static, M, Mock<C>> {
    Box::leak(Box::new(Device::new(bus, config, ResourceAssignment::Static(id), None)))
}

pub fn dma_device<C: Clone>(
    bus: &'static Bus<'static, M, Mock<C>>,
    config: C,
    id: ResourceId,
) -> &'static Device<'static, M, Mock<C>> {
    let dma = DmaResource { channel: DmaChannel(0), resource: DMA };
    Box::leak(Box::new(Device::new(bus, config, ResourceAssignment::Static(id), Some(dma))))
}

pub fn leak_buf<const N: usize>() -> &'static mut [u8] {
    Box::leak(Box::new([0u8; N]))
}
