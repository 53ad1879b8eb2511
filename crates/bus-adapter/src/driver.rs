//! Interface the adapters expect from a peripheral's low-level driver.
//!
//! A driver owns the controller registers and nothing else: it never blocks,
//! never arbitrates, and reports completion by having the board's interrupt
//! handler call [`Bus::on_complete`](crate::Bus::on_complete) (or
//! [`Bus::on_read_complete`](crate::Bus::on_read_complete) for a UART
//! receiver) with the [`Outcome`](crate::Outcome) of the primitive that
//! finished.

use crate::config::DmaChannel;

/// Operations shared by every controller kind.
pub trait BusDriver {
    /// Per-device hardware parameters loaded by [`apply`](Self::apply).
    type Config;

    /// Power up / clock the controller. Called when the first handle on the
    /// bus opens.
    fn enable(&mut self);

    /// Stop the controller. Called when the last handle on the bus closes.
    fn disable(&mut self);

    /// Load the complete configuration of a device into the controller.
    fn apply(&mut self, config: &Self::Config);

    /// Start sending `data`. `last` ends the frame: I2C issues STOP and waits
    /// for it, SPI releases chip select, UART ignores it.
    ///
    /// # Safety
    ///
    /// The driver may keep reading `data` after returning. The caller must
    /// keep it alive and unmodified until completion is reported or
    /// [`abort`](Self::abort) has returned.
    unsafe fn start_write(&mut self, data: &[u8], last: bool);

    /// Start receiving `buf.len()` bytes, through `dma` when given. `last`
    /// has the same meaning as for [`start_write`](Self::start_write).
    ///
    /// # Safety
    ///
    /// The driver may keep writing `buf` after returning. The caller must
    /// keep it alive and otherwise untouched until completion is reported or
    /// [`abort`](Self::abort) has returned.
    unsafe fn start_read(
        &mut self,
        buf: &mut [u8],
        last: bool,
        dma: Option<DmaChannel>,
    );

    /// Chain a write and a read into one primitive with a single completion.
    ///
    /// Controllers that cannot chain return `false` without touching the
    /// hardware, and the adapter falls back to two phases.
    ///
    /// # Safety
    ///
    /// Same contract as [`start_write`](Self::start_write) and
    /// [`start_read`](Self::start_read) for both buffers.
    unsafe fn start_write_read(
        &mut self,
        _data: &[u8],
        _buf: &mut [u8],
        _dma: Option<DmaChannel>,
    ) -> bool {
        false
    }

    /// A transfer is still moving bytes on the wire.
    fn is_busy(&self) -> bool;

    /// Stop whatever is in flight. No completion is reported afterwards.
    fn abort(&mut self);
}
