#![no_std]
//! Bitmask resource manager for shared peripheral arbitration.
//!
//! Every arbitrated thing (a bus, a device on a bus, a DMA channel pair) is
//! represented by one bit. A caller waits until *all* bits of a mask are free
//! and takes them in one step, so combined waits such as "bus plus DMA
//! channel" can never deadlock against each other half-way.
//!
//! Release never waits and may be called from interrupt context.

mod error;
mod manager;
mod mask;

pub use error::ResourceError;
pub use manager::ResourceManager;
pub use mask::{ResourceId, ResourceMask, MAX_RESOURCES};
