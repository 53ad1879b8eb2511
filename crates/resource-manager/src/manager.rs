use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::error::ResourceError;
use crate::mask::{ResourceId, ResourceMask, MAX_RESOURCES};

/// Upper bound on tasks parked in [`ResourceManager::acquire`] at once.
///
/// When more tasks wait, every waiter is woken and re-registers, which costs
/// a spurious poll but never loses a wakeup.
const MAX_WAITERS: usize = 8;

struct State {
    /// Bits currently held by some owner.
    held: u32,
    /// Bits handed out statically or by [`ResourceManager::allocate`].
    allocated: u32,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

/// Arbitrates exclusive ownership of resource bits.
///
/// The manager has no notion of *who* holds a bit; callers above it (the bus
/// adapter leases) track ownership. Acquisition is all-or-nothing over the
/// requested mask.
pub struct ResourceManager<M: RawMutex> {
    state: Mutex<M, RefCell<State>>,
}

impl<M: RawMutex> ResourceManager<M> {
    /// Create a manager. `reserved` lists the statically assigned ids so
    /// [`allocate`](Self::allocate) never hands them out again.
    pub const fn new(reserved: ResourceMask) -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                held: 0,
                allocated: reserved.bits(),
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Wait until every resource in `mask` is free, then take them all.
    pub async fn acquire(&self, mask: ResourceMask) {
        poll_fn(|cx| {
            self.state.lock(|state| {
                let mut state = state.borrow_mut();
                if state.held & mask.bits() == 0 {
                    state.held |= mask.bits();
                    Poll::Ready(())
                } else {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }

    /// Take every resource in `mask` if all of them are free right now.
    pub fn try_acquire(&self, mask: ResourceMask) -> bool {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if state.held & mask.bits() == 0 {
                state.held |= mask.bits();
                true
            } else {
                false
            }
        })
    }

    /// Give back every resource in `mask` and wake the waiters.
    ///
    /// Releasing a bit that is not held is a programming error and panics.
    pub fn release(&self, mask: ResourceMask) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            assert!(
                state.held & mask.bits() == mask.bits(),
                "released a resource that is not held"
            );
            state.held &= !mask.bits();
            state.waiters.wake();
        })
    }

    /// Hand out an id that was neither reserved nor allocated before.
    pub fn allocate(&self) -> Result<ResourceId, ResourceError> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let free = !state.allocated;
            if free == 0 {
                return Err(ResourceError::Exhausted);
            }
            let index = free.trailing_zeros() as u8;
            debug_assert!(index < MAX_RESOURCES);
            state.allocated |= 1 << index;
            Ok(ResourceId::new(index))
        })
    }

    /// Snapshot of the bits currently held.
    pub fn held(&self) -> ResourceMask {
        self.state.lock(|state| ResourceMask::from_bits(state.borrow().held))
    }

    /// Returns `true` if any bit of `mask` is currently held.
    pub fn is_held(&self, mask: ResourceMask) -> bool {
        self.held().intersects(mask)
    }
}
