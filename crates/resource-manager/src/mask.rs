use core::ops::{BitOr, BitOrAssign};

/// Number of distinct resource ids a manager can track.
pub const MAX_RESOURCES: u8 = 32;

/// Opaque identifier of one arbitrated resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceId(u8);

impl ResourceId {
    /// Create an id from its bit index.
    ///
    /// Panics (at compile time when used in a `const`) if `index` is not below
    /// [`MAX_RESOURCES`].
    pub const fn new(index: u8) -> Self {
        assert!(index < MAX_RESOURCES, "resource id out of range");
        Self(index)
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// The single-bit mask for this id.
    pub const fn mask(self) -> ResourceMask {
        ResourceMask(1 << self.0)
    }
}

/// A set of resource ids acquired or released together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceMask(u32);

impl ResourceMask {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl From<ResourceId> for ResourceMask {
    fn from(id: ResourceId) -> Self {
        id.mask()
    }
}

impl BitOr for ResourceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for ResourceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
