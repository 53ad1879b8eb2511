/// Errors reported by the [`ResourceManager`](crate::ResourceManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResourceError {
    /// Every resource id is already reserved or allocated.
    Exhausted,
}

impl core::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResourceError::Exhausted => {
                write!(f, "no free resource id left to allocate")
            }
        }
    }
}
