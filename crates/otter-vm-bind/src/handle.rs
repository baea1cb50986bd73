//! Opaque native handles and the native-layer traits

use std::fmt;

use crate::error::AllocationError;

/// Opaque identifier of a native-heap resource.
///
/// The managed side never interprets the bits: handles are only compared,
/// hashed and passed back to the native layer that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw value returned by native code
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value to hand back to native code
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Release side of a native resource type.
///
/// The registry calls `free` exactly once per handle, while holding its lock,
/// so implementations must not call back into the registry.
pub trait NativeFree: Send + Sync {
    /// Release the native resource behind `handle`
    fn free(&self, handle: Handle);

    /// Resource kind, used in log events
    fn kind(&self) -> &'static str {
        "native"
    }
}

/// Allocation side of a native resource type
pub trait NativeAllocator: NativeFree {
    /// Arguments needed to create one resource
    type Params;

    /// Create a resource and return its handle
    fn allocate(&self, params: Self::Params) -> Result<Handle, AllocationError>;
}
