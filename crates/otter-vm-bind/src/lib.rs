//! # Otter VM Native Bindings
//!
//! Ties the lifetime of native-heap resources to managed-side proxies.
//!
//! ## Design
//!
//! - **Handles**: opaque `u64` identifiers, only compared and hashed
//! - **Bound objects**: own one handle each; dropping the last owner queues
//!   the handle instead of freeing it inline
//! - **Registry**: per-handle reference counts, the single caller of native
//!   free, drained by explicit or background sweeps
//! - **Weak cache**: keyed lookups that never extend a value's lifetime

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod bound;
pub mod config;
pub mod error;
pub mod handle;
pub mod queue;
pub mod registry;
pub mod sweeper;
pub mod weak;

#[cfg(test)]
#[path = "../tests/common/native.rs"]
pub(crate) mod test_support;

pub use bound::{BindState, BoundObject};
pub use config::BindConfig;
pub use error::{AllocationError, BindError, BindResult};
pub use handle::{Handle, NativeAllocator, NativeFree};
pub use queue::{PendingDelete, PendingDeleteQueue};
pub use registry::{NativeRegistry, RegistryStats, SweepReport};
pub use sweeper::Sweeper;
pub use weak::{WeakCache, WeakSlot};
