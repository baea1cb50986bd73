//! Bound objects
//!
//! A [`BoundObject`] is the managed-side proxy for one native resource. It
//! registers its handle with the [`NativeRegistry`] when bound and releases it
//! either on [`dispose`](BoundObject::dispose) or, when the last owner drops
//! it, by pushing the handle onto the pending-delete queue for the next sweep.
//!
//! ## Lifecycle
//!
//! ```text
//! Unbound --bind--> Bound --dispose--> Released   (freed now, if last owner)
//!                     |
//!                     +----drop------> Released   (queued for sweep)
//! ```
//!
//! The `Bound -> Released` transition is a single compare-exchange, so a
//! handle is handed back at most once per object even when `dispose` races
//! with the final drop.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{BindError, BindResult};
use crate::handle::{Handle, NativeAllocator, NativeFree};
use crate::queue::PendingDelete;
use crate::registry::NativeRegistry;

/// Binding state of a [`BoundObject`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// No handle installed yet
    Unbound = 0,
    /// Owns a registered handle
    Bound = 1,
    /// Handle handed back to the registry
    Released = 2,
}

impl From<u8> for BindState {
    fn from(v: u8) -> Self {
        match v {
            0 => BindState::Unbound,
            1 => BindState::Bound,
            _ => BindState::Released,
        }
    }
}

/// Managed-side owner of exactly one native handle
pub struct BoundObject {
    registry: Arc<NativeRegistry>,
    handle: OnceLock<Handle>,
    state: AtomicU8,
}

impl BoundObject {
    /// Create an object with no handle; call [`bind`](Self::bind) before
    /// exposing it.
    pub fn unbound(registry: &Arc<NativeRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
            handle: OnceLock::new(),
            state: AtomicU8::new(BindState::Unbound as u8),
        }
    }

    /// Allocate a native resource and bind it to a new object.
    ///
    /// On allocation failure nothing is registered and the error is returned
    /// to the caller.
    pub fn allocate<A>(
        registry: &Arc<NativeRegistry>,
        allocator: &Arc<A>,
        params: A::Params,
    ) -> BindResult<Self>
    where
        A: NativeAllocator + 'static,
    {
        let handle = allocator.allocate(params)?;
        let free: Arc<dyn NativeFree> = allocator.clone();
        Ok(Self::adopt(registry, free, handle))
    }

    /// Bind an existing native handle to a new object.
    ///
    /// If the handle is already registered this adds an owner to it, and the
    /// resource is freed only after every owner has released it.
    pub fn adopt(registry: &Arc<NativeRegistry>, free: Arc<dyn NativeFree>, handle: Handle) -> Self {
        let object = Self::unbound(registry);
        object.install(handle, free);
        object
    }

    /// Bind `handle` to this object.
    ///
    /// Must be called at most once. A second call is a programming error:
    /// it panics when the registry is strict, otherwise the first bind is kept
    /// and `DoubleBind` is returned.
    pub fn bind(&self, handle: Handle, free: Arc<dyn NativeFree>) -> BindResult<()> {
        if let Some(&existing) = self.handle.get() {
            return Err(self.double_bind(existing, handle));
        }
        if !self.install(handle, free) {
            let existing = self.handle.get().copied().unwrap_or(handle);
            return Err(self.double_bind(existing, handle));
        }
        Ok(())
    }

    /// Create another object sharing this object's native resource.
    pub fn share(&self) -> BindResult<Self> {
        let handle = self.native_handle()?;
        self.registry.retain(handle)?;
        let object = Self::unbound(&self.registry);
        let _ = object.handle.set(handle);
        object
            .state
            .store(BindState::Bound as u8, Ordering::Release);
        Ok(object)
    }

    /// The owned handle.
    ///
    /// Fails with `NotBound` before bind and `UseAfterDispose` once the
    /// handle has been released.
    pub fn native_handle(&self) -> BindResult<Handle> {
        match (self.state(), self.handle.get()) {
            (BindState::Bound, Some(&handle)) => Ok(handle),
            (BindState::Released, Some(&handle)) => Err(BindError::UseAfterDispose(handle)),
            _ => Err(BindError::NotBound),
        }
    }

    /// The handle this object was bound to, regardless of state
    pub fn raw_handle(&self) -> Option<Handle> {
        self.handle.get().copied()
    }

    /// Check if the object still owns its handle
    pub fn is_bound(&self) -> bool {
        self.state() == BindState::Bound
    }

    /// Current binding state
    pub fn state(&self) -> BindState {
        BindState::from(self.state.load(Ordering::Acquire))
    }

    /// Registry this object reports to
    pub fn registry(&self) -> &Arc<NativeRegistry> {
        &self.registry
    }

    /// Release the handle now instead of waiting for a sweep.
    ///
    /// The native resource is freed on this thread if this was its last
    /// owner. Afterwards `is_bound` is false and dropping the object does
    /// nothing further.
    pub fn dispose(&self) -> BindResult<()> {
        let handle = self.take_handle()?;
        self.registry.unregister(handle).map(|_| ())
    }

    fn install(&self, handle: Handle, free: Arc<dyn NativeFree>) -> bool {
        if self.handle.set(handle).is_err() {
            return false;
        }
        self.registry.register(handle, free);
        self.state
            .store(BindState::Bound as u8, Ordering::Release);
        true
    }

    /// Move `Bound -> Released`, returning the handle to hand back
    fn take_handle(&self) -> BindResult<Handle> {
        match self.state.compare_exchange(
            BindState::Bound as u8,
            BindState::Released as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.handle.get().copied().ok_or(BindError::NotBound),
            Err(_) => Err(self.native_handle().err().unwrap_or(BindError::NotBound)),
        }
    }

    fn double_bind(&self, existing: Handle, attempted: Handle) -> BindError {
        if self.registry.config().strict {
            panic!("object already bound to {existing}, refusing to rebind to {attempted}");
        }
        tracing::warn!(
            target: "otter::bind",
            %existing,
            %attempted,
            "second bind ignored"
        );
        BindError::DoubleBind {
            existing,
            attempted,
        }
    }
}

impl Drop for BoundObject {
    fn drop(&mut self) {
        // Only record the handle here; the free happens on the sweeping thread.
        if let Ok(handle) = self.take_handle() {
            self.registry.pending().offer(PendingDelete::new(handle));
        }
    }
}

impl fmt::Debug for BoundObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundObject")
            .field("handle", &self.handle.get())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindConfig;
    use crate::test_support::{Alloc, CountingHeap};

    fn lenient() -> Arc<NativeRegistry> {
        NativeRegistry::with_config(BindConfig::lenient())
    }

    #[test]
    fn test_allocate_registers_handle() {
        let registry = lenient();
        let native = CountingHeap::new();

        let object = BoundObject::allocate(&registry, &native, Alloc::default()).unwrap();
        let handle = object.native_handle().unwrap();

        assert!(object.is_bound());
        assert!(registry.contains(handle));
        assert_eq!(registry.count(), 1);
        assert_eq!(native.live(), 1);
    }

    #[test]
    fn test_allocation_failure_leaves_registry_untouched() {
        let registry = lenient();
        let native = CountingHeap::new();

        let err = BoundObject::allocate(&registry, &native, Alloc { fail: true }).unwrap_err();
        assert!(matches!(err, BindError::Allocation(_)));
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.stats().total_bound, 0);
    }

    #[test]
    fn test_dispose_frees_immediately() {
        let registry = lenient();
        let native = CountingHeap::new();
        let object = BoundObject::allocate(&registry, &native, Alloc::default()).unwrap();
        let handle = object.native_handle().unwrap();

        object.dispose().unwrap();
        assert!(!object.is_bound());
        assert_eq!(object.state(), BindState::Released);
        assert_eq!(native.freed(), vec![handle]);
        assert_eq!(
            object.native_handle(),
            Err(BindError::UseAfterDispose(handle))
        );
        assert_eq!(object.dispose(), Err(BindError::UseAfterDispose(handle)));
        assert_eq!(object.raw_handle(), Some(handle));

        drop(object);
        assert_eq!(registry.pending_len(), 0);
        assert_eq!(native.total_frees(), 1);
    }

    #[test]
    fn test_drop_enqueues_once() {
        let registry = lenient();
        let native = CountingHeap::new();
        let object = BoundObject::allocate(&registry, &native, Alloc::default()).unwrap();
        let handle = object.native_handle().unwrap();

        drop(object);
        assert_eq!(registry.pending_len(), 1);
        assert!(registry.contains(handle));
        assert_eq!(native.total_frees(), 0);

        registry.sweep();
        assert!(!registry.contains(handle));
        assert_eq!(native.freed(), vec![handle]);
    }

    #[test]
    fn test_unbound_object() {
        let registry = lenient();
        let object = BoundObject::unbound(&registry);
        assert!(!object.is_bound());
        assert!(Arc::ptr_eq(object.registry(), &registry));
        assert_eq!(object.raw_handle(), None);
        assert_eq!(object.native_handle(), Err(BindError::NotBound));
        assert_eq!(object.dispose(), Err(BindError::NotBound));
        drop(object);
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn test_second_bind_keeps_first() {
        let registry = lenient();
        let native = CountingHeap::new();
        let object = BoundObject::unbound(&registry);
        let first = Handle::from_raw(1);
        let second = Handle::from_raw(2);

        object.bind(first, native.clone()).unwrap();
        assert_eq!(
            object.bind(second, native.clone()),
            Err(BindError::DoubleBind {
                existing: first,
                attempted: second,
            })
        );
        assert_eq!(object.native_handle(), Ok(first));
        assert!(!registry.contains(second));
    }

    #[test]
    #[should_panic(expected = "refusing to rebind")]
    fn test_second_bind_panics_when_strict() {
        let registry = NativeRegistry::with_config(BindConfig::strict());
        let native = CountingHeap::new();
        let object = BoundObject::unbound(&registry);
        object.bind(Handle::from_raw(1), native.clone()).unwrap();
        let _ = object.bind(Handle::from_raw(2), native.clone());
    }

    #[test]
    fn test_share_counts_owners() {
        let registry = lenient();
        let native = CountingHeap::new();
        let first = BoundObject::allocate(&registry, &native, Alloc::default()).unwrap();
        let handle = first.native_handle().unwrap();
        let second = first.share().unwrap();

        assert_eq!(registry.ref_count(handle), Some(2));
        first.dispose().unwrap();
        assert_eq!(native.total_frees(), 0);
        assert!(second.is_bound());

        drop(second);
        registry.sweep();
        assert_eq!(native.freed(), vec![handle]);
    }
}
