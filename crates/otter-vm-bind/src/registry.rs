//! Native registry
//!
//! Process-lifetime record of every bound native handle. The registry is the
//! only component that calls [`NativeFree::free`]: a handle is freed when its
//! reference count drops to zero, either through explicit disposal or through
//! a sweep of the pending-delete queue.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::BindConfig;
use crate::error::{BindError, BindResult};
use crate::handle::{Handle, NativeFree};
use crate::queue::{PendingDelete, PendingDeleteQueue};

/// One registered native resource
struct Binding {
    /// Number of bound objects sharing the handle
    refs: usize,
    /// Release function for the resource type
    free: Arc<dyn NativeFree>,
    /// When the handle was first registered
    bound_at: Instant,
}

/// Outcome of a single [`NativeRegistry::sweep`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries taken from the pending-delete queue
    pub drained: usize,
    /// Handles whose count reached zero and were freed
    pub freed: usize,
    /// Handles still referenced by another bound object
    pub shared: usize,
    /// Entries naming a handle the registry did not track
    pub rejected: usize,
}

/// Registry statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Distinct handles currently tracked
    pub live_handles: usize,
    /// Entries waiting in the pending-delete queue
    pub pending: usize,
    /// Binds performed since creation (or the last reset)
    pub total_bound: u64,
    /// Native free calls issued
    pub total_freed: u64,
    /// Sweeps performed
    pub sweep_count: u64,
    /// Releases rejected as double frees
    pub rejected_frees: u64,
}

/// Central registry of bound native handles.
///
/// `register`, `unregister` and `sweep` are serialized by a single lock so the
/// reference-count update and the free call happen atomically per handle.
pub struct NativeRegistry {
    config: BindConfig,
    bindings: Mutex<FxHashMap<Handle, Binding>>,
    pending: PendingDeleteQueue,
    total_bound: AtomicU64,
    total_freed: AtomicU64,
    sweep_count: AtomicU64,
    rejected_frees: AtomicU64,
}

impl NativeRegistry {
    /// Create a registry with the default configuration
    pub fn new() -> Arc<Self> {
        Self::with_config(BindConfig::default())
    }

    /// Create a registry with a custom configuration
    pub fn with_config(config: BindConfig) -> Arc<Self> {
        Arc::new(Self {
            pending: PendingDeleteQueue::new(config.queue_warn_threshold),
            bindings: Mutex::new(FxHashMap::default()),
            total_bound: AtomicU64::new(0),
            total_freed: AtomicU64::new(0),
            sweep_count: AtomicU64::new(0),
            rejected_frees: AtomicU64::new(0),
            config,
        })
    }

    /// Get config
    pub fn config(&self) -> &BindConfig {
        &self.config
    }

    /// Queue fed by bound objects that became unreachable
    pub fn pending(&self) -> &PendingDeleteQueue {
        &self.pending
    }

    /// Register one more owner of `handle`.
    ///
    /// Creates the entry at count 1 if absent. When the handle is already
    /// tracked the existing release function is kept and `free` is ignored.
    /// Returns the new reference count.
    pub fn register(&self, handle: Handle, free: Arc<dyn NativeFree>) -> usize {
        let mut bindings = self.bindings.lock();
        let binding = bindings.entry(handle).or_insert_with(|| Binding {
            refs: 0,
            free,
            bound_at: Instant::now(),
        });
        binding.refs += 1;
        let refs = binding.refs;
        drop(bindings);

        self.total_bound.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "otter::bind", %handle, refs, "registered");
        refs
    }

    /// Add an owner to a handle that is already registered.
    ///
    /// Returns the new reference count, or `NotBound` if the handle was
    /// never registered or has already been freed. Nothing is released, so
    /// a failed retain is not counted as a rejected free.
    pub fn retain(&self, handle: Handle) -> BindResult<usize> {
        let mut bindings = self.bindings.lock();
        let Some(binding) = bindings.get_mut(&handle) else {
            drop(bindings);
            tracing::warn!(target: "otter::bind", %handle, "retain of unregistered handle");
            return Err(BindError::NotBound);
        };
        binding.refs += 1;
        let refs = binding.refs;
        drop(bindings);

        self.total_bound.fetch_add(1, Ordering::Relaxed);
        Ok(refs)
    }

    /// Drop one owner of `handle`.
    ///
    /// When the count reaches zero the native resource is freed and the
    /// handle is removed. Returns the new reference count. Releasing a handle
    /// that is not registered is a double free: it panics in strict mode and
    /// is otherwise logged and returned as `DoubleFree` without calling native
    /// code.
    pub fn unregister(&self, handle: Handle) -> BindResult<usize> {
        let mut bindings = self.bindings.lock();
        let result = self.release_locked(&mut bindings, handle);
        drop(bindings);
        result.map_err(|handle| self.reject_unknown(handle, self.config.strict))
    }

    /// Drain the pending-delete queue, releasing one owner per entry.
    ///
    /// Safe to call with an empty queue; in that case nothing is touched.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_with(self.config.strict)
    }

    fn sweep_with(&self, strict: bool) -> SweepReport {
        let mut report = SweepReport::default();
        let mut rejected = Vec::new();

        let mut bindings = self.bindings.lock();
        for entry in self.pending.drain_all() {
            report.drained += 1;
            match self.release_locked(&mut bindings, entry.handle) {
                Ok(0) => report.freed += 1,
                Ok(_) => report.shared += 1,
                Err(handle) => {
                    report.rejected += 1;
                    rejected.push(handle);
                }
            }
        }
        let live = bindings.len();
        drop(bindings);

        self.sweep_count.fetch_add(1, Ordering::Relaxed);
        for handle in rejected {
            self.reject_unknown(handle, strict);
        }

        if report.drained > 0 {
            tracing::debug!(
                target: "otter::bind",
                drained = report.drained,
                freed = report.freed,
                shared = report.shared,
                rejected = report.rejected,
                live,
                "sweep complete"
            );
        }
        report
    }

    /// Take the oldest pending entry without releasing it.
    ///
    /// The caller becomes responsible for the entry: pass its handle to
    /// [`unregister`](Self::unregister) to commit the release.
    pub fn pop_pending(&self) -> Option<PendingDelete> {
        self.pending.poll()
    }

    /// Number of entries waiting for a sweep
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of distinct handles currently tracked
    pub fn count(&self) -> usize {
        self.bindings.lock().len()
    }

    /// Check if `handle` is currently registered
    pub fn contains(&self, handle: Handle) -> bool {
        self.bindings.lock().contains_key(&handle)
    }

    /// Current reference count of `handle`, if registered
    pub fn ref_count(&self, handle: Handle) -> Option<usize> {
        self.bindings.lock().get(&handle).map(|b| b.refs)
    }

    /// Every registered handle, in ascending order
    pub fn live_handles(&self) -> Vec<Handle> {
        let mut handles: Vec<_> = self.bindings.lock().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_handles: self.count(),
            pending: self.pending_len(),
            total_bound: self.total_bound.load(Ordering::Relaxed),
            total_freed: self.total_freed.load(Ordering::Relaxed),
            sweep_count: self.sweep_count.load(Ordering::Relaxed),
            rejected_frees: self.rejected_frees.load(Ordering::Relaxed),
        }
    }

    /// Forget every binding and pending entry without calling native free.
    ///
    /// Test-only: any resource still registered is leaked on the native side.
    pub fn reset(&self) {
        let mut bindings = self.bindings.lock();
        let cleared = bindings.len();
        bindings.clear();
        let discarded = self.pending.drain_all().len();
        drop(bindings);

        self.total_bound.store(0, Ordering::Relaxed);
        self.total_freed.store(0, Ordering::Relaxed);
        self.sweep_count.store(0, Ordering::Relaxed);
        self.rejected_frees.store(0, Ordering::Relaxed);

        tracing::debug!(target: "otter::bind", cleared, discarded, "registry reset");
    }

    /// Decrement `handle` and free it at zero. Runs with the lock held.
    ///
    /// Returns the unknown handle on a double free so the caller can report it
    /// after unlocking.
    fn release_locked(
        &self,
        bindings: &mut FxHashMap<Handle, Binding>,
        handle: Handle,
    ) -> Result<usize, Handle> {
        let Some(binding) = bindings.get_mut(&handle) else {
            return Err(handle);
        };

        binding.refs -= 1;
        if binding.refs > 0 {
            return Ok(binding.refs);
        }

        if let Some(binding) = bindings.remove(&handle) {
            tracing::trace!(
                target: "otter::bind",
                %handle,
                kind = binding.free.kind(),
                held_us = binding.bound_at.elapsed().as_micros() as u64,
                "freeing native resource"
            );
            binding.free.free(handle);
            self.total_freed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(0)
    }

    fn reject_unknown(&self, handle: Handle, strict: bool) -> BindError {
        self.rejected_frees.fetch_add(1, Ordering::Relaxed);
        if strict {
            panic!("double free of {handle}: handle is not registered");
        }
        tracing::error!(target: "otter::bind", %handle, "double free ignored: handle is not registered");
        BindError::DoubleFree(handle)
    }
}

impl Drop for NativeRegistry {
    fn drop(&mut self) {
        // Every bound object holds an Arc to the registry, so by now the only
        // live bindings are ones waiting in the queue.
        self.sweep_with(false);

        let leaked = self.bindings.get_mut().len();
        if leaked > 0 {
            tracing::warn!(target: "otter::bind", leaked, "registry dropped with live bindings");
        }
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("live", &self.count())
            .field("pending", &self.pending_len())
            .field("strict", &self.config.strict)
            .finish()
    }
}
