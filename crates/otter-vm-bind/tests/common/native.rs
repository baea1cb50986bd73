//! Counting stub of a native heap, shared by unit and integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::{AllocationError, Handle, NativeAllocator, NativeFree};

/// Hands out sequential handles and records every free call in order
#[derive(Default)]
pub struct CountingHeap {
    next: AtomicU64,
    live: Mutex<FxHashSet<Handle>>,
    freed: Mutex<Vec<Handle>>,
}

/// Parameters for [`CountingHeap::allocate`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Alloc {
    /// Reject the allocation
    pub fail: bool,
}

impl CountingHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a handle outside of any bound object
    pub fn allocate_raw(&self) -> Handle {
        let handle = Handle::from_raw(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.live.lock().insert(handle);
        handle
    }

    /// Total native free calls
    pub fn total_frees(&self) -> usize {
        self.freed.lock().len()
    }

    /// Free calls issued for one handle
    pub fn frees_of(&self, handle: Handle) -> usize {
        self.freed.lock().iter().filter(|&&h| h == handle).count()
    }

    /// Every freed handle, in free order
    pub fn freed(&self) -> Vec<Handle> {
        self.freed.lock().clone()
    }

    /// Resources allocated and not yet freed
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }
}

impl NativeFree for CountingHeap {
    fn free(&self, handle: Handle) {
        self.live.lock().remove(&handle);
        self.freed.lock().push(handle);
    }

    fn kind(&self) -> &'static str {
        "counting-heap"
    }
}

impl NativeAllocator for CountingHeap {
    type Params = Alloc;

    fn allocate(&self, params: Alloc) -> Result<Handle, AllocationError> {
        if params.fail {
            return Err(AllocationError::new("counting-heap", "allocation refused"));
        }
        Ok(self.allocate_raw())
    }
}
