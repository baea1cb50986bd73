//! Shared fixtures for otter-vm-bind integration tests

#![allow(dead_code)]

mod native;

use std::sync::Arc;

use otter_vm_bind::{AllocationError, BindConfig, Handle, NativeAllocator, NativeFree, NativeRegistry};
use tracing_subscriber::filter::EnvFilter;

pub use native::{Alloc, CountingHeap};

/// Route `otter::bind` events to the test output when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry that reports lifecycle misuse as errors instead of panicking
pub fn lenient_registry() -> Arc<NativeRegistry> {
    init_tracing();
    NativeRegistry::with_config(BindConfig::lenient())
}
