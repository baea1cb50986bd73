//! Pending-delete queue
//!
//! Bound objects that lose their last owner push a plain record here from
//! whatever thread dropped them. Nothing on that path touches native code;
//! the registry drains the queue later on the sweeping thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::handle::Handle;

/// A handle whose bound object became unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDelete {
    /// Handle to release
    pub handle: Handle,
    /// When the reachability tracker fired
    pub enqueued_at: Instant,
}

impl PendingDelete {
    /// Create an entry stamped with the current time
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            enqueued_at: Instant::now(),
        }
    }

    /// Time spent waiting for a sweep
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Multi-producer FIFO of pending deletions
#[derive(Debug)]
pub struct PendingDeleteQueue {
    tx: Sender<PendingDelete>,
    rx: Receiver<PendingDelete>,
    warn_threshold: usize,
    /// Set once the depth reaches the threshold, cleared when it falls below
    warned: AtomicBool,
}

impl PendingDeleteQueue {
    /// Create a queue that warns once its depth reaches `warn_threshold`.
    ///
    /// The warning fires again only after a drain brings the depth back
    /// below the threshold.
    pub fn new(warn_threshold: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            warn_threshold,
            warned: AtomicBool::new(false),
        }
    }

    /// Enqueue an entry. Never blocks.
    pub fn offer(&self, entry: PendingDelete) {
        // rx lives as long as tx, so the channel cannot be disconnected
        let _ = self.tx.try_send(entry);

        let depth = self.tx.len();
        if depth >= self.warn_threshold && !self.warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                target: "otter::bind",
                depth,
                "pending delete queue is backing up; is anything sweeping?"
            );
        }
    }

    /// Dequeue the oldest entry, if any
    pub fn poll(&self) -> Option<PendingDelete> {
        let entry = self.rx.try_recv().ok();
        self.rearm_warning();
        entry
    }

    /// Dequeue every entry currently queued, oldest first
    pub fn drain_all(&self) -> Vec<PendingDelete> {
        let entries = self.rx.try_iter().collect();
        self.rearm_warning();
        entries
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    fn rearm_warning(&self) {
        if self.rx.len() < self.warn_threshold {
            self.warned.store(false, Ordering::Relaxed);
        }
    }
}

impl Default for PendingDeleteQueue {
    fn default() -> Self {
        Self::new(4096)
    }
}
