//! Background sweeper
//!
//! Owns a dedicated thread that drains the registry's pending-delete queue on
//! a fixed interval, so every deferred native free happens on one thread.
//!
//! A strict registry panics on a double free. When that happens on the
//! sweeper thread the panic is carried back to the owner: `sweep_now` fails
//! with `SweeperStopped` and `shutdown` (or drop) resumes the panic.

use std::io;
use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};

use crate::error::{BindError, BindResult};
use crate::registry::{NativeRegistry, SweepReport};

enum Command {
    /// Sweep now and reply with the report
    Sweep(Sender<SweepReport>),
    /// Run a final sweep and exit
    Shutdown,
}

/// Handle to the sweeper thread. Dropping it stops the thread after a final
/// sweep.
pub struct Sweeper {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Start sweeping `registry` every `config().sweep_interval`
    pub fn spawn(registry: Arc<NativeRegistry>) -> io::Result<Self> {
        let (commands, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("otter-bind-sweeper".into())
            .spawn(move || run_sweeper(registry, rx))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    /// Sweep on the sweeper thread and wait for the result.
    ///
    /// Fails with `SweeperStopped` if the thread has exited or dies while
    /// sweeping.
    pub fn sweep_now(&self) -> BindResult<SweepReport> {
        let (reply, report) = bounded(1);
        self.commands
            .send(Command::Sweep(reply))
            .map_err(|_| BindError::SweeperStopped)?;
        report.recv().map_err(|_| BindError::SweeperStopped)
    }

    /// Check if the thread is still sweeping
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread after a final sweep.
    ///
    /// # Panics
    ///
    /// Resumes the sweeper thread's panic if it died, e.g. on a strict
    /// double free.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(payload) = thread.join() {
            tracing::error!(target: "otter::bind", "sweeper thread panicked");
            if !thread::panicking() {
                panic::resume_unwind(payload);
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sweeper(registry: Arc<NativeRegistry>, commands: Receiver<Command>) {
    let interval = registry.config().sweep_interval;
    tracing::debug!(target: "otter::bind", interval_ms = interval.as_millis() as u64, "sweeper started");

    loop {
        match commands.recv_timeout(interval) {
            Ok(Command::Sweep(reply)) => {
                let _ = reply.send(registry.sweep());
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                registry.sweep();
            }
        }
    }

    registry.sweep();
    tracing::debug!(target: "otter::bind", "sweeper stopped");
}
