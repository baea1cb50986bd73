//! Error types for otter-vm-bind

use thiserror::Error;

use crate::handle::Handle;

/// Failure reported by a native allocator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("native allocation of {resource} failed: {reason}")]
pub struct AllocationError {
    /// Resource kind that was being allocated
    pub resource: &'static str,
    /// Reason given by the native layer
    pub reason: String,
}

impl AllocationError {
    /// Create an allocation error for a resource kind
    pub fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}

/// Binding lifecycle error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// `bind` called on an object that already owns a handle
    #[error("object already bound to {existing}, refusing to rebind to {attempted}")]
    DoubleBind {
        /// Handle installed by the first bind
        existing: Handle,
        /// Handle passed to the rejected bind
        attempted: Handle,
    },

    /// Release requested for a handle the registry does not track
    #[error("double free of {0}: handle is not registered")]
    DoubleFree(Handle),

    /// Handle accessed after the object released it
    #[error("{0} used after dispose")]
    UseAfterDispose(Handle),

    /// Handle accessed before any bind
    #[error("object is not bound to a native handle")]
    NotBound,

    /// The sweeper thread exited, normally or by panicking
    #[error("sweeper thread is not running")]
    SweeperStopped,

    /// Native allocation failed
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Result type using BindError
pub type BindResult<T> = Result<T, BindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_handle() {
        let err = BindError::DoubleFree(Handle::from_raw(7));
        assert_eq!(err.to_string(), "double free of handle#7: handle is not registered");

        let err = BindError::DoubleBind {
            existing: Handle::from_raw(1),
            attempted: Handle::from_raw(2),
        };
        assert!(err.to_string().contains("handle#1"));
        assert!(err.to_string().contains("handle#2"));
    }

    #[test]
    fn test_allocation_error_converts() {
        let err: BindError = AllocationError::new("bitmap", "out of memory").into();
        assert_eq!(
            err.to_string(),
            "native allocation of bitmap failed: out of memory"
        );
    }
}
