//! Invariant checks for sweep plans and flux stores.
//!
//! Plans and stores are built once per direction-group and then reused for
//! every sweep iteration, so a structural mistake shows up as silently wrong
//! flux far from its cause. Types implementing [`DebugInvariants`] can be
//! re-validated cheaply in debug builds.

use crate::mesh_error::MeshSweepError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MeshSweepError>;
}

/// Turn a failed condition into an `InvalidState` error.
#[inline]
pub(crate) fn ensure(cond: bool, what: &'static str) -> Result<(), MeshSweepError> {
    if cond {
        Ok(())
    } else {
        Err(MeshSweepError::InvalidState(what))
    }
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[sweep invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
