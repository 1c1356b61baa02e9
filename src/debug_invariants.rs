//! Invariant validation hooks shared by the layout types.
//!
//! Checks run in debug builds, or in release builds compiled with the
//! `check-invariants` / `strict-invariants` features.

use crate::matrix_error::MatrixError;

/// Structures whose internal consistency can be validated on demand.
pub trait DebugInvariants {
    /// Panic on the first broken invariant when checks are enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first violation found.
    fn validate_invariants(&self) -> Result<(), MatrixError>;
}

/// True when this build runs invariant checks.
#[inline]
pub const fn invariant_checks_enabled() -> bool {
    cfg!(any(
        debug_assertions,
        feature = "strict-invariants",
        feature = "check-invariants"
    ))
}

/// Run a fallible check and panic with context if it fails, but only when
/// invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        if $crate::debug_invariants::invariant_checks_enabled() {
            if let Err(e) = $expr {
                panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
            }
        }
    };
}
