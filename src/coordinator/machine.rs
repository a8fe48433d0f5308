//! Legal lifecycle edges.
//!
//! ```text
//!   ACTIVE ──overdue──▶ PENDING_VERIFICATION ──quorum──▶ TRIGGERED ──release──▶ RELEASED
//!      ▲                        │
//!      └──── veto / liveness ───┘
//! ```

use crate::core::{LifecycleState, Result, VigilError};

/// Returns `Ok` when `from -> to` is an edge of the lifecycle machine.
pub fn ensure_transition(from: LifecycleState, to: LifecycleState) -> Result<()> {
    if is_legal(from, to) {
        Ok(())
    } else {
        Err(VigilError::InvalidTransition(format!("{} -> {}", from, to)))
    }
}

pub fn is_legal(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;
    matches!(
        (from, to),
        (Active, PendingVerification)
            | (PendingVerification, Active)
            | (PendingVerification, Triggered)
            | (Triggered, Released)
    )
}
