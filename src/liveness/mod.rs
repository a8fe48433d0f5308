//! Liveness Store: per-owner last activity, threshold and lifecycle state.

pub mod record;
pub mod store;

pub use record::{LivenessRecord, ReleaseAudit, TriggerAudit, compute_deadline, is_overdue};
pub use store::{ActivityOutcome, LivenessStore};
