//! Trustee Registry: enrollment and per-cycle responses.

pub mod registry;
pub mod relationship;

pub use registry::{InviteOutcome, QuorumTally, TrusteeRegistry};
pub use relationship::{CycleResponse, TrusteeRelationship, normalize_contact};
