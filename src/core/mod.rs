pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, VigilError};
pub use types::{
    AdminId, BeneficiaryId, CycleId, EnrollmentState, InvitationDecision, LifecycleState,
    TrusteeId, UserId, Verdict,
};
