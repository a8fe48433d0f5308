// ============================================================================
// Vigil Library
// ============================================================================

pub mod assets;
pub mod auth;
pub mod beneficiary;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod facade;
pub mod liveness;
pub mod notify;
pub mod release;
pub mod storage;
pub mod trustee;
pub mod web;

// Re-export main types for convenience
pub use core::{
    AdminId, BeneficiaryId, Clock, CycleId, EnrollmentState, InvitationDecision, LifecycleState,
    ManualClock, Result, SystemClock, TrusteeId, UserId, Verdict, VigilError,
};
pub use facade::{
    ConsoleEntry, InvitationView, PurgeReport, SettingsUpdate, TrusteeCounts, UserStatus, Vigil,
    VigilBuilder,
};

pub use assets::{AssetDirectory, InMemoryAssetDirectory};
pub use auth::{Principal, Role};
pub use beneficiary::{Beneficiary, BeneficiaryBook};
pub use config::VigilConfig;
pub use coordinator::{
    ActivityReceipt, Evaluation, OwnerLocks, ResponseReceipt, TickReport, Ticker,
    VerificationCoordinator,
};
pub use liveness::{LivenessRecord, LivenessStore};
pub use notify::{
    AlertKind, LogNotifier, Notification, NotificationDispatcher, Notifier, Outbox,
    WebhookNotifier,
};
pub use release::{ReleaseAuthority, ReleaseReceipt};
pub use storage::DurabilityMode;
pub use trustee::{InviteOutcome, QuorumTally, TrusteeRegistry, TrusteeRelationship};
