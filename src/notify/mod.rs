//! Outbound notifications.
//!
//! State transitions push `Notification`s onto an unbounded outbox and move
//! on; a `NotificationDispatcher` delivers them to a `Notifier` in the
//! background. Delivery failures are logged and never roll back a
//! transition. Deduplication by cycle id is the receiver's job.

pub mod dispatcher;
pub mod webhook;

pub use dispatcher::NotificationDispatcher;
pub use webhook::WebhookNotifier;

use crate::beneficiary::Beneficiary;
use crate::core::{AdminId, CycleId, TrusteeId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CycleOpened,
    CycleVetoed,
    QuorumReached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// "owner X needs verification for cycle C", one per accepted trustee.
    VerificationRequested {
        owner: UserId,
        trustee: TrusteeId,
        contact: String,
        cycle: CycleId,
    },
    AdministratorAlert {
        owner: UserId,
        cycle: CycleId,
        kind: AlertKind,
    },
    /// Release signal for the asset-store collaborator.
    AssetsReleased {
        owner: UserId,
        admin: AdminId,
        released_at: DateTime<Utc>,
        beneficiaries: Vec<Beneficiary>,
    },
}

impl Notification {
    pub fn owner(&self) -> &UserId {
        match self {
            Self::VerificationRequested { owner, .. }
            | Self::AdministratorAlert { owner, .. }
            | Self::AssetsReleased { owner, .. } => owner,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Transport for notifications (email, SMS, webhook...).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let body = serde_json::to_string(notification).map_err(|e| DeliveryError(e.to_string()))?;
        info!(owner = %notification.owner(), notification = %body, "notification");
        Ok(())
    }
}

/// Sending half of the notification queue. Never blocks.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: Option<UnboundedSender<Notification>>,
}

impl Outbox {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender: Some(sender) }, receiver)
    }

    /// An outbox that drops everything.
    pub fn disconnected() -> Self {
        Self { sender: None }
    }

    pub fn send(&self, notification: Notification) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(err) = sender.send(notification) {
            warn!(owner = %err.0.owner(), "notification dropped: dispatcher is gone");
        }
    }
}
