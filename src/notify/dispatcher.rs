use super::{Notification, Notifier};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Drains the outbox into a `Notifier`.
pub struct NotificationDispatcher {
    receiver: UnboundedReceiver<Notification>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(receiver: UnboundedReceiver<Notification>, notifier: Arc<dyn Notifier>) -> Self {
        Self { receiver, notifier }
    }

    /// Runs until every `Outbox` handle is dropped.
    pub async fn run(mut self) {
        info!("notification dispatcher started");
        while let Some(notification) = self.receiver.recv().await {
            match self.notifier.deliver(&notification).await {
                Ok(()) => debug!(owner = %notification.owner(), "notification delivered"),
                Err(err) => warn!(owner = %notification.owner(), error = %err, "notification delivery failed"),
            }
        }
        info!("notification dispatcher stopped");
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CycleId, UserId};
    use crate::notify::{AlertKind, DeliveryError, Outbox};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Flaky {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(notification.clone());
            if seen.len() == 1 {
                return Err(DeliveryError("smtp down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_dispatcher() {
        let (outbox, rx) = Outbox::channel();
        let notifier = Arc::new(Flaky::default());
        let handle = NotificationDispatcher::new(rx, notifier.clone()).spawn();

        for kind in [AlertKind::CycleOpened, AlertKind::QuorumReached] {
            outbox.send(Notification::AdministratorAlert {
                owner: UserId::from("o"),
                cycle: CycleId::new(),
                kind,
            });
        }
        drop(outbox);
        handle.await.unwrap();

        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }
}
