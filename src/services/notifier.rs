use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::Notification;
use crate::ports::{NotificationKind, Notifier};

/// Pushes a notification on a detached task once its outbox row has
/// committed. A failure is logged and otherwise ignored.
pub fn dispatch(notifier: Arc<dyn Notifier>, user_id: Uuid, notification: Notification) {
    tokio::spawn(async move {
        let kind = notification.kind;
        if let Err(e) = notifier.notify(user_id, &notification.message, kind).await {
            tracing::error!(%user_id, kind = %kind, error = %e, "Failed to send notification");
        }
    });
}

/// Writes notifications to the log only. Delivery from the `notifications`
/// outbox is left to an external worker.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        message: &str,
        kind: NotificationKind,
    ) -> anyhow::Result<()> {
        tracing::info!(%user_id, kind = %kind, "{}", message);
        Ok(())
    }
}
