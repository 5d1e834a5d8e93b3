use std::sync::Arc;

use tokio::sync::RwLock;

use careline_domain::notify::Notification;
use careline_domain::ports::notify::NotificationStore;
use careline_domain::ports::BoxFuture;
use careline_domain::DomainResult;

#[derive(Clone, Default)]
pub struct InMemoryNotificationStore {
    records: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Notification> {
        self.records.read().await.clone()
    }
}

impl NotificationStore for InMemoryNotificationStore {
    fn create(&self, notification: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification = notification.clone();
        let records = self.records.clone();
        Box::pin(async move {
            records.write().await.push(notification.clone());
            Ok(notification)
        })
    }
}
