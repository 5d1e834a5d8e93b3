use thiserror::Error;

use crate::notify::{CrmEvent, Notification};
use crate::DomainResult;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm client configuration error: {0}")]
    Configuration(String),
    #[error("crm transport error: {0}")]
    Transport(String),
    #[error("crm upstream error: {0}")]
    Upstream(String),
}

/// Best-effort in-app notification writes. Failures here never affect
/// message delivery.
pub trait NotificationStore: Send + Sync {
    fn create(
        &self,
        notification: &Notification,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Notification>>;
}

/// Outbound CRM event publisher. Fire-and-forget from the chat path's point
/// of view.
pub trait CrmPublisher: Send + Sync {
    fn publish(&self, event: &CrmEvent) -> crate::ports::BoxFuture<'_, Result<(), CrmError>>;
}
