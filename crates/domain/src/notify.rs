use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ports::notify::{CrmPublisher, NotificationStore};
use crate::util::{now_ms, preview, uuid_v7_without_dashes};

pub const CRM_EVENT_ADMIN_MESSAGE: &str = "chat_admin_message";

const SIDE_EFFECT_FAILURES_TOTAL: &str = "careline_side_effect_failures_total";

fn register_failure(step: &'static str) {
    metrics::counter!(SIDE_EFFECT_FAILURES_TOTAL, "step" => step).increment(1);
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "target")]
pub enum NotificationAudience {
    AdminPool,
    Patient(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub notification_id: String,
    pub audience: NotificationAudience,
    pub thread_id: String,
    pub message_id: String,
    pub body: String,
    pub created_at_ms: i64,
}

impl Notification {
    fn new(audience: NotificationAudience, thread_id: &str, message_id: &str, body: &str) -> Self {
        Self {
            notification_id: uuid_v7_without_dashes(),
            audience,
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            body: preview(body),
            created_at_ms: now_ms(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrmEvent {
    pub event_type: String,
    pub patient_id: String,
    pub thread_id: String,
    pub message_id: String,
    pub preview: String,
    pub occurred_at_ms: i64,
}

/// Fire-and-forget side effects for admin→patient messages.
///
/// Every sub-step is independent and best-effort: a failed CRM publish does
/// not block the notification writes and vice versa, and no failure is ever
/// surfaced to the chat path. The chat path's success criterion is "message
/// persisted and broadcast", full stop.
#[derive(Clone)]
pub struct SideEffectNotifier {
    notifications: Arc<dyn NotificationStore>,
    crm: Arc<dyn CrmPublisher>,
}

impl SideEffectNotifier {
    pub fn new(notifications: Arc<dyn NotificationStore>, crm: Arc<dyn CrmPublisher>) -> Self {
        Self { notifications, crm }
    }

    pub async fn on_admin_message(
        &self,
        patient_id: &str,
        thread_id: &str,
        message_id: &str,
        content: &str,
    ) {
        let pool = Notification::new(NotificationAudience::AdminPool, thread_id, message_id, content);
        if let Err(err) = self.notifications.create(&pool).await {
            register_failure("notification_admin_pool");
            tracing::warn!(error = %err, thread_id, message_id, "admin-pool notification write failed");
        }

        let patient = Notification::new(
            NotificationAudience::Patient(patient_id.to_string()),
            thread_id,
            message_id,
            content,
        );
        if let Err(err) = self.notifications.create(&patient).await {
            register_failure("notification_patient");
            tracing::warn!(error = %err, thread_id, message_id, patient_id, "patient notification write failed");
        }

        let event = CrmEvent {
            event_type: CRM_EVENT_ADMIN_MESSAGE.to_string(),
            patient_id: patient_id.to_string(),
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            preview: preview(content),
            occurred_at_ms: now_ms(),
        };
        if let Err(err) = self.crm.publish(&event).await {
            register_failure("crm_publish");
            tracing::warn!(error = %err, thread_id, message_id, "crm event publish failed");
        }
    }
}
