use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::notify::SideEffectNotifier;
use crate::ports::chat::ChatRepository;
use crate::roles::SenderRole;
use crate::util::{now_ms, preview, uuid_v7_without_dashes};
use crate::DomainResult;

pub const MAX_CONTENT_LENGTH: usize = 2_000;
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;
pub const MAX_MESSAGE_LIMIT: usize = 200;
pub const DEFAULT_THREAD_PAGE_SIZE: usize = 20;
pub const MAX_THREAD_PAGE_SIZE: usize = 50;

/// The single conversation container for one patient. Created lazily on the
/// first message, never deleted; the summary fields change on every message
/// insert and never on a read-state transition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatThread {
    pub thread_id: String,
    pub patient_id: String,
    pub last_message_at_ms: Option<i64>,
    pub last_message_preview: Option<String>,
    pub created_at_ms: i64,
}

impl ChatThread {
    pub fn new_for_patient(patient_id: &str) -> Self {
        Self {
            thread_id: uuid_v7_without_dashes(),
            patient_id: patient_id.to_string(),
            last_message_at_ms: None,
            last_message_preview: None,
            created_at_ms: now_ms(),
        }
    }
}

/// An immutable chat event within a thread. Only `read` ever changes after
/// creation, and only forward (false to true).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub content: String,
    pub created_at_ms: i64,
    pub read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    pub last_message_at_ms: i64,
    pub last_message_preview: String,
}

#[derive(Clone, Debug)]
pub struct ThreadPage {
    pub page: usize,
    pub page_size: usize,
}

/// Reference to the conversation a message targets: patients address their
/// own implicit thread, admins address an explicit thread id.
#[derive(Clone, Copy, Debug)]
pub enum ThreadRef<'a> {
    Patient(&'a str),
    Thread(&'a str),
}

#[derive(Clone, Debug)]
pub struct SendOutcome {
    pub thread: ChatThread,
    pub message: ChatMessage,
}

/// Canonical chat operations, invoked identically from the REST handlers and
/// the realtime router so both transports produce the same persisted state.
#[derive(Clone)]
pub struct ChatService {
    repository: Arc<dyn ChatRepository>,
    notifier: SideEffectNotifier,
}

impl ChatService {
    pub fn new(repository: Arc<dyn ChatRepository>, notifier: SideEffectNotifier) -> Self {
        Self {
            repository,
            notifier,
        }
    }

    /// Get-or-create, tolerant of concurrent first-message sends: the store's
    /// unique constraint on `patient_id` turns the race into a `Conflict`,
    /// which is resolved by re-fetching the winner's row.
    pub async fn get_or_create_thread(&self, patient_id: &str) -> DomainResult<ChatThread> {
        if let Some(thread) = self.repository.get_thread_by_patient(patient_id).await? {
            return Ok(thread);
        }
        let thread = ChatThread::new_for_patient(patient_id);
        match self.repository.create_thread(&thread).await {
            Ok(thread) => Ok(thread),
            Err(DomainError::Conflict) => self
                .repository
                .get_thread_by_patient(patient_id)
                .await?
                .ok_or_else(|| {
                    DomainError::Persistence("thread conflict without surviving row".into())
                }),
            Err(err) => Err(err),
        }
    }

    pub async fn get_thread(&self, thread_id: &str) -> DomainResult<ChatThread> {
        self.repository
            .get_thread(thread_id)
            .await?
            .ok_or(DomainError::NotFound)
    }

    pub async fn send_message(
        &self,
        target: ThreadRef<'_>,
        sender_id: &str,
        sender_role: SenderRole,
        content: &str,
    ) -> DomainResult<SendOutcome> {
        let content = validate_content(content)?;

        let thread = match target {
            ThreadRef::Patient(patient_id) => self.get_or_create_thread(patient_id).await?,
            ThreadRef::Thread(thread_id) => self.get_thread(thread_id).await?,
        };

        let message = ChatMessage {
            message_id: uuid_v7_without_dashes(),
            thread_id: thread.thread_id.clone(),
            sender_id: sender_id.to_string(),
            sender_role,
            content,
            created_at_ms: now_ms(),
            read: false,
        };
        let message = self.repository.create_message(&message).await?;

        let summary = ThreadSummary {
            last_message_at_ms: message.created_at_ms,
            last_message_preview: preview(&message.content),
        };
        // The message is already delivered at this point; a summary failure
        // is a display inconsistency, not a send failure.
        let thread = match self
            .repository
            .update_thread_summary(&thread.thread_id, &summary)
            .await
        {
            Ok(thread) => thread,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    thread_id = %thread.thread_id,
                    message_id = %message.message_id,
                    "thread summary update failed after message insert"
                );
                thread
            }
        };

        if sender_role == SenderRole::Admin {
            let notifier = self.notifier.clone();
            let patient_id = thread.patient_id.clone();
            let thread_id = thread.thread_id.clone();
            let message_id = message.message_id.clone();
            let body = message.content.clone();
            tokio::spawn(async move {
                notifier
                    .on_admin_message(&patient_id, &thread_id, &message_id, &body)
                    .await;
            });
        }

        Ok(SendOutcome { thread, message })
    }

    pub async fn list_messages(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> DomainResult<Vec<ChatMessage>> {
        let limit = limit
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .clamp(1, MAX_MESSAGE_LIMIT);
        self.repository.list_messages(thread_id, limit).await
    }

    pub async fn list_threads(
        &self,
        page: Option<usize>,
        page_size: Option<usize>,
    ) -> DomainResult<Vec<ChatThread>> {
        let page = ThreadPage {
            page: page.unwrap_or(0),
            page_size: page_size
                .unwrap_or(DEFAULT_THREAD_PAGE_SIZE)
                .clamp(1, MAX_THREAD_PAGE_SIZE),
        };
        self.repository.list_threads(&page).await
    }

    /// Admin reading the thread: transitions unread patient messages.
    /// Idempotent; a second call in a row reports zero.
    pub async fn mark_patient_messages_read(&self, thread_id: &str) -> DomainResult<u64> {
        self.get_thread(thread_id).await?;
        self.repository
            .mark_read(thread_id, SenderRole::Patient)
            .await
    }

    /// Patient-side counterpart: transitions unread admin messages.
    pub async fn mark_admin_messages_read(&self, thread_id: &str) -> DomainResult<u64> {
        self.get_thread(thread_id).await?;
        self.repository.mark_read(thread_id, SenderRole::Admin).await
    }
}

fn validate_content(content: &str) -> DomainResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(DomainError::Validation("content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(DomainError::Validation(format!(
            "content exceeds max length of {MAX_CONTENT_LENGTH}"
        )));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{CrmEvent, Notification};
    use crate::ports::notify::{CrmError, CrmPublisher, NotificationStore};
    use crate::ports::BoxFuture;
    use std::collections::HashMap;
    use tokio::sync::RwLock;

    #[derive(Default)]
    struct StoreInner {
        threads: HashMap<String, ChatThread>,
        patient_index: HashMap<String, String>,
        messages: HashMap<String, Vec<ChatMessage>>,
    }

    #[derive(Default)]
    struct MockChatRepo {
        inner: Arc<RwLock<StoreInner>>,
        fail_summary: bool,
    }

    impl ChatRepository for MockChatRepo {
        fn create_thread(&self, thread: &ChatThread) -> BoxFuture<'_, DomainResult<ChatThread>> {
            let thread = thread.clone();
            let inner = self.inner.clone();
            Box::pin(async move {
                let mut inner = inner.write().await;
                if inner.patient_index.contains_key(&thread.patient_id) {
                    return Err(DomainError::Conflict);
                }
                inner
                    .patient_index
                    .insert(thread.patient_id.clone(), thread.thread_id.clone());
                inner
                    .threads
                    .insert(thread.thread_id.clone(), thread.clone());
                Ok(thread)
            })
        }

        fn get_thread(&self, thread_id: &str) -> BoxFuture<'_, DomainResult<Option<ChatThread>>> {
            let thread_id = thread_id.to_string();
            let inner = self.inner.clone();
            Box::pin(async move { Ok(inner.read().await.threads.get(&thread_id).cloned()) })
        }

        fn get_thread_by_patient(
            &self,
            patient_id: &str,
        ) -> BoxFuture<'_, DomainResult<Option<ChatThread>>> {
            let patient_id = patient_id.to_string();
            let inner = self.inner.clone();
            Box::pin(async move {
                let inner = inner.read().await;
                Ok(inner
                    .patient_index
                    .get(&patient_id)
                    .and_then(|thread_id| inner.threads.get(thread_id))
                    .cloned())
            })
        }

        fn list_threads(&self, page: &ThreadPage) -> BoxFuture<'_, DomainResult<Vec<ChatThread>>> {
            let page = page.clone();
            let inner = self.inner.clone();
            Box::pin(async move {
                let mut threads: Vec<_> = inner.read().await.threads.values().cloned().collect();
                threads.sort_by(|a, b| match (b.last_message_at_ms, a.last_message_at_ms) {
                    (Some(b_at), Some(a_at)) => b_at.cmp(&a_at),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                });
                Ok(threads
                    .into_iter()
                    .skip(page.page * page.page_size)
                    .take(page.page_size)
                    .collect())
            })
        }

        fn update_thread_summary(
            &self,
            thread_id: &str,
            summary: &ThreadSummary,
        ) -> BoxFuture<'_, DomainResult<ChatThread>> {
            let thread_id = thread_id.to_string();
            let summary = summary.clone();
            let inner = self.inner.clone();
            let fail = self.fail_summary;
            Box::pin(async move {
                if fail {
                    return Err(DomainError::Persistence("summary write rejected".into()));
                }
                let mut inner = inner.write().await;
                let thread = inner
                    .threads
                    .get_mut(&thread_id)
                    .ok_or(DomainError::NotFound)?;
                thread.last_message_at_ms = Some(summary.last_message_at_ms);
                thread.last_message_preview = Some(summary.last_message_preview);
                Ok(thread.clone())
            })
        }

        fn create_message(
            &self,
            message: &ChatMessage,
        ) -> BoxFuture<'_, DomainResult<ChatMessage>> {
            let mut message = message.clone();
            let inner = self.inner.clone();
            Box::pin(async move {
                let mut inner = inner.write().await;
                if !inner.threads.contains_key(&message.thread_id) {
                    return Err(DomainError::NotFound);
                }
                let log = inner.messages.entry(message.thread_id.clone()).or_default();
                if let Some(last) = log.last() {
                    if message.created_at_ms <= last.created_at_ms {
                        message.created_at_ms = last.created_at_ms + 1;
                    }
                }
                log.push(message.clone());
                Ok(message)
            })
        }

        fn list_messages(
            &self,
            thread_id: &str,
            limit: usize,
        ) -> BoxFuture<'_, DomainResult<Vec<ChatMessage>>> {
            let thread_id = thread_id.to_string();
            let inner = self.inner.clone();
            Box::pin(async move {
                Ok(inner
                    .read()
                    .await
                    .messages
                    .get(&thread_id)
                    .map(|log| {
                        let skip = log.len().saturating_sub(limit);
                        log.iter().skip(skip).cloned().collect()
                    })
                    .unwrap_or_default())
            })
        }

        fn mark_read(
            &self,
            thread_id: &str,
            sender_role: SenderRole,
        ) -> BoxFuture<'_, DomainResult<u64>> {
            let thread_id = thread_id.to_string();
            let inner = self.inner.clone();
            Box::pin(async move {
                let mut inner = inner.write().await;
                let mut updated = 0;
                if let Some(log) = inner.messages.get_mut(&thread_id) {
                    for message in log.iter_mut() {
                        if message.sender_role == sender_role && !message.read {
                            message.read = true;
                            updated += 1;
                        }
                    }
                }
                Ok(updated)
            })
        }
    }

    struct NullStore;

    impl NotificationStore for NullStore {
        fn create(
            &self,
            notification: &Notification,
        ) -> BoxFuture<'_, DomainResult<Notification>> {
            let notification = notification.clone();
            Box::pin(async move { Ok(notification) })
        }
    }

    struct FailingStore;

    impl NotificationStore for FailingStore {
        fn create(&self, _: &Notification) -> BoxFuture<'_, DomainResult<Notification>> {
            Box::pin(async move { Err(DomainError::Persistence("notifications down".into())) })
        }
    }

    struct NullCrm;

    impl CrmPublisher for NullCrm {
        fn publish(&self, _: &CrmEvent) -> BoxFuture<'_, Result<(), CrmError>> {
            Box::pin(async move { Ok(()) })
        }
    }

    struct FailingCrm;

    impl CrmPublisher for FailingCrm {
        fn publish(&self, _: &CrmEvent) -> BoxFuture<'_, Result<(), CrmError>> {
            Box::pin(async move { Err(CrmError::Transport("connection refused".into())) })
        }
    }

    fn service_with(repo: Arc<MockChatRepo>, notifier: SideEffectNotifier) -> ChatService {
        ChatService::new(repo, notifier)
    }

    fn quiet_notifier() -> SideEffectNotifier {
        SideEffectNotifier::new(Arc::new(NullStore), Arc::new(NullCrm))
    }

    #[tokio::test]
    async fn concurrent_first_sends_produce_one_thread() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo.clone(), quiet_notifier());

        let (a, b) = tokio::join!(
            service.send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "hi"),
            service.send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "hello"),
        );
        let a = a.expect("first send");
        let b = b.expect("second send");

        assert_eq!(a.thread.thread_id, b.thread.thread_id);
        assert_eq!(repo.inner.read().await.threads.len(), 1);
    }

    #[tokio::test]
    async fn messages_are_listed_in_non_decreasing_creation_order() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo, quiet_notifier());

        for body in ["one", "two", "three", "four"] {
            service
                .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, body)
                .await
                .expect("send");
        }

        let thread = service.get_or_create_thread("patient-1").await.expect("thread");
        let messages = service
            .list_messages(&thread.thread_id, None)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 4);
        for window in messages.windows(2) {
            assert!(window[0].created_at_ms <= window[1].created_at_ms);
        }
    }

    #[tokio::test]
    async fn admin_reply_updates_summary_and_stays_unread() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo, quiet_notifier());

        service
            .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "my order is late")
            .await
            .expect("patient send");

        let outcome = service
            .send_message(
                ThreadRef::Patient("patient-1"),
                "admin-1",
                SenderRole::Admin,
                "We'll look into it",
            )
            .await
            .expect("admin send");

        assert_eq!(outcome.message.sender_role, SenderRole::Admin);
        assert!(!outcome.message.read);
        assert_eq!(
            outcome.thread.last_message_preview.as_deref(),
            Some("We'll look into it")
        );
    }

    #[tokio::test]
    async fn mark_read_is_forward_only_and_idempotent() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo, quiet_notifier());

        let thread = service
            .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "hi")
            .await
            .expect("send")
            .thread;
        service
            .send_message(ThreadRef::Thread(&thread.thread_id), "patient-1", SenderRole::Patient, "anyone?")
            .await
            .expect("send");

        let first = service
            .mark_patient_messages_read(&thread.thread_id)
            .await
            .expect("mark read");
        assert_eq!(first, 2);

        let second = service
            .mark_patient_messages_read(&thread.thread_id)
            .await
            .expect("mark read again");
        assert_eq!(second, 0);

        let messages = service
            .list_messages(&thread.thread_id, None)
            .await
            .expect("messages");
        assert!(messages.iter().all(|message| message.read));
    }

    #[tokio::test]
    async fn list_messages_enforces_hard_cap() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo, quiet_notifier());

        let thread = service.get_or_create_thread("patient-1").await.expect("thread");
        for i in 0..(MAX_MESSAGE_LIMIT + 20) {
            service
                .send_message(
                    ThreadRef::Thread(&thread.thread_id),
                    "patient-1",
                    SenderRole::Patient,
                    &format!("message {i}"),
                )
                .await
                .expect("send");
        }

        let messages = service
            .list_messages(&thread.thread_id, Some(10_000))
            .await
            .expect("messages");
        assert_eq!(messages.len(), MAX_MESSAGE_LIMIT);
        // The capped window is the most recent stretch, still in insert order.
        assert_eq!(messages[0].content, "message 20");
        assert_eq!(
            messages.last().map(|message| message.content.as_str()),
            Some(format!("message {}", MAX_MESSAGE_LIMIT + 19).as_str())
        );
    }

    #[tokio::test]
    async fn empty_content_is_rejected_before_persistence() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo.clone(), quiet_notifier());

        let err = service
            .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(repo.inner.read().await.threads.is_empty());
    }

    #[tokio::test]
    async fn summary_failure_does_not_fail_the_send() {
        let repo = Arc::new(MockChatRepo {
            fail_summary: true,
            ..MockChatRepo::default()
        });
        let service = service_with(repo, quiet_notifier());

        let outcome = service
            .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "hi")
            .await
            .expect("send despite summary failure");
        assert_eq!(outcome.message.content, "hi");
        assert!(outcome.thread.last_message_preview.is_none());
    }

    #[tokio::test]
    async fn failing_side_effects_never_change_send_result() {
        let repo = Arc::new(MockChatRepo::default());
        let broken = SideEffectNotifier::new(Arc::new(FailingStore), Arc::new(FailingCrm));
        let service = service_with(repo, broken);

        service
            .send_message(ThreadRef::Patient("patient-1"), "patient-1", SenderRole::Patient, "hi")
            .await
            .expect("patient send");
        let thread = service.get_or_create_thread("patient-1").await.expect("thread");

        let outcome = service
            .send_message(
                ThreadRef::Thread(&thread.thread_id),
                "admin-1",
                SenderRole::Admin,
                "looking into it",
            )
            .await
            .expect("admin send with broken side effects");
        assert_eq!(outcome.message.sender_role, SenderRole::Admin);

        // Let the detached notifier task run; it must swallow its failures.
        tokio::task::yield_now().await;
        let messages = service
            .list_messages(&thread.thread_id, None)
            .await
            .expect("messages");
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn admin_send_to_unknown_thread_is_not_found() {
        let repo = Arc::new(MockChatRepo::default());
        let service = service_with(repo, quiet_notifier());

        let err = service
            .send_message(ThreadRef::Thread("missing"), "admin-1", SenderRole::Admin, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }
}
