use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use careline_domain::chat::{ChatMessage, ChatThread, ThreadPage, ThreadSummary};
use careline_domain::error::DomainError;
use careline_domain::ports::chat::ChatRepository;
use careline_domain::ports::BoxFuture;
use careline_domain::roles::SenderRole;
use careline_domain::DomainResult;

#[derive(Default)]
struct ChatStoreInner {
    threads: HashMap<String, ChatThread>,
    // patient_id -> thread_id; the unique-constraint surrogate.
    patient_index: HashMap<String, String>,
    // thread_id -> messages in insert order.
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// In-memory chat store. A single lock around the inner maps gives each call
/// the row-level atomicity the domain expects from the hosted backend.
#[derive(Clone, Default)]
pub struct InMemoryChatRepository {
    inner: Arc<RwLock<ChatStoreInner>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatRepository for InMemoryChatRepository {
    fn create_thread(&self, thread: &ChatThread) -> BoxFuture<'_, DomainResult<ChatThread>> {
        let thread = thread.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut inner = inner.write().await;
            if inner.patient_index.contains_key(&thread.patient_id)
                || inner.threads.contains_key(&thread.thread_id)
            {
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
            threads.sort_by(|a, b| {
                match (b.last_message_at_ms, a.last_message_at_ms) {
                    (Some(b_at), Some(a_at)) => b_at.cmp(&a_at),
                    // Nulls last.
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => b.created_at_ms.cmp(&a.created_at_ms),
                }
                .then_with(|| a.thread_id.cmp(&b.thread_id))
            });
            Ok(threads
                .into_iter()
                .skip(page.page.saturating_mul(page.page_size))
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
        Box::pin(async move {
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

    fn create_message(&self, message: &ChatMessage) -> BoxFuture<'_, DomainResult<ChatMessage>> {
        let mut message = message.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut inner = inner.write().await;
            if !inner.threads.contains_key(&message.thread_id) {
                return Err(DomainError::NotFound);
            }
            let log = inner.messages.entry(message.thread_id.clone()).or_default();
            // Server-assigned creation time, monotonic within the thread even
            // when the wall clock ties.
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
                    // Most recent `limit` messages, still in insert order.
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

#[cfg(test)]
mod tests {
    use super::*;
    use careline_domain::util::uuid_v7_without_dashes;

    fn thread(patient_id: &str) -> ChatThread {
        ChatThread::new_for_patient(patient_id)
    }

    fn message(thread_id: &str, role: SenderRole, created_at_ms: i64) -> ChatMessage {
        ChatMessage {
            message_id: uuid_v7_without_dashes(),
            thread_id: thread_id.to_string(),
            sender_id: "someone".to_string(),
            sender_role: role,
            content: "body".to_string(),
            created_at_ms,
            read: false,
        }
    }

    #[tokio::test]
    async fn second_thread_for_same_patient_conflicts() {
        let repo = InMemoryChatRepository::new();
        repo.create_thread(&thread("patient-1")).await.expect("first");
        let err = repo.create_thread(&thread("patient-1")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict));
    }

    #[tokio::test]
    async fn created_at_is_monotonic_under_clock_ties() {
        let repo = InMemoryChatRepository::new();
        let thread = repo.create_thread(&thread("patient-1")).await.expect("thread");

        let first = repo
            .create_message(&message(&thread.thread_id, SenderRole::Patient, 1_000))
            .await
            .expect("first");
        let second = repo
            .create_message(&message(&thread.thread_id, SenderRole::Patient, 1_000))
            .await
            .expect("second");
        let third = repo
            .create_message(&message(&thread.thread_id, SenderRole::Patient, 500))
            .await
            .expect("third");

        assert_eq!(first.created_at_ms, 1_000);
        assert_eq!(second.created_at_ms, 1_001);
        assert_eq!(third.created_at_ms, 1_002);
    }

    #[tokio::test]
    async fn mark_read_only_touches_the_given_role() {
        let repo = InMemoryChatRepository::new();
        let thread = repo.create_thread(&thread("patient-1")).await.expect("thread");
        repo.create_message(&message(&thread.thread_id, SenderRole::Patient, 1))
            .await
            .expect("patient message");
        repo.create_message(&message(&thread.thread_id, SenderRole::Admin, 2))
            .await
            .expect("admin message");

        let updated = repo
            .mark_read(&thread.thread_id, SenderRole::Patient)
            .await
            .expect("mark read");
        assert_eq!(updated, 1);

        let messages = repo
            .list_messages(&thread.thread_id, 10)
            .await
            .expect("messages");
        assert!(messages[0].read);
        assert!(!messages[1].read);
    }

    #[tokio::test]
    async fn list_messages_returns_the_most_recent_window_in_order() {
        let repo = InMemoryChatRepository::new();
        let thread = repo.create_thread(&thread("patient-1")).await.expect("thread");
        for i in 0..5 {
            repo.create_message(&message(&thread.thread_id, SenderRole::Patient, i))
                .await
                .expect("message");
        }

        let window = repo
            .list_messages(&thread.thread_id, 2)
            .await
            .expect("messages");
        let stamps: Vec<_> = window.iter().map(|m| m.created_at_ms).collect();
        assert_eq!(stamps, vec![3, 4]);
    }

    #[tokio::test]
    async fn threads_sort_by_last_message_desc_nulls_last() {
        let repo = InMemoryChatRepository::new();
        let quiet = repo.create_thread(&thread("patient-quiet")).await.expect("quiet");
        let old = repo.create_thread(&thread("patient-old")).await.expect("old");
        let busy = repo.create_thread(&thread("patient-busy")).await.expect("busy");

        repo.update_thread_summary(
            &old.thread_id,
            &ThreadSummary {
                last_message_at_ms: 1_000,
                last_message_preview: "old".to_string(),
            },
        )
        .await
        .expect("old summary");
        repo.update_thread_summary(
            &busy.thread_id,
            &ThreadSummary {
                last_message_at_ms: 2_000,
                last_message_preview: "busy".to_string(),
            },
        )
        .await
        .expect("busy summary");

        let listed = repo
            .list_threads(&ThreadPage {
                page: 0,
                page_size: 10,
            })
            .await
            .expect("list");
        let ids: Vec<_> = listed.iter().map(|thread| thread.thread_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                busy.thread_id.as_str(),
                old.thread_id.as_str(),
                quiet.thread_id.as_str()
            ]
        );
    }

    #[tokio::test]
    async fn pagination_windows_the_sorted_list() {
        let repo = InMemoryChatRepository::new();
        for i in 0..5 {
            let created = repo
                .create_thread(&thread(&format!("patient-{i}")))
                .await
                .expect("thread");
            repo.update_thread_summary(
                &created.thread_id,
                &ThreadSummary {
                    last_message_at_ms: i,
                    last_message_preview: format!("m{i}"),
                },
            )
            .await
            .expect("summary");
        }

        let page = repo
            .list_threads(&ThreadPage {
                page: 1,
                page_size: 2,
            })
            .await
            .expect("page");
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].last_message_at_ms, Some(2));
        assert_eq!(page[1].last_message_at_ms, Some(1));
    }
}
