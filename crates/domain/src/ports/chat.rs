use crate::chat::{ChatMessage, ChatThread, ThreadPage, ThreadSummary};
use crate::roles::SenderRole;
use crate::DomainResult;

/// Persistence port for threads and messages. The backing store is expected
/// to provide row-level atomicity per call and a unique constraint on
/// `patient_id`; `create_thread` must fail with `Conflict` when a thread for
/// the same patient already exists.
pub trait ChatRepository: Send + Sync {
    fn create_thread(
        &self,
        thread: &ChatThread,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ChatThread>>;

    fn get_thread(
        &self,
        thread_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ChatThread>>>;

    fn get_thread_by_patient(
        &self,
        patient_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<ChatThread>>>;

    /// Threads ordered by `last_message_at_ms` descending, nulls last.
    fn list_threads(
        &self,
        page: &ThreadPage,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatThread>>>;

    fn update_thread_summary(
        &self,
        thread_id: &str,
        summary: &ThreadSummary,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ChatThread>>;

    /// Inserts a message. The store assigns the final `created_at_ms`,
    /// monotonic within the thread, and returns the persisted row.
    fn create_message(
        &self,
        message: &ChatMessage,
    ) -> crate::ports::BoxFuture<'_, DomainResult<ChatMessage>>;

    /// Messages ascending by creation time, bounded by `limit`.
    fn list_messages(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Vec<ChatMessage>>>;

    /// Transitions all unread messages authored by `sender_role` in the
    /// thread to read, returning how many rows changed.
    fn mark_read(
        &self,
        thread_id: &str,
        sender_role: SenderRole,
    ) -> crate::ports::BoxFuture<'_, DomainResult<u64>>;
}
