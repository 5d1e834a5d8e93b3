use crate::roles::Role;
use crate::DomainResult;

/// Lookup against the persistent role table keyed by user id. Absence of a
/// row yields `None`, never an error; callers treat `None` as "no elevated
/// role". Each call is independent and side-effect free.
pub trait RoleDirectory: Send + Sync {
    fn role_of(&self, user_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<Option<Role>>>;
}
