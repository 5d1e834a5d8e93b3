use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use careline_domain::ports::roles::RoleDirectory;
use careline_domain::ports::BoxFuture;
use careline_domain::roles::Role;
use careline_domain::DomainResult;

/// In-memory role table. Only rows present here grant an elevated role;
/// every other user id resolves to `None`.
#[derive(Clone, Default)]
pub struct InMemoryRoleDirectory {
    roles: Arc<RwLock<HashMap<String, Role>>>,
}

impl InMemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded_with_admins(admin_ids: impl IntoIterator<Item = String>) -> Self {
        let roles = admin_ids
            .into_iter()
            .map(|user_id| (user_id, Role::Admin))
            .collect();
        Self {
            roles: Arc::new(RwLock::new(roles)),
        }
    }

    pub async fn assign(&self, user_id: &str, role: Role) {
        self.roles.write().await.insert(user_id.to_string(), role);
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn role_of(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<Role>>> {
        let user_id = user_id.to_string();
        let roles = self.roles.clone();
        Box::pin(async move { Ok(roles.read().await.get(&user_id).copied()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_row_yields_none_not_an_error() {
        let directory = InMemoryRoleDirectory::seeded_with_admins(vec!["admin-1".to_string()]);
        assert_eq!(
            directory.role_of("admin-1").await.expect("lookup"),
            Some(Role::Admin)
        );
        assert_eq!(directory.role_of("stranger").await.expect("lookup"), None);
    }
}
