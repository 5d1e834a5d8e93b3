use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// Verified identity produced by the credential verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthedUser {
    pub user_id: String,
    pub email: String,
}

/// One live realtime connection after gatekeeping. Created at successful
/// authentication, dropped at disconnect, never shared across connections.
#[derive(Clone, Debug)]
pub struct ConnectionSession {
    pub user_id: String,
    pub email: String,
    pub effective_role: Role,
}

impl ConnectionSession {
    pub fn new(user: AuthedUser, effective_role: Role) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            effective_role,
        }
    }
}
