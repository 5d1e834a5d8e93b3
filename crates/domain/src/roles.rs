use serde::{Deserialize, Serialize};

/// Role actually granted to a connection or request after verification,
/// as opposed to whatever the client claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Author side of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Patient,
    Admin,
}

impl SenderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderRole::Patient => "patient",
            SenderRole::Admin => "admin",
        }
    }
}

impl From<Role> for SenderRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => SenderRole::Admin,
            Role::User => SenderRole::Patient,
        }
    }
}

/// Computes the role a connection is actually granted.
///
/// Upward claims are verified against the stored role table: a client that
/// claims admin gets admin only when the lookup returns exactly `Admin`, and
/// is otherwise silently downgraded to user rather than rejected. Downward
/// or absent claims are trusted as user without any lookup.
pub fn effective_role(claims_admin: bool, stored: Option<Role>) -> Role {
    if !claims_admin {
        return Role::User;
    }
    match stored {
        Some(Role::Admin) => Role::Admin,
        _ => Role::User,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_claim_requires_stored_admin_role() {
        assert_eq!(effective_role(true, Some(Role::Admin)), Role::Admin);
        assert_eq!(effective_role(true, Some(Role::User)), Role::User);
        assert_eq!(effective_role(true, None), Role::User);
    }

    #[test]
    fn user_claim_is_trusted_without_lookup() {
        assert_eq!(effective_role(false, None), Role::User);
        // A stored admin role does not elevate a connection that never
        // claimed admin.
        assert_eq!(effective_role(false, Some(Role::Admin)), Role::User);
    }

    #[test]
    fn role_parse_round_trips() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("moderator"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }
}
