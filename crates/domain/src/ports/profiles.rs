use serde::{Deserialize, Serialize};

use crate::DomainResult;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientProfile {
    pub user_id: String,
    pub email: String,
    pub full_name: String,
}

/// Read-only join source for enriching admin thread lists with patient
/// email/name. The upstream profile store itself is an external collaborator.
pub trait PatientProfiles: Send + Sync {
    fn profile_of(
        &self,
        user_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<PatientProfile>>>;
}
