use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use careline_domain::ports::profiles::{PatientProfile, PatientProfiles};
use careline_domain::ports::BoxFuture;
use careline_domain::DomainResult;

#[derive(Clone, Default)]
pub struct InMemoryPatientProfiles {
    profiles: Arc<RwLock<HashMap<String, PatientProfile>>>,
}

impl InMemoryPatientProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: PatientProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }
}

impl PatientProfiles for InMemoryPatientProfiles {
    fn profile_of(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Option<PatientProfile>>> {
        let user_id = user_id.to_string();
        let profiles = self.profiles.clone();
        Box::pin(async move { Ok(profiles.read().await.get(&user_id).cloned()) })
    }
}
